//! Embedded accounts: keys held by a remote enclave, unlocked by the auth
//! service token.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use alloy::primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use wallet_runtime_core::{
    Account, AccountSigner, Authenticator, BackendKind, BundleId, BundleStatus, ConnectOptions,
    SendCallsRequest, SignableMessage, TxRequest, WalletBackend, WalletError, WalletId,
    WalletResult,
};

use crate::bundler::AccountBundler;
use crate::config::RuntimeConfig;
use crate::crypto::{SealedToken, TokenVault};

const BACKEND: &str = "enclave";

#[derive(Debug, Clone)]
pub struct HttpEnclaveClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct SignatureBody {
    signature: Bytes,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignedTransactionBody {
    signed_transaction: Bytes,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionHashBody {
    transaction_hash: B256,
}

impl HttpEnclaveClient {
    pub fn new(base_url: impl Into<String>, timeout_ms: u64) -> WalletResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| WalletError::Transport(format!("enclave client init failed: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        })
    }

    pub fn from_config(config: &RuntimeConfig) -> WalletResult<Self> {
        Self::new(config.enclave_base_url.clone(), config.rpc_timeout_ms)
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, token: &str, body: Value) -> WalletResult<T> {
        let response = self
            .client
            .post(format!("{}/v1/enclave/{path}", self.base_url))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| WalletError::Transport(format!("enclave {path} failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            tracing::debug!(path, status = status.as_u16(), "enclave request rejected");
            return Err(WalletError::HttpTransport {
                backend: BACKEND.to_owned(),
                status: status.as_u16(),
            });
        }
        response
            .json()
            .await
            .map_err(|e| WalletError::ResponseParse(format!("enclave {path} body: {e}")))
    }
}

/// Signs through the enclave with whatever token the authenticator holds at
/// call time, so a logout revokes signing immediately.
pub struct EnclaveSigner {
    enclave: HttpEnclaveClient,
    auth: Arc<Authenticator>,
    address: Address,
}

impl EnclaveSigner {
    fn token(&self) -> WalletResult<String> {
        self.auth
            .auth_token()?
            .ok_or_else(|| WalletError::Auth("embedded wallet is logged out".to_owned()))
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: Value) -> WalletResult<T> {
        let token = self.token()?;
        self.enclave.post(path, &token, body).await
    }
}

#[async_trait]
impl AccountSigner for EnclaveSigner {
    async fn sign_message(&self, message: &SignableMessage) -> WalletResult<Bytes> {
        let body: SignatureBody = self
            .post(
                "sign-message",
                json!({ "address": self.address, "message": message.to_hex() }),
            )
            .await?;
        Ok(body.signature)
    }

    async fn sign_typed_data(&self, typed_data: &Value) -> WalletResult<Bytes> {
        let body: SignatureBody = self
            .post(
                "sign-typed-data",
                json!({ "address": self.address, "typedData": typed_data }),
            )
            .await?;
        Ok(body.signature)
    }

    async fn sign_transaction(&self, tx: &TxRequest) -> WalletResult<Bytes> {
        let body: SignedTransactionBody = self
            .post("sign-transaction", json!({ "transaction": tx }))
            .await?;
        Ok(body.signed_transaction)
    }

    async fn send_transaction(&self, tx: &TxRequest) -> WalletResult<B256> {
        let body: TransactionHashBody = self
            .post("send-transaction", json!({ "transaction": tx }))
            .await?;
        Ok(body.transaction_hash)
    }

    async fn send_raw_transaction(&self, raw: &Bytes, chain_id: u64) -> WalletResult<B256> {
        let body: TransactionHashBody = self
            .post(
                "send-raw-transaction",
                json!({ "signedTransaction": raw, "chainId": chain_id }),
            )
            .await?;
        Ok(body.transaction_hash)
    }
}

pub struct EmbeddedWallet {
    id: WalletId,
    auth: Arc<Authenticator>,
    enclave: HttpEnclaveClient,
    bundler: AccountBundler,
    default_chain_id: u64,
    address: Mutex<Option<Address>>,
}

impl std::fmt::Debug for EmbeddedWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddedWallet")
            .field("id", &self.id)
            .field("default_chain_id", &self.default_chain_id)
            .finish()
    }
}

impl EmbeddedWallet {
    pub fn new(
        auth: Arc<Authenticator>,
        enclave: HttpEnclaveClient,
        bundler: AccountBundler,
        default_chain_id: u64,
    ) -> Self {
        Self {
            id: WalletId::new("embedded"),
            auth,
            enclave,
            bundler,
            default_chain_id,
            address: Mutex::new(None),
        }
    }

    pub fn authenticator(&self) -> &Arc<Authenticator> {
        &self.auth
    }

    fn lock(&self) -> WalletResult<MutexGuard<'_, Option<Address>>> {
        self.address
            .lock()
            .map_err(|e| WalletError::Transport(format!("embedded wallet lock poisoned: {e}")))
    }

    fn account_for(&self, address: Address, chain_id: u64) -> Account {
        let signer = EnclaveSigner {
            enclave: self.enclave.clone(),
            auth: Arc::clone(&self.auth),
            address,
        };
        Account::new(address, chain_id, self.id.clone(), BackendKind::Embedded, Arc::new(signer))
    }

    /// Encrypts the current auth token under `encryption_key` for storage
    /// between runs.
    pub fn persist_session(&self, vault: &TokenVault, encryption_key: &[u8]) -> WalletResult<SealedToken> {
        let token = self
            .auth
            .auth_token()?
            .ok_or_else(|| WalletError::Auth("no session to persist".to_owned()))?;
        vault.seal(encryption_key, &token)
    }

    /// Reopens a sealed token and adopts it. Call `connect` afterwards to
    /// obtain the account.
    pub async fn resume_session(
        &self,
        vault: &TokenVault,
        sealed: &SealedToken,
        encryption_key: &[u8],
    ) -> WalletResult<Address> {
        let token = vault.open(encryption_key, sealed)?;
        let address = self.auth.restore(token).await?;
        *self.lock()? = Some(address);
        Ok(address)
    }
}

#[async_trait]
impl WalletBackend for EmbeddedWallet {
    fn id(&self) -> &WalletId {
        &self.id
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Embedded
    }

    async fn connect(&self, options: ConnectOptions) -> WalletResult<Account> {
        let chain_id = options.chain_id.unwrap_or(self.default_chain_id);
        let address = match options.login {
            Some(request) => {
                let login = self.auth.login(request).await?;
                login.user.wallet_address
            }
            None => {
                let cached = *self.lock()?;
                match (cached, self.auth.auth_token()?) {
                    (Some(address), Some(_)) => address,
                    _ => {
                        return Err(WalletError::Auth(
                            "embedded wallet needs a login to connect".to_owned(),
                        ))
                    }
                }
            }
        };
        *self.lock()? = Some(address);
        Ok(self.account_for(address, chain_id))
    }

    async fn disconnect(&self) -> WalletResult<()> {
        *self.lock()? = None;
        self.auth.logout().await
    }

    async fn switch_chain(&self, account: &Account, chain_id: u64) -> WalletResult<Account> {
        let token = self
            .auth
            .auth_token()?
            .ok_or_else(|| WalletError::Auth("embedded wallet is logged out".to_owned()))?;
        let _: Value = self
            .enclave
            .post("switch-chain", &token, json!({ "chainId": chain_id }))
            .await?;
        Ok(account.on_chain(chain_id))
    }

    async fn send_calls(
        &self,
        account: &Account,
        request: &SendCallsRequest,
    ) -> WalletResult<BundleId> {
        self.bundler.send_calls(account, request).await
    }

    async fn get_calls_status(
        &self,
        _account: &Account,
        bundle_id: &BundleId,
    ) -> WalletResult<BundleStatus> {
        self.bundler.status(bundle_id).await
    }
}
