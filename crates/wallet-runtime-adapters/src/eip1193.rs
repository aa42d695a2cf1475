use std::sync::{Arc, Mutex, MutexGuard};

use alloy::primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use serde_json::{json, Value};

use wallet_runtime_core::{
    Account, AccountSigner, BackendKind, BundleId, BundleState, BundleStatus, Capability,
    ConnectOptions, Eip1193Provider, ProviderEvent, ProviderEventKind, SendCallsRequest,
    SignableMessage, SignatureMethod, TxRequest, WalletBackend, WalletError, WalletId,
    WalletResult,
};

use crate::rpc::{hash, parse_receipt, quantity};

/// Wallet reached through an EIP-1193 provider: a browser extension bridge,
/// or the request channel of a relay connector.
#[derive(Clone)]
pub struct ProviderWallet {
    id: WalletId,
    kind: BackendKind,
    provider: Arc<dyn Eip1193Provider>,
    state: Arc<Mutex<ProviderState>>,
}

#[derive(Debug, Clone, Default)]
struct ProviderState {
    accounts: Vec<Address>,
    chain_id: Option<u64>,
    event_seq: u64,
    events: Vec<ProviderEvent>,
}

impl ProviderState {
    fn push_event(&mut self, kind: ProviderEventKind, value: String) {
        self.event_seq = self.event_seq.saturating_add(1);
        let sequence = self.event_seq;
        self.events.push(ProviderEvent {
            sequence,
            kind,
            value,
        });
    }
}

impl std::fmt::Debug for ProviderWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderWallet")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

impl ProviderWallet {
    pub fn injected(id: impl Into<String>, provider: Arc<dyn Eip1193Provider>) -> Self {
        Self::with_kind(WalletId::new(id), BackendKind::Injected, provider)
    }

    /// Remote wallet behind a session relay. Batched calls are declined for
    /// this kind.
    pub fn peer_relay(provider: Arc<dyn Eip1193Provider>) -> Self {
        Self::with_kind(WalletId::new("walletConnect"), BackendKind::PeerRelay, provider)
    }

    pub(crate) fn with_kind(
        id: WalletId,
        kind: BackendKind,
        provider: Arc<dyn Eip1193Provider>,
    ) -> Self {
        Self {
            id,
            kind,
            provider,
            state: Arc::new(Mutex::new(ProviderState::default())),
        }
    }

    pub fn provider(&self) -> &Arc<dyn Eip1193Provider> {
        &self.provider
    }

    fn lock(&self) -> WalletResult<MutexGuard<'_, ProviderState>> {
        self.state
            .lock()
            .map_err(|e| WalletError::Transport(format!("provider lock poisoned: {e}")))
    }

    /// Feeds an `accountsChanged` notification from the host provider.
    pub fn notify_accounts_changed(&self, accounts: Vec<Address>) -> WalletResult<()> {
        let payload = json!(accounts.iter().map(|a| a.to_string()).collect::<Vec<_>>()).to_string();
        let mut g = self.lock()?;
        g.accounts = accounts;
        g.push_event(ProviderEventKind::AccountsChanged, payload);
        Ok(())
    }

    pub fn notify_chain_changed(&self, chain_id: u64) -> WalletResult<()> {
        let mut g = self.lock()?;
        g.chain_id = Some(chain_id);
        g.push_event(ProviderEventKind::ChainChanged, chain_id.to_string());
        Ok(())
    }

    pub fn accounts(&self) -> WalletResult<Vec<Address>> {
        Ok(self.lock()?.accounts.clone())
    }

    async fn request_accounts(&self) -> WalletResult<Vec<Address>> {
        let result = self.provider.request("eth_requestAccounts", json!([])).await?;
        let items = result.as_array().ok_or_else(|| {
            WalletError::ResponseParse("eth_requestAccounts result must be an array".to_owned())
        })?;
        items
            .iter()
            .map(|item| {
                item.as_str()
                    .ok_or_else(|| {
                        WalletError::ResponseParse("eth_requestAccounts item must be a string".to_owned())
                    })?
                    .parse()
                    .map_err(|e| WalletError::ResponseParse(format!("invalid account: {e}")))
            })
            .collect()
    }

    async fn request_chain_id(&self) -> WalletResult<u64> {
        let raw = self.provider.request("eth_chainId", json!([])).await?;
        quantity(&raw, "eth_chainId")
    }

    async fn request_switch(&self, chain_id: u64) -> WalletResult<()> {
        self.provider
            .request(
                "wallet_switchEthereumChain",
                json!([{ "chainId": format!("0x{chain_id:x}") }]),
            )
            .await
            .map_err(|e| self.unsupported_if_unknown(e, Capability::SwitchChain))?;
        Ok(())
    }

    fn unsupported_if_unknown(&self, e: WalletError, capability: Capability) -> WalletError {
        if e.is_method_not_found() {
            WalletError::unsupported(&self.id, capability)
        } else {
            e
        }
    }

    fn account_for(&self, address: Address, chain_id: u64) -> Account {
        let signer = ProviderSigner {
            provider: Arc::clone(&self.provider),
            address,
        };
        Account::new(address, chain_id, self.id.clone(), self.kind, Arc::new(signer))
    }
}

#[async_trait]
impl WalletBackend for ProviderWallet {
    fn id(&self) -> &WalletId {
        &self.id
    }

    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn connect(&self, options: ConnectOptions) -> WalletResult<Account> {
        let accounts = self.request_accounts().await?;
        let address = *accounts
            .first()
            .ok_or_else(|| WalletError::Auth(format!("{} returned no accounts", self.id)))?;
        let mut chain_id = self.request_chain_id().await?;
        if let Some(wanted) = options.chain_id.filter(|c| *c != chain_id) {
            self.request_switch(wanted).await?;
            chain_id = wanted;
        }
        self.notify_accounts_changed(accounts)?;
        self.notify_chain_changed(chain_id)?;
        Ok(self.account_for(address, chain_id))
    }

    async fn disconnect(&self) -> WalletResult<()> {
        if let Err(e) = self
            .provider
            .request("wallet_revokePermissions", json!([{ "eth_accounts": {} }]))
            .await
        {
            tracing::debug!(wallet = %self.id, error = %e, "wallet_revokePermissions failed");
        }
        let mut g = self.lock()?;
        g.accounts.clear();
        g.chain_id = None;
        g.push_event(ProviderEventKind::Disconnect, String::new());
        Ok(())
    }

    async fn switch_chain(&self, account: &Account, chain_id: u64) -> WalletResult<Account> {
        self.request_switch(chain_id).await?;
        self.notify_chain_changed(chain_id)?;
        Ok(self.account_for(account.address(), chain_id))
    }

    async fn send_calls(&self, account: &Account, request: &SendCallsRequest) -> WalletResult<BundleId> {
        if self.kind == BackendKind::PeerRelay {
            return Err(WalletError::unsupported(&self.id, Capability::BatchCalls));
        }
        let calls: Vec<Value> = request
            .calls
            .iter()
            .map(|c| json!({ "to": c.to, "value": format!("0x{:x}", c.value), "data": c.data }))
            .collect();
        let mut payload = json!({
            "version": "2.0.0",
            "chainId": format!("0x{:x}", request.chain_id),
            "from": account.address(),
            "atomicRequired": false,
            "calls": calls,
        });
        if let Some(capabilities) = &request.capabilities {
            payload["capabilities"] = capabilities.clone();
        }
        let result = self
            .provider
            .request("wallet_sendCalls", json!([payload]))
            .await
            .map_err(|e| self.unsupported_if_unknown(e, Capability::BatchCalls))?;
        let id = match &result {
            Value::String(id) => id.clone(),
            Value::Object(o) => o
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_owned)
                .ok_or_else(|| WalletError::ResponseParse("wallet_sendCalls result without id".to_owned()))?,
            other => {
                return Err(WalletError::ResponseParse(format!(
                    "unexpected wallet_sendCalls result: {other}"
                )))
            }
        };
        Ok(BundleId(id))
    }

    async fn get_calls_status(&self, _account: &Account, bundle_id: &BundleId) -> WalletResult<BundleStatus> {
        if self.kind == BackendKind::PeerRelay {
            return Err(WalletError::unsupported(&self.id, Capability::BatchCalls));
        }
        let result = self
            .provider
            .request("wallet_getCallsStatus", json!([bundle_id.as_str()]))
            .await
            .map_err(|e| self.unsupported_if_unknown(e, Capability::BatchCalls))?;
        parse_calls_status(bundle_id, &result)
    }

    async fn wallet_capabilities(&self, account: &Account, chain_id: u64) -> WalletResult<Option<Value>> {
        match self
            .provider
            .request(
                "wallet_getCapabilities",
                json!([account.address(), [format!("0x{chain_id:x}")]]),
            )
            .await
        {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_method_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn drain_events(&self) -> WalletResult<Vec<ProviderEvent>> {
        Ok(std::mem::take(&mut self.lock()?.events))
    }
}

/// Accepts EIP-5792 numeric codes and the older string statuses.
pub fn parse_calls_status(bundle_id: &BundleId, result: &Value) -> WalletResult<BundleStatus> {
    let status = match result.get("status") {
        Some(Value::Number(n)) => match n.as_u64() {
            Some(100..=199) => BundleState::Pending,
            Some(200..=299) => BundleState::Confirmed,
            Some(400..=699) => BundleState::Failed,
            _ => {
                return Err(WalletError::ResponseParse(format!(
                    "unknown calls status code {n}"
                )))
            }
        },
        Some(Value::String(s)) => match s.to_ascii_uppercase().as_str() {
            "PENDING" => BundleState::Pending,
            "CONFIRMED" | "SUCCESS" => BundleState::Confirmed,
            "FAILED" | "REVERTED" => BundleState::Failed,
            other => {
                return Err(WalletError::ResponseParse(format!(
                    "unknown calls status {other}"
                )))
            }
        },
        _ => {
            return Err(WalletError::ResponseParse(
                "wallet_getCallsStatus result without status".to_owned(),
            ))
        }
    };
    let receipts = match result.get("receipts") {
        Some(Value::Array(items)) => items.iter().map(parse_receipt).collect::<WalletResult<Vec<_>>>()?,
        _ => Vec::new(),
    };
    Ok(BundleStatus {
        id: bundle_id.clone(),
        status,
        receipts,
    })
}

/// Signs by forwarding to the provider; the wallet itself holds the key.
pub struct ProviderSigner {
    provider: Arc<dyn Eip1193Provider>,
    address: Address,
}

impl ProviderSigner {
    async fn signature(&self, method: SignatureMethod, params: Value) -> WalletResult<Bytes> {
        let result = self.provider.request(method.rpc_name(), params).await?;
        result
            .as_str()
            .ok_or_else(|| WalletError::ResponseParse("signature response must be a hex string".to_owned()))?
            .parse()
            .map_err(|e| WalletError::ResponseParse(format!("invalid signature hex: {e}")))
    }
}

#[async_trait]
impl AccountSigner for ProviderSigner {
    async fn sign_message(&self, message: &SignableMessage) -> WalletResult<Bytes> {
        self.signature(
            SignatureMethod::PersonalSign,
            json!([message.to_hex(), self.address]),
        )
        .await
    }

    async fn sign_typed_data(&self, typed_data: &Value) -> WalletResult<Bytes> {
        self.signature(
            SignatureMethod::EthSignTypedDataV4,
            json!([self.address, typed_data.to_string()]),
        )
        .await
    }

    async fn sign_transaction(&self, tx: &TxRequest) -> WalletResult<Bytes> {
        let result = self.provider.request("eth_signTransaction", json!([tx])).await?;
        result
            .as_str()
            .ok_or_else(|| WalletError::ResponseParse("eth_signTransaction must return hex".to_owned()))?
            .parse()
            .map_err(|e| WalletError::ResponseParse(format!("invalid signed transaction: {e}")))
    }

    async fn send_transaction(&self, tx: &TxRequest) -> WalletResult<B256> {
        let result = self.provider.request("eth_sendTransaction", json!([tx])).await?;
        hash(&result, "eth_sendTransaction")
    }

    async fn send_raw_transaction(&self, raw: &Bytes, _chain_id: u64) -> WalletResult<B256> {
        let result = self.provider.request("eth_sendRawTransaction", json!([raw])).await?;
        hash(&result, "eth_sendRawTransaction")
    }
}
