use std::collections::HashMap;

use alloy::primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::auth::{
    AuthResponse, LinkConflictPolicy, LinkOutcome, OAuthCallback, OtpIdentifier,
    PasskeyAssertion, PasskeyChallenge, PasskeyKind, Profile, RelyingParty,
};
use crate::domain::{
    BackendKind, BundleId, BundleStatus, CallReceipt, ConnectOptions, PeerResponse,
    ProviderEvent, SendCallsRequest, Session, SessionNamespace, SessionProposal,
    SignableMessage, TxRequest, WalletId,
};
use crate::error::{WalletError, WalletResult};
use crate::wallet::Account;

pub trait ClockPort: Send + Sync {
    fn now_ms(&self) -> WalletResult<u64>;
}

/// Minimal EIP-1193 surface: one request method over an opaque transport.
#[async_trait]
pub trait Eip1193Provider: Send + Sync {
    async fn request(&self, method: &str, params: Value) -> WalletResult<Value>;
}

/// Signing capability set behind an [`Account`].
#[async_trait]
pub trait AccountSigner: Send + Sync {
    async fn sign_message(&self, message: &SignableMessage) -> WalletResult<Bytes>;

    async fn sign_typed_data(&self, typed_data: &Value) -> WalletResult<Bytes>;

    async fn sign_transaction(&self, tx: &TxRequest) -> WalletResult<Bytes>;

    async fn send_transaction(&self, tx: &TxRequest) -> WalletResult<B256>;

    async fn send_raw_transaction(&self, raw: &Bytes, chain_id: u64) -> WalletResult<B256>;

    /// Submits all transactions atomically. `Ok(None)` means the signer has no
    /// atomic batch and callers should fall back to sequential sends.
    async fn send_batch_transaction(&self, _txs: &[TxRequest]) -> WalletResult<Option<B256>> {
        Ok(None)
    }
}

/// One concrete signing technology behind the uniform wallet contract.
#[async_trait]
pub trait WalletBackend: Send + Sync {
    fn id(&self) -> &WalletId;

    fn kind(&self) -> BackendKind;

    async fn connect(&self, options: ConnectOptions) -> WalletResult<Account>;

    async fn disconnect(&self) -> WalletResult<()>;

    /// Switches the backend to `chain_id` and returns the superseding account.
    async fn switch_chain(&self, account: &Account, chain_id: u64) -> WalletResult<Account>;

    async fn send_calls(
        &self,
        _account: &Account,
        _request: &SendCallsRequest,
    ) -> WalletResult<BundleId> {
        Err(WalletError::unsupported(
            self.id(),
            crate::capability::Capability::BatchCalls,
        ))
    }

    async fn get_calls_status(
        &self,
        _account: &Account,
        _bundle_id: &BundleId,
    ) -> WalletResult<BundleStatus> {
        Err(WalletError::unsupported(
            self.id(),
            crate::capability::Capability::BatchCalls,
        ))
    }

    /// Raw `wallet_getCapabilities` answer, when the backend can ask one.
    async fn wallet_capabilities(
        &self,
        _account: &Account,
        _chain_id: u64,
    ) -> WalletResult<Option<Value>> {
        Ok(None)
    }

    fn drain_events(&self) -> WalletResult<Vec<ProviderEvent>> {
        Ok(Vec::new())
    }
}

#[async_trait]
pub trait ReceiptSource: Send + Sync {
    async fn transaction_receipt(
        &self,
        chain_id: u64,
        tx_hash: B256,
    ) -> WalletResult<Option<CallReceipt>>;
}

#[async_trait]
pub trait BundleStatusSource: Send + Sync {
    async fn bundle_status(&self, bundle_id: &BundleId) -> WalletResult<BundleStatus>;
}

/// New-block push subscription. Unsubscribes exactly once: explicitly via
/// [`BlockSubscription::unsubscribe`] or, failing that, on drop.
pub struct BlockSubscription {
    blocks: mpsc::UnboundedReceiver<u64>,
    on_unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl BlockSubscription {
    pub fn new(
        blocks: mpsc::UnboundedReceiver<u64>,
        on_unsubscribe: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            blocks,
            on_unsubscribe: Some(Box::new(on_unsubscribe)),
        }
    }

    /// Next block number; `None` once the source has closed.
    pub async fn next_block(&mut self) -> Option<u64> {
        self.blocks.recv().await
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        self.blocks.close();
        if let Some(f) = self.on_unsubscribe.take() {
            f();
        }
    }
}

impl Drop for BlockSubscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for BlockSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockSubscription")
            .field("active", &self.on_unsubscribe.is_some())
            .finish()
    }
}

pub trait BlockSource: Send + Sync {
    fn watch_blocks(&self, chain_id: u64) -> WalletResult<BlockSubscription>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectReason {
    pub code: i64,
    pub message: String,
}

impl DisconnectReason {
    pub fn user_disconnected() -> Self {
        Self {
            code: 6000,
            message: "USER_DISCONNECTED".to_owned(),
        }
    }

    pub fn user_rejected() -> Self {
        Self {
            code: 5000,
            message: "USER_REJECTED".to_owned(),
        }
    }
}

/// Wallet side of a session-relay protocol.
#[async_trait]
pub trait PeerRelayPort: Send + Sync {
    /// Approves and waits for the peer's acknowledgement.
    async fn approve_session(
        &self,
        proposal: &SessionProposal,
        namespaces: HashMap<String, SessionNamespace>,
    ) -> WalletResult<Session>;

    async fn reject_session(&self, proposal_id: u64, reason: &DisconnectReason)
        -> WalletResult<()>;

    async fn disconnect_session(&self, topic: &str, reason: &DisconnectReason)
        -> WalletResult<()>;

    async fn respond(&self, topic: &str, response: &PeerResponse) -> WalletResult<()>;
}

/// Backend of the embedded-account authentication flow.
#[async_trait]
pub trait AuthPort: Send + Sync {
    /// Idempotent readiness check (e.g. the communication channel exists).
    async fn ensure_ready(&self) -> WalletResult<()>;

    async fn send_otp(&self, identifier: &OtpIdentifier) -> WalletResult<()>;

    async fn verify_otp(&self, identifier: &OtpIdentifier, code: &str)
        -> WalletResult<AuthResponse>;

    fn oauth_login_url(&self, provider: &str, redirect_url: &str) -> WalletResult<String>;

    async fn oauth_callback(&self, callback: &OAuthCallback) -> WalletResult<AuthResponse>;

    async fn passkey_challenge(
        &self,
        relying_party: &RelyingParty,
        kind: PasskeyKind,
    ) -> WalletResult<PasskeyChallenge>;

    async fn passkey_verify(&self, assertion: &PasskeyAssertion) -> WalletResult<AuthResponse>;

    async fn jwt_login(&self, jwt: &str, encryption_key: &str) -> WalletResult<AuthResponse>;

    async fn auth_endpoint_login(
        &self,
        payload: &str,
        encryption_key: &str,
    ) -> WalletResult<AuthResponse>;

    async fn wallet_address(&self, auth_token: &str) -> WalletResult<Address>;

    async fn linked_profiles(&self, auth_token: &str) -> WalletResult<Vec<Profile>>;

    async fn link_profile(
        &self,
        auth_token: &str,
        new_profile_token: &str,
    ) -> WalletResult<LinkOutcome>;

    async fn resolve_link_conflict(
        &self,
        auth_token: &str,
        new_profile_token: &str,
        policy: LinkConflictPolicy,
    ) -> WalletResult<Vec<Profile>>;

    async fn unlink_profile(&self, auth_token: &str, profile: &Profile)
        -> WalletResult<Vec<Profile>>;

    async fn logout(&self, auth_token: &str) -> WalletResult<()>;
}
