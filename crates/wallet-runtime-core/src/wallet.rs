//! Wallet/Account dispatch layer.

use std::fmt;
use std::sync::{Arc, RwLock};

use alloy::primitives::{Address, Bytes, B256};
use serde_json::Value;

use crate::capability::Capability;
use crate::domain::{BackendKind, ConnectOptions, SignableMessage, TxRequest, WalletId};
use crate::error::{WalletError, WalletResult};
use crate::ports::{AccountSigner, WalletBackend};

/// Address-bearing signer. Never mutated: reconnects and chain switches
/// produce a new `Account`.
#[derive(Clone)]
pub struct Account {
    address: Address,
    chain_id: u64,
    wallet_id: WalletId,
    kind: BackendKind,
    signer: Arc<dyn AccountSigner>,
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("address", &self.address)
            .field("chain_id", &self.chain_id)
            .field("wallet_id", &self.wallet_id)
            .field("kind", &self.kind)
            .finish()
    }
}

impl Account {
    pub fn new(
        address: Address,
        chain_id: u64,
        wallet_id: WalletId,
        kind: BackendKind,
        signer: Arc<dyn AccountSigner>,
    ) -> Self {
        Self {
            address,
            chain_id,
            wallet_id,
            kind,
            signer,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn wallet_id(&self) -> &WalletId {
        &self.wallet_id
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    /// Same signer bound to another chain.
    pub fn on_chain(&self, chain_id: u64) -> Self {
        Self {
            chain_id,
            ..self.clone()
        }
    }

    fn require(&self, capability: Capability) -> WalletResult<()> {
        if self.kind.supports(capability) {
            Ok(())
        } else {
            Err(WalletError::unsupported(&self.wallet_id, capability))
        }
    }

    pub async fn sign_message(&self, message: &SignableMessage) -> WalletResult<Bytes> {
        self.require(Capability::SignMessage)?;
        self.signer.sign_message(message).await
    }

    pub async fn sign_typed_data(&self, typed_data: &Value) -> WalletResult<Bytes> {
        self.require(Capability::SignTypedData)?;
        self.signer.sign_typed_data(typed_data).await
    }

    pub async fn sign_transaction(&self, tx: &TxRequest) -> WalletResult<Bytes> {
        self.require(Capability::SignTransaction)?;
        self.signer.sign_transaction(&self.fill(tx)).await
    }

    pub async fn send_transaction(&self, tx: &TxRequest) -> WalletResult<B256> {
        self.require(Capability::SendTransaction)?;
        self.signer.send_transaction(&self.fill(tx)).await
    }

    pub async fn send_raw_transaction(&self, raw: &Bytes, chain_id: u64) -> WalletResult<B256> {
        self.require(Capability::SendRawTransaction)?;
        self.signer.send_raw_transaction(raw, chain_id).await
    }

    pub async fn send_batch_transaction(&self, txs: &[TxRequest]) -> WalletResult<Option<B256>> {
        if !self.kind.supports(Capability::AtomicBatch) {
            return Ok(None);
        }
        let filled: Vec<TxRequest> = txs.iter().map(|tx| self.fill(tx)).collect();
        self.signer.send_batch_transaction(&filled).await
    }

    fn fill(&self, tx: &TxRequest) -> TxRequest {
        let mut tx = tx.clone();
        tx.from.get_or_insert(self.address);
        tx.chain_id.get_or_insert(self.chain_id);
        tx
    }
}

/// Connection-lifecycle object: one backend, zero or one account.
pub struct Wallet {
    backend: Arc<dyn WalletBackend>,
    account: RwLock<Option<Account>>,
}

impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wallet")
            .field("id", self.backend.id())
            .field("kind", &self.backend.kind())
            .finish()
    }
}

impl Wallet {
    pub fn new(backend: Arc<dyn WalletBackend>) -> Self {
        Self {
            backend,
            account: RwLock::new(None),
        }
    }

    pub fn id(&self) -> &WalletId {
        self.backend.id()
    }

    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn backend(&self) -> &Arc<dyn WalletBackend> {
        &self.backend
    }

    pub async fn connect(&self, options: ConnectOptions) -> WalletResult<Account> {
        let account = self.backend.connect(options).await?;
        tracing::info!(
            wallet = %self.id(),
            address = %account.address(),
            chain_id = account.chain_id(),
            "wallet connected"
        );
        self.replace_account(Some(account.clone()))?;
        Ok(account)
    }

    pub fn account(&self) -> Option<Account> {
        self.account.read().ok().and_then(|g| g.clone())
    }

    /// Active account or `NoActiveAccount`; never touches the network.
    pub fn require_account(&self) -> WalletResult<Account> {
        self.account().ok_or(WalletError::NoActiveAccount)
    }

    pub async fn disconnect(&self) -> WalletResult<()> {
        let previous = self.replace_account(None)?;
        if previous.is_none() {
            return Ok(());
        }
        tracing::info!(wallet = %self.id(), "wallet disconnected");
        self.backend.disconnect().await
    }

    pub async fn switch_chain(&self, chain_id: u64) -> WalletResult<Account> {
        let current = self.require_account()?;
        if current.chain_id() == chain_id {
            return Ok(current);
        }
        if !self.kind().supports(Capability::SwitchChain) {
            return Err(WalletError::unsupported(self.id(), Capability::SwitchChain));
        }
        let next = self.backend.switch_chain(&current, chain_id).await?;
        tracing::info!(
            wallet = %self.id(),
            from = current.chain_id(),
            to = next.chain_id(),
            "wallet switched chain"
        );
        self.replace_account(Some(next.clone()))?;
        Ok(next)
    }

    fn replace_account(&self, next: Option<Account>) -> WalletResult<Option<Account>> {
        let mut g = self
            .account
            .write()
            .map_err(|e| WalletError::Transport(format!("wallet lock poisoned: {e}")))?;
        Ok(std::mem::replace(&mut *g, next))
    }
}
