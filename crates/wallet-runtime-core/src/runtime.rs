use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::auth::{AuthClientCache, Authenticator};
use crate::capability::{Capability, CallsRoute};
use crate::domain::{BackendKind, BundleId, BundleStatus, ConnectOptions, SendCallsRequest};
use crate::error::{WalletError, WalletResult};
use crate::poller::{BundleWaiter, WaitOptions};
use crate::ports::{BlockSource, BundleStatusSource, WalletBackend};
use crate::wallet::{Account, Wallet};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WalletCapabilities {
    pub wallet: String,
    pub kind: BackendKind,
    pub calls_route: CallsRoute,
    pub declared: Vec<Capability>,
    /// Raw `wallet_getCapabilities` answer from provider-backed wallets.
    pub reported: Option<Value>,
}

/// Owns the state shared across wallets: in-flight bundle waits and the
/// per-client authenticator cache.
pub struct WalletRuntime {
    blocks: Arc<dyn BlockSource>,
    waits: BundleWaiter,
    auth_clients: AuthClientCache,
    wait_defaults: WaitOptions,
}

impl WalletRuntime {
    pub fn new(blocks: Arc<dyn BlockSource>) -> Self {
        Self {
            blocks,
            waits: BundleWaiter::new(),
            auth_clients: AuthClientCache::default(),
            wait_defaults: WaitOptions::default(),
        }
    }

    pub fn with_wait_defaults(mut self, options: WaitOptions) -> Self {
        self.wait_defaults = options;
        self
    }

    pub fn wait_defaults(&self) -> WaitOptions {
        self.wait_defaults
    }

    pub fn in_flight_waits(&self) -> usize {
        self.waits.in_flight()
    }

    pub fn authenticator(
        &self,
        client_id: &str,
        create: impl FnOnce() -> Authenticator,
    ) -> WalletResult<Arc<Authenticator>> {
        self.auth_clients.get_or_create(client_id, create)
    }

    pub fn auth_client_count(&self) -> usize {
        self.auth_clients.len()
    }

    pub async fn connect(&self, wallet: &Wallet, options: ConnectOptions) -> WalletResult<Account> {
        wallet.connect(options).await
    }

    pub fn get_account(&self, wallet: &Wallet) -> Option<Account> {
        wallet.account()
    }

    pub async fn disconnect(&self, wallet: &Wallet) -> WalletResult<()> {
        wallet.disconnect().await
    }

    pub async fn switch_chain(&self, wallet: &Wallet, chain_id: u64) -> WalletResult<Account> {
        wallet.switch_chain(chain_id).await
    }

    pub async fn send_calls(
        &self,
        wallet: &Wallet,
        request: &SendCallsRequest,
    ) -> WalletResult<BundleId> {
        let account = wallet.require_account()?;
        if request.calls.is_empty() {
            return Err(WalletError::Validation("sendCalls needs at least one call".to_owned()));
        }
        route_check(wallet.backend().as_ref())?;
        let bundle_id = wallet.backend().send_calls(&account, request).await?;
        tracing::info!(
            wallet = %wallet.id(),
            chain_id = request.chain_id,
            calls = request.calls.len(),
            bundle_id = %bundle_id,
            "calls submitted"
        );
        Ok(bundle_id)
    }

    pub async fn get_calls_status(
        &self,
        wallet: &Wallet,
        bundle_id: &BundleId,
    ) -> WalletResult<BundleStatus> {
        let account = wallet.require_account()?;
        route_check(wallet.backend().as_ref())?;
        wallet.backend().get_calls_status(&account, bundle_id).await
    }

    /// Resolves when the bundle reaches a terminal status. Concurrent callers
    /// with the same `(chain_id, bundle_id)` share one poll.
    pub async fn wait_for_bundle(
        &self,
        wallet: &Wallet,
        bundle_id: &BundleId,
        chain_id: u64,
        options: Option<WaitOptions>,
    ) -> WalletResult<BundleStatus> {
        let account = wallet.require_account()?;
        route_check(wallet.backend().as_ref())?;
        let source = Arc::new(BackendStatusSource {
            backend: Arc::clone(wallet.backend()),
            account,
        });
        let wait = self.waits.wait(
            chain_id,
            bundle_id.clone(),
            Arc::clone(&self.blocks),
            source,
            options.unwrap_or(self.wait_defaults),
        )?;
        wait.await
    }

    pub async fn get_capabilities(
        &self,
        wallet: &Wallet,
        chain_id: u64,
    ) -> WalletResult<WalletCapabilities> {
        let account = wallet.require_account()?;
        let kind = wallet.kind();
        let reported = wallet
            .backend()
            .wallet_capabilities(&account, chain_id)
            .await
            .unwrap_or_else(|e| {
                tracing::debug!(wallet = %wallet.id(), error = %e, "wallet_getCapabilities failed");
                None
            });
        Ok(WalletCapabilities {
            wallet: wallet.id().to_string(),
            kind,
            calls_route: kind.calls_route(),
            declared: kind.capabilities().to_vec(),
            reported,
        })
    }
}

fn route_check(backend: &dyn WalletBackend) -> WalletResult<()> {
    match backend.kind().calls_route() {
        CallsRoute::Declined => Err(WalletError::unsupported(
            backend.id(),
            Capability::BatchCalls,
        )),
        CallsRoute::AccountBundler | CallsRoute::VendorSdk | CallsRoute::ProviderRpc => Ok(()),
    }
}

struct BackendStatusSource {
    backend: Arc<dyn WalletBackend>,
    account: Account,
}

#[async_trait]
impl BundleStatusSource for BackendStatusSource {
    async fn bundle_status(&self, bundle_id: &BundleId) -> WalletResult<BundleStatus> {
        self.backend.get_calls_status(&self.account, bundle_id).await
    }
}
