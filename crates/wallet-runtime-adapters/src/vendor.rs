//! Wallets whose vendor SDK owns bundling.

use std::sync::Arc;

use alloy::primitives::Address;
use async_trait::async_trait;
use serde_json::Value;

use wallet_runtime_core::{
    Account, BackendKind, BundleId, BundleStatus, ConnectOptions, Eip1193Provider,
    ProviderEvent, SendCallsRequest, WalletBackend, WalletId, WalletResult,
};

use crate::eip1193::ProviderWallet;

/// Surface a vendor SDK exposes: a provider-style request channel plus its own
/// bundle submission and status lookup.
#[async_trait]
pub trait VendorSdk: Send + Sync {
    fn wallet_id(&self) -> &str;

    async fn request(&self, method: &str, params: Value) -> WalletResult<Value>;

    async fn send_calls(&self, from: Address, request: &SendCallsRequest) -> WalletResult<BundleId>;

    async fn calls_status(&self, bundle_id: &BundleId) -> WalletResult<BundleStatus>;
}

struct SdkProvider {
    sdk: Arc<dyn VendorSdk>,
}

#[async_trait]
impl Eip1193Provider for SdkProvider {
    async fn request(&self, method: &str, params: Value) -> WalletResult<Value> {
        self.sdk.request(method, params).await
    }
}

pub struct VendorSdkWallet {
    inner: ProviderWallet,
    sdk: Arc<dyn VendorSdk>,
}

impl std::fmt::Debug for VendorSdkWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VendorSdkWallet")
            .field("id", self.inner.id())
            .finish()
    }
}

impl VendorSdkWallet {
    pub fn new<S: VendorSdk + 'static>(sdk: S) -> Self {
        let sdk: Arc<dyn VendorSdk> = Arc::new(sdk);
        let provider = Arc::new(SdkProvider {
            sdk: Arc::clone(&sdk),
        });
        let inner = ProviderWallet::with_kind(
            WalletId::new(sdk.wallet_id()),
            BackendKind::VendorSdk,
            provider,
        );
        Self { inner, sdk }
    }
}

#[async_trait]
impl WalletBackend for VendorSdkWallet {
    fn id(&self) -> &WalletId {
        self.inner.id()
    }

    fn kind(&self) -> BackendKind {
        BackendKind::VendorSdk
    }

    async fn connect(&self, options: ConnectOptions) -> WalletResult<Account> {
        self.inner.connect(options).await
    }

    async fn disconnect(&self) -> WalletResult<()> {
        self.inner.disconnect().await
    }

    async fn switch_chain(&self, account: &Account, chain_id: u64) -> WalletResult<Account> {
        self.inner.switch_chain(account, chain_id).await
    }

    async fn send_calls(
        &self,
        account: &Account,
        request: &SendCallsRequest,
    ) -> WalletResult<BundleId> {
        self.sdk.send_calls(account.address(), request).await
    }

    async fn get_calls_status(
        &self,
        _account: &Account,
        bundle_id: &BundleId,
    ) -> WalletResult<BundleStatus> {
        self.sdk.calls_status(bundle_id).await
    }

    fn drain_events(&self) -> WalletResult<Vec<ProviderEvent>> {
        self.inner.drain_events()
    }
}
