pub mod auth_http;
pub mod blocks;
pub mod bundler;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod eip1193;
pub mod embedded;
pub mod rpc;
pub mod smart;
pub mod telemetry;
pub mod vendor;
pub mod walletconnect;

pub use auth_http::HttpAuthClient;
pub use blocks::RpcBlockWatcher;
pub use bundler::AccountBundler;
pub use clock::SystemClock;
pub use config::RuntimeConfig;
pub use crypto::{SealedToken, TokenVault};
pub use eip1193::{parse_calls_status, ProviderSigner, ProviderWallet};
pub use embedded::{EmbeddedWallet, EnclaveSigner, HttpEnclaveClient};
pub use rpc::{ChainRpcs, RpcTransport};
pub use smart::{encode_execute_batch, SmartAccountSigner, SmartAccountWallet};
pub use telemetry::init_tracing;
pub use vendor::{VendorSdk, VendorSdkWallet};
pub use walletconnect::{InMemoryRelay, RelayMessage};
