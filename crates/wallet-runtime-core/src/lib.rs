pub mod auth;
pub mod capability;
pub mod domain;
pub mod error;
pub mod poller;
pub mod ports;
pub mod runtime;
pub mod session;
pub mod state_machine;
pub mod wallet;

pub use auth::{
    AuthClientCache, AuthLoginReturn, AuthResponse, AuthSettings, AuthState, AuthStrategy,
    AuthUser, Authenticator, LinkConflictPolicy, LinkOutcome, LoginRequest, OAuthCallback,
    OtpIdentifier, PasskeyAssertion, PasskeyChallenge, PasskeyKind, PendingChallenge, Profile,
    RelyingParty,
};
pub use capability::{CallsRoute, Capability};
pub use domain::{
    parse_quantity, BackendKind, BundleId, BundleState, BundleStatus, Call, CallBundle,
    CallReceipt, ConnectOptions, PeerMetadata, PeerResponse, PeerRpcRequest, ProposalNamespace,
    ProviderEvent, ProviderEventKind, SendCallsRequest, Session, SessionNamespace,
    SessionProposal, SessionRequest, SignableMessage, SignatureMethod, TimestampMs, TxRequest,
    WalletId,
};
pub use error::{WalletError, WalletResult};
pub use poller::{BundleWait, BundleWaiter, WaitOptions, DEFAULT_MAX_BLOCKS_WAIT_TIME};
pub use ports::{
    AccountSigner, AuthPort, BlockSource, BlockSubscription, BundleStatusSource, ClockPort,
    DisconnectReason, Eip1193Provider, PeerRelayPort, ReceiptSource, WalletBackend,
};
pub use runtime::{WalletCapabilities, WalletRuntime};
pub use session::{negotiate_namespaces, parse_namespaced_chain_id, PeerMethod, PeerSessionManager};
pub use state_machine::{
    auth_transition, bundle_transition, AuthAction, AuthLevel, AuthStage, StateTransition,
};
pub use wallet::{Account, Wallet};
