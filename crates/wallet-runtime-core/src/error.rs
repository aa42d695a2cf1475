use thiserror::Error;

use crate::capability::Capability;
use crate::domain::{BundleId, WalletId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WalletError {
    #[error("no active account: connect a wallet first")]
    NoActiveAccount,
    #[error("{wallet} does not support {capability}; contact the wallet provider for support")]
    CapabilityUnsupported {
        wallet: WalletId,
        capability: Capability,
    },
    #[error("malformed peer proposal: {0}")]
    MalformedPeerProposal(String),
    #[error("unsupported peer request method: {0}")]
    UnsupportedMethod(String),
    #[error("auth challenge expired for {0}: restart login")]
    AuthChallengeExpired(String),
    #[error("auth challenge rejected for {0}: retry with the correct code")]
    AuthChallengeInvalid(String),
    #[error("profile link conflict: {0}")]
    AuthLinkConflict(String),
    #[error("auth error: {0}")]
    Auth(String),
    #[error("bundle {bundle_id} on chain {chain_id} not confirmed after {blocks} blocks")]
    BundleTimeout {
        chain_id: u64,
        bundle_id: BundleId,
        blocks: u64,
    },
    #[error("{backend} returned http status {status}")]
    HttpTransport { backend: String, status: u16 },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("response parse error: {0}")]
    ResponseParse(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("illegal transition: {0}")]
    IllegalTransition(String),
}

impl WalletError {
    pub fn unsupported(wallet: &WalletId, capability: Capability) -> Self {
        Self::CapabilityUnsupported {
            wallet: wallet.clone(),
            capability,
        }
    }

    /// True when the caller may retry the same step without restarting the flow.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            WalletError::AuthChallengeInvalid(_)
                | WalletError::Transport(_)
                | WalletError::HttpTransport { .. }
        )
    }

    /// JSON-RPC "method not found", or the message variants wallets use for it.
    pub fn is_method_not_found(&self) -> bool {
        match self {
            WalletError::Rpc { code, message } => {
                let lower = message.to_ascii_lowercase();
                *code == -32601
                    || lower.contains("method not found")
                    || lower.contains("does not exist")
                    || lower.contains("not supported")
                    || lower.contains("unsupported method")
            }
            _ => false,
        }
    }
}

pub type WalletResult<T> = Result<T, WalletError>;
