use wallet_runtime_core::{AuthSettings, WaitOptions, DEFAULT_MAX_BLOCKS_WAIT_TIME};

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub rpc_url: String,
    pub rpc_timeout_ms: u64,
    pub rpc_batch_max_size: usize,
    pub block_poll_interval_ms: u64,
    pub max_blocks_wait_time: u64,
    pub auth_base_url: String,
    pub enclave_base_url: String,
    pub otp_challenge_ttl_ms: u64,
    pub otp_max_attempts: u32,
    pub client_id: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8545".to_owned(),
            rpc_timeout_ms: 15_000,
            rpc_batch_max_size: 100,
            block_poll_interval_ms: 2_000,
            max_blocks_wait_time: DEFAULT_MAX_BLOCKS_WAIT_TIME,
            auth_base_url: "http://127.0.0.1:8700".to_owned(),
            enclave_base_url: "http://127.0.0.1:8700".to_owned(),
            otp_challenge_ttl_ms: 10 * 60 * 1000,
            otp_max_attempts: 5,
            client_id: "wallet-runtime".to_owned(),
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by `WALLET_RUNTIME_*` variables. Unparseable
    /// numeric values keep the default.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        let text = |key: &str, default: String| -> String {
            lookup(key)
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty())
                .unwrap_or(default)
        };
        Self {
            rpc_url: text("WALLET_RUNTIME_RPC_URL", d.rpc_url),
            rpc_timeout_ms: number(&lookup, "WALLET_RUNTIME_RPC_TIMEOUT_MS", d.rpc_timeout_ms),
            rpc_batch_max_size: number(
                &lookup,
                "WALLET_RUNTIME_RPC_BATCH_MAX_SIZE",
                d.rpc_batch_max_size,
            )
            .max(1),
            block_poll_interval_ms: number(
                &lookup,
                "WALLET_RUNTIME_BLOCK_POLL_INTERVAL_MS",
                d.block_poll_interval_ms,
            )
            .max(1),
            max_blocks_wait_time: number(
                &lookup,
                "WALLET_RUNTIME_MAX_BLOCKS_WAIT_TIME",
                d.max_blocks_wait_time,
            )
            .max(1),
            auth_base_url: text("WALLET_RUNTIME_AUTH_BASE_URL", d.auth_base_url),
            enclave_base_url: text("WALLET_RUNTIME_ENCLAVE_BASE_URL", d.enclave_base_url),
            otp_challenge_ttl_ms: number(
                &lookup,
                "WALLET_RUNTIME_OTP_CHALLENGE_TTL_MS",
                d.otp_challenge_ttl_ms,
            ),
            otp_max_attempts: number(&lookup, "WALLET_RUNTIME_OTP_MAX_ATTEMPTS", d.otp_max_attempts)
                .max(1),
            client_id: text("WALLET_RUNTIME_CLIENT_ID", d.client_id),
        }
    }

    pub fn wait_options(&self) -> WaitOptions {
        WaitOptions {
            max_blocks_wait_time: self.max_blocks_wait_time,
        }
    }

    pub fn auth_settings(&self) -> AuthSettings {
        AuthSettings {
            challenge_ttl_ms: self.otp_challenge_ttl_ms,
            max_attempts: self.otp_max_attempts,
        }
    }
}

fn number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    match lookup(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(key, value = %raw, "ignoring unparseable config value");
                default
            }
        },
        None => default,
    }
}
