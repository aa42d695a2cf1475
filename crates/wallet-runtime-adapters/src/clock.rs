use wallet_runtime_core::{ClockPort, WalletError, WalletResult};

#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl ClockPort for SystemClock {
    fn now_ms(&self) -> WalletResult<u64> {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_err(|e| WalletError::Transport(format!("time error: {e}")))?;
        Ok(now.as_millis() as u64)
    }
}
