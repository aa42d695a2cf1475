use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use wallet_runtime_core::{BlockSource, BlockSubscription, WalletError, WalletResult};

use crate::rpc::RpcTransport;

/// Turns `eth_blockNumber` polling into a push subscription. The first
/// reading is the baseline and is never emitted; every later block number is
/// emitted once, including blocks skipped between two polls.
#[derive(Debug, Clone)]
pub struct RpcBlockWatcher {
    chains: HashMap<u64, Arc<RpcTransport>>,
    interval: Duration,
}

impl RpcBlockWatcher {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            chains: HashMap::new(),
            interval: Duration::from_millis(interval_ms.max(1)),
        }
    }

    pub fn with_chain(mut self, chain_id: u64, rpc: Arc<RpcTransport>) -> Self {
        self.chains.insert(chain_id, rpc);
        self
    }
}

impl BlockSource for RpcBlockWatcher {
    fn watch_blocks(&self, chain_id: u64) -> WalletResult<BlockSubscription> {
        let rpc = self
            .chains
            .get(&chain_id)
            .cloned()
            .ok_or_else(|| WalletError::NotFound(format!("no rpc configured for chain {chain_id}")))?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| WalletError::Transport(format!("block watcher needs a tokio runtime: {e}")))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let interval = self.interval;
        let task = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut last: Option<u64> = None;
            loop {
                ticker.tick().await;
                if tx.is_closed() {
                    break;
                }
                let current = match rpc.block_number().await {
                    Ok(n) => n,
                    Err(e) => {
                        tracing::debug!(chain_id, error = %e, "block number poll failed");
                        continue;
                    }
                };
                match last {
                    None => {
                        tracing::debug!(chain_id, baseline = current, "block watcher started");
                        last = Some(current);
                    }
                    Some(prev) if current > prev => {
                        for block in prev + 1..=current {
                            if tx.send(block).is_err() {
                                return;
                            }
                        }
                        last = Some(current);
                    }
                    Some(_) => {}
                }
            }
        });

        Ok(BlockSubscription::new(rx, move || {
            tracing::debug!(chain_id, "block watcher stopped");
            task.abort();
        }))
    }
}
