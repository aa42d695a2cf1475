//! Block-driven bundle confirmation with per-key deduplication.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};

use crate::domain::{BundleId, BundleState, BundleStatus};
use crate::error::{WalletError, WalletResult};
use crate::ports::{BlockSource, BundleStatusSource};
use crate::state_machine::bundle_transition;

pub const DEFAULT_MAX_BLOCKS_WAIT_TIME: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    pub max_blocks_wait_time: u64,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            max_blocks_wait_time: DEFAULT_MAX_BLOCKS_WAIT_TIME,
        }
    }
}

pub type WaitKey = (u64, BundleId);

/// Settles once for every caller that asked for the same key.
pub type BundleWait = Shared<BoxFuture<'static, WalletResult<BundleStatus>>>;

type InFlight = Arc<Mutex<HashMap<WaitKey, BundleWait>>>;

// A panic elsewhere must not wedge every later wait.
fn lock_in_flight(in_flight: &InFlight) -> MutexGuard<'_, HashMap<WaitKey, BundleWait>> {
    in_flight.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes the in-flight entry when the poll task ends, whether it settled,
/// failed or panicked.
struct InFlightEntry {
    in_flight: InFlight,
    key: WaitKey,
}

impl Drop for InFlightEntry {
    fn drop(&mut self) {
        lock_in_flight(&self.in_flight).remove(&self.key);
    }
}

/// In-flight waits keyed by `(chain_id, bundle_id)`. Entries are inserted
/// before the first suspension point and removed exactly once when the wait
/// settles.
#[derive(Default, Clone)]
pub struct BundleWaiter {
    in_flight: InFlight,
}

impl BundleWaiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_flight(&self) -> usize {
        lock_in_flight(&self.in_flight).len()
    }

    /// Joins the wait already running for this key, or starts one. The poll
    /// runs on its own task: dropping the returned future does not stop it,
    /// and the block subscription is released when it settles.
    pub fn wait(
        &self,
        chain_id: u64,
        bundle_id: BundleId,
        blocks: Arc<dyn BlockSource>,
        status: Arc<dyn BundleStatusSource>,
        options: WaitOptions,
    ) -> WalletResult<BundleWait> {
        let key: WaitKey = (chain_id, bundle_id.clone());
        let mut g = lock_in_flight(&self.in_flight);
        if let Some(existing) = g.get(&key) {
            tracing::debug!(chain_id, bundle_id = %bundle_id, "joining in-flight bundle wait");
            return Ok(existing.clone());
        }

        let subscription = blocks.watch_blocks(chain_id)?;
        let entry = InFlightEntry {
            in_flight: Arc::clone(&self.in_flight),
            key: key.clone(),
        };
        let task = tokio::spawn(async move {
            let _entry = entry;
            poll_until_settled(
                chain_id,
                bundle_id,
                subscription,
                status,
                options.max_blocks_wait_time,
            )
            .await
        });

        let wait: BundleWait = async move {
            task.await.unwrap_or_else(|e| {
                Err(WalletError::Transport(format!("bundle wait task failed: {e}")))
            })
        }
        .boxed()
        .shared();
        g.insert(key, wait.clone());
        Ok(wait)
    }
}

async fn poll_until_settled(
    chain_id: u64,
    bundle_id: BundleId,
    mut subscription: crate::ports::BlockSubscription,
    status: Arc<dyn BundleStatusSource>,
    max_blocks_wait_time: u64,
) -> WalletResult<BundleStatus> {
    let mut blocks_waited: u64 = 0;
    let mut last = BundleState::Pending;

    while let Some(block) = subscription.next_block().await {
        match status.bundle_status(&bundle_id).await {
            Ok(observed) => {
                let transition = bundle_transition(last, observed.status)?;
                last = transition.to;
                if observed.status.is_terminal() {
                    subscription.unsubscribe();
                    tracing::info!(
                        chain_id,
                        bundle_id = %bundle_id,
                        block,
                        status = ?observed.status,
                        "bundle settled"
                    );
                    return Ok(observed);
                }
            }
            Err(e) => {
                tracing::debug!(
                    chain_id,
                    bundle_id = %bundle_id,
                    block,
                    error = %e,
                    "bundle status query failed; retrying next block"
                );
            }
        }

        blocks_waited += 1;
        if blocks_waited >= max_blocks_wait_time {
            subscription.unsubscribe();
            tracing::warn!(
                chain_id,
                bundle_id = %bundle_id,
                blocks = blocks_waited,
                "bundle wait timed out"
            );
            return Err(WalletError::BundleTimeout {
                chain_id,
                bundle_id,
                blocks: blocks_waited,
            });
        }
    }

    subscription.unsubscribe();
    Err(WalletError::Transport(format!(
        "block subscription for chain {chain_id} closed before bundle {bundle_id} settled"
    )))
}
