//! Bundle submission for accounts without a native `wallet_sendCalls`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use alloy::primitives::B256;

use wallet_runtime_core::{
    Account, BundleId, BundleState, BundleStatus, CallBundle, ReceiptSource, SendCallsRequest,
    TxRequest, WalletError, WalletResult,
};

#[derive(Debug, Clone)]
struct TrackedBundle {
    bundle: CallBundle,
    hashes: Vec<B256>,
}

/// Sends a bundle as one atomic transaction when the account has one, or as
/// sequential transactions otherwise, and derives status from receipts.
#[derive(Clone)]
pub struct AccountBundler {
    receipts: Arc<dyn ReceiptSource>,
    bundles: Arc<Mutex<HashMap<BundleId, TrackedBundle>>>,
}

impl AccountBundler {
    pub fn new(receipts: Arc<dyn ReceiptSource>) -> Self {
        Self {
            receipts,
            bundles: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock(&self) -> WalletResult<MutexGuard<'_, HashMap<BundleId, TrackedBundle>>> {
        self.bundles
            .lock()
            .map_err(|e| WalletError::Transport(format!("bundler lock poisoned: {e}")))
    }

    pub async fn send_calls(
        &self,
        account: &Account,
        request: &SendCallsRequest,
    ) -> WalletResult<BundleId> {
        if request.chain_id != account.chain_id() {
            return Err(WalletError::Validation(format!(
                "bundle targets chain {} but the account is on chain {}; switch chain first",
                request.chain_id,
                account.chain_id()
            )));
        }
        let txs: Vec<TxRequest> = request
            .calls
            .iter()
            .map(|c| c.to_tx_request(account.address(), request.chain_id))
            .collect();

        let hashes = match account.send_batch_transaction(&txs).await? {
            Some(hash) => vec![hash],
            None => {
                let mut hashes = Vec::with_capacity(txs.len());
                for tx in &txs {
                    hashes.push(account.send_transaction(tx).await?);
                }
                hashes
            }
        };

        let id = random_bundle_id()?;
        tracing::debug!(
            bundle_id = %id,
            chain_id = request.chain_id,
            transactions = hashes.len(),
            "bundle submitted"
        );
        self.lock()?.insert(
            id.clone(),
            TrackedBundle {
                bundle: CallBundle {
                    id: id.clone(),
                    chain_id: request.chain_id,
                    calls: request.calls.clone(),
                },
                hashes,
            },
        );
        Ok(id)
    }

    pub fn bundle(&self, bundle_id: &BundleId) -> WalletResult<Option<CallBundle>> {
        Ok(self.lock()?.get(bundle_id).map(|t| t.bundle.clone()))
    }

    /// Any missing receipt keeps the bundle pending; any reverted receipt
    /// fails it.
    pub async fn status(&self, bundle_id: &BundleId) -> WalletResult<BundleStatus> {
        let tracked = self
            .lock()?
            .get(bundle_id)
            .cloned()
            .ok_or_else(|| WalletError::NotFound(format!("unknown bundle {bundle_id}")))?;

        let mut receipts = Vec::with_capacity(tracked.hashes.len());
        for hash in &tracked.hashes {
            match self
                .receipts
                .transaction_receipt(tracked.bundle.chain_id, *hash)
                .await?
            {
                Some(receipt) => receipts.push(receipt),
                None => return Ok(BundleStatus::pending(bundle_id.clone())),
            }
        }
        let status = if receipts.iter().all(|r| r.success) {
            BundleState::Confirmed
        } else {
            BundleState::Failed
        };
        Ok(BundleStatus {
            id: bundle_id.clone(),
            status,
            receipts,
        })
    }
}

fn random_bundle_id() -> WalletResult<BundleId> {
    let mut raw = [0u8; 32];
    getrandom::getrandom(&mut raw)
        .map_err(|e| WalletError::Transport(format!("bundle id generation failed: {e}")))?;
    Ok(BundleId::from(B256::from(raw)))
}
