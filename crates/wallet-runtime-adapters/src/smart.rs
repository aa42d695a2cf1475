//! Contract accounts driven by an owner account through `executeBatch`.

use std::sync::Arc;

use alloy::dyn_abi::{DynSolValue, JsonAbiExt};
use alloy::json_abi::Function;
use alloy::primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use serde_json::Value;

use wallet_runtime_core::{
    Account, AccountSigner, BackendKind, BundleId, BundleStatus, Call, Capability,
    ConnectOptions, SendCallsRequest, SignableMessage, TxRequest, WalletBackend, WalletError,
    WalletId, WalletResult,
};

use crate::bundler::AccountBundler;

pub const EXECUTE_BATCH_SIGNATURE: &str = "executeBatch(address[],uint256[],bytes[])";

/// Calldata for `executeBatch` over `calls`, in order.
pub fn encode_execute_batch(calls: &[Call]) -> WalletResult<Bytes> {
    let function = Function::parse(EXECUTE_BATCH_SIGNATURE)
        .map_err(|e| WalletError::Validation(format!("executeBatch signature: {e}")))?;
    let targets = calls.iter().map(|c| DynSolValue::Address(c.to)).collect();
    let values = calls.iter().map(|c| DynSolValue::Uint(c.value, 256)).collect();
    let payloads = calls
        .iter()
        .map(|c| DynSolValue::Bytes(c.data.to_vec()))
        .collect();
    let encoded = function
        .abi_encode_input(&[
            DynSolValue::Array(targets),
            DynSolValue::Array(values),
            DynSolValue::Array(payloads),
        ])
        .map_err(|e| WalletError::Validation(format!("executeBatch encoding failed: {e}")))?;
    Ok(Bytes::from(encoded))
}

fn call_from_tx(tx: &TxRequest) -> WalletResult<Call> {
    let to = tx
        .to
        .ok_or_else(|| WalletError::Validation("smart account calls need a target".to_owned()))?;
    Ok(Call {
        to,
        value: tx.value.unwrap_or(U256::ZERO),
        data: tx.data.clone().unwrap_or_default(),
    })
}

pub struct SmartAccountSigner {
    owner: Account,
    account_address: Address,
}

impl SmartAccountSigner {
    async fn execute(&self, calls: Vec<Call>, chain_id: u64) -> WalletResult<B256> {
        let outer = TxRequest {
            from: Some(self.owner.address()),
            to: Some(self.account_address),
            data: Some(encode_execute_batch(&calls)?),
            chain_id: Some(chain_id),
            ..TxRequest::default()
        };
        tracing::debug!(
            account = %self.account_address,
            owner = %self.owner.address(),
            calls = calls.len(),
            "executing through smart account"
        );
        self.owner.send_transaction(&outer).await
    }
}

#[async_trait]
impl AccountSigner for SmartAccountSigner {
    async fn sign_message(&self, message: &SignableMessage) -> WalletResult<Bytes> {
        self.owner.sign_message(message).await
    }

    async fn sign_typed_data(&self, typed_data: &Value) -> WalletResult<Bytes> {
        self.owner.sign_typed_data(typed_data).await
    }

    async fn sign_transaction(&self, _tx: &TxRequest) -> WalletResult<Bytes> {
        Err(WalletError::unsupported(
            self.owner.wallet_id(),
            Capability::SignTransaction,
        ))
    }

    async fn send_transaction(&self, tx: &TxRequest) -> WalletResult<B256> {
        let chain_id = tx.chain_id.unwrap_or(self.owner.chain_id());
        self.execute(vec![call_from_tx(tx)?], chain_id).await
    }

    async fn send_raw_transaction(&self, _raw: &Bytes, _chain_id: u64) -> WalletResult<B256> {
        Err(WalletError::unsupported(
            self.owner.wallet_id(),
            Capability::SendRawTransaction,
        ))
    }

    async fn send_batch_transaction(&self, txs: &[TxRequest]) -> WalletResult<Option<B256>> {
        let Some(first) = txs.first() else {
            return Err(WalletError::Validation("empty batch".to_owned()));
        };
        let chain_id = first.chain_id.unwrap_or(self.owner.chain_id());
        let calls = txs.iter().map(call_from_tx).collect::<WalletResult<Vec<_>>>()?;
        self.execute(calls, chain_id).await.map(Some)
    }
}

pub struct SmartAccountWallet {
    id: WalletId,
    owner: Account,
    account_address: Address,
    bundler: AccountBundler,
}

impl std::fmt::Debug for SmartAccountWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmartAccountWallet")
            .field("id", &self.id)
            .field("account_address", &self.account_address)
            .field("owner", &self.owner.address())
            .finish()
    }
}

impl SmartAccountWallet {
    /// `owner` must already be connected; the smart account inherits its chain
    /// unless the connect options name another.
    pub fn new(owner: Account, account_address: Address, bundler: AccountBundler) -> Self {
        Self {
            id: WalletId::new("smart"),
            owner,
            account_address,
            bundler,
        }
    }

    pub fn account_address(&self) -> Address {
        self.account_address
    }

    fn account_for(&self, chain_id: u64) -> Account {
        let signer = SmartAccountSigner {
            owner: self.owner.on_chain(chain_id),
            account_address: self.account_address,
        };
        Account::new(
            self.account_address,
            chain_id,
            self.id.clone(),
            BackendKind::SmartAccount,
            Arc::new(signer),
        )
    }
}

#[async_trait]
impl WalletBackend for SmartAccountWallet {
    fn id(&self) -> &WalletId {
        &self.id
    }

    fn kind(&self) -> BackendKind {
        BackendKind::SmartAccount
    }

    async fn connect(&self, options: ConnectOptions) -> WalletResult<Account> {
        Ok(self.account_for(options.chain_id.unwrap_or(self.owner.chain_id())))
    }

    async fn disconnect(&self) -> WalletResult<()> {
        Ok(())
    }

    async fn switch_chain(&self, _account: &Account, chain_id: u64) -> WalletResult<Account> {
        Ok(self.account_for(chain_id))
    }

    async fn send_calls(
        &self,
        account: &Account,
        request: &SendCallsRequest,
    ) -> WalletResult<BundleId> {
        self.bundler.send_calls(account, request).await
    }

    async fn get_calls_status(
        &self,
        _account: &Account,
        bundle_id: &BundleId,
    ) -> WalletResult<BundleStatus> {
        self.bundler.status(bundle_id).await
    }
}
