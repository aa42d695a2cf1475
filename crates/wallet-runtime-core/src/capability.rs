//! Capability table: which operations each backend kind supports and how
//! they are routed. Dispatch is a lookup on [`BackendKind`], never a chain of
//! wallet-identity checks.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::BackendKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    SignMessage,
    SignTypedData,
    SignTransaction,
    SendTransaction,
    SendRawTransaction,
    SwitchChain,
    /// EIP-5792 `wallet_sendCalls` / `wallet_getCallsStatus`.
    BatchCalls,
    AtomicBatch,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::SignMessage => "message signing",
            Capability::SignTypedData => "typed data signing",
            Capability::SignTransaction => "transaction signing",
            Capability::SendTransaction => "sending transactions",
            Capability::SendRawTransaction => "sending raw transactions",
            Capability::SwitchChain => "chain switching",
            Capability::BatchCalls => "EIP-5792 batched calls",
            Capability::AtomicBatch => "atomic batches",
        };
        f.write_str(name)
    }
}

/// How `sendCalls` / `getCallsStatus` reach a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallsRoute {
    /// Embedded and smart accounts: calls become account transactions, status from receipts.
    AccountBundler,
    /// Vendor SDK exposes its own batched-call entry point.
    VendorSdk,
    /// Generic EIP-1193 provider request; unknown-method errors become capability errors.
    ProviderRpc,
    /// The protocol does not define batched calls for this backend.
    Declined,
}

impl BackendKind {
    pub fn calls_route(self) -> CallsRoute {
        match self {
            BackendKind::Embedded | BackendKind::SmartAccount => CallsRoute::AccountBundler,
            BackendKind::VendorSdk => CallsRoute::VendorSdk,
            BackendKind::PeerRelay => CallsRoute::Declined,
            BackendKind::Injected => CallsRoute::ProviderRpc,
        }
    }

    pub fn capabilities(self) -> &'static [Capability] {
        static SIGNING: [Capability; 6] = [
            Capability::SignMessage,
            Capability::SignTypedData,
            Capability::SignTransaction,
            Capability::SendTransaction,
            Capability::SendRawTransaction,
            Capability::SwitchChain,
        ];
        static SIGNING_WITH_BATCHES: [Capability; 7] = [
            Capability::SignMessage,
            Capability::SignTypedData,
            Capability::SignTransaction,
            Capability::SendTransaction,
            Capability::SendRawTransaction,
            Capability::SwitchChain,
            Capability::BatchCalls,
        ];
        // Contract accounts only send through their own entry point.
        static CONTRACT_ACCOUNT: [Capability; 6] = [
            Capability::SignMessage,
            Capability::SignTypedData,
            Capability::SendTransaction,
            Capability::SwitchChain,
            Capability::BatchCalls,
            Capability::AtomicBatch,
        ];
        match self {
            BackendKind::Injected | BackendKind::Embedded => &SIGNING_WITH_BATCHES,
            BackendKind::PeerRelay => &SIGNING,
            BackendKind::SmartAccount => &CONTRACT_ACCOUNT,
            BackendKind::VendorSdk => &CONTRACT_ACCOUNT[..5],
        }
    }

    pub fn supports(self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }
}
