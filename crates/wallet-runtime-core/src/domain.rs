use std::collections::HashMap;
use std::fmt;

use alloy::primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimestampMs(pub u64);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WalletId(pub String);

impl WalletId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WalletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Injected,
    PeerRelay,
    Embedded,
    SmartAccount,
    VendorSdk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignatureMethod {
    PersonalSign,
    EthSignTypedDataV4,
}

impl SignatureMethod {
    pub fn rpc_name(self) -> &'static str {
        match self {
            SignatureMethod::PersonalSign => "personal_sign",
            SignatureMethod::EthSignTypedDataV4 => "eth_signTypedData_v4",
        }
    }
}

/// Message payload handed to a signer. Hex input from peers decodes to `Raw`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignableMessage {
    Text(String),
    Raw(Bytes),
}

impl SignableMessage {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            SignableMessage::Text(s) => s.as_bytes(),
            SignableMessage::Raw(b) => b.as_ref(),
        }
    }

    /// Wire form used by `personal_sign`: always 0x-prefixed hex.
    pub fn to_hex(&self) -> String {
        format!("0x{}", alloy::hex::encode(self.as_bytes()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Bytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "opt_quantity")]
    pub chain_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    pub to: Address,
    #[serde(default)]
    pub value: U256,
    #[serde(default)]
    pub data: Bytes,
}

impl Call {
    pub fn to_tx_request(&self, from: Address, chain_id: u64) -> TxRequest {
        TxRequest {
            from: Some(from),
            to: Some(self.to),
            value: Some(self.value),
            data: Some(self.data.clone()),
            chain_id: Some(chain_id),
            ..TxRequest::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BundleId(pub String);

impl BundleId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BundleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<B256> for BundleId {
    fn from(value: B256) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendCallsRequest {
    pub chain_id: u64,
    pub calls: Vec<Call>,
    /// EIP-5792 capabilities (paymaster service and friends), passed through untouched.
    #[serde(default)]
    pub capabilities: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallBundle {
    pub id: BundleId,
    pub chain_id: u64,
    pub calls: Vec<Call>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BundleState {
    Pending,
    Confirmed,
    Failed,
}

impl BundleState {
    pub fn is_terminal(self) -> bool {
        matches!(self, BundleState::Confirmed | BundleState::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallReceipt {
    pub transaction_hash: B256,
    pub block_number: u64,
    pub gas_used: u64,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleStatus {
    pub id: BundleId,
    pub status: BundleState,
    pub receipts: Vec<CallReceipt>,
}

impl BundleStatus {
    pub fn pending(id: BundleId) -> Self {
        Self {
            id,
            status: BundleState::Pending,
            receipts: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderEventKind {
    AccountsChanged,
    ChainChanged,
    Disconnect,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEvent {
    pub sequence: u64,
    pub kind: ProviderEventKind,
    pub value: String,
}

#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    pub chain_id: Option<u64>,
    pub login: Option<crate::auth::LoginRequest>,
}

impl ConnectOptions {
    pub fn on_chain(chain_id: u64) -> Self {
        Self {
            chain_id: Some(chain_id),
            login: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerMetadata {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icons: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalNamespace {
    #[serde(default)]
    pub chains: Option<Vec<String>>,
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub events: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionProposal {
    pub id: u64,
    pub proposer: PeerMetadata,
    #[serde(default)]
    pub required_namespaces: HashMap<String, ProposalNamespace>,
    #[serde(default)]
    pub optional_namespaces: HashMap<String, ProposalNamespace>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionNamespace {
    pub chains: Vec<String>,
    pub accounts: Vec<String>,
    pub methods: Vec<String>,
    pub events: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub topic: String,
    pub peer: PeerMetadata,
    pub namespaces: HashMap<String, SessionNamespace>,
    pub expiry: TimestampMs,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerRpcRequest {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    pub id: u64,
    pub topic: String,
    /// Namespaced chain id, e.g. `eip155:137`.
    pub chain_id: String,
    pub request: PeerRpcRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerErrorObject {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerResponse {
    pub id: u64,
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<PeerErrorObject>,
}

impl PeerResponse {
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            id,
            jsonrpc: "2.0".to_owned(),
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: u64, code: i64, message: impl Into<String>) -> Self {
        Self {
            id,
            jsonrpc: "2.0".to_owned(),
            result: None,
            error: Some(PeerErrorObject {
                code,
                message: message.into(),
            }),
        }
    }
}

/// Parses a JSON-RPC quantity: `0x`-prefixed hex or plain decimal.
pub fn parse_quantity(raw: &str) -> Result<u64, String> {
    let trimmed = raw.trim();
    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        u64::from_str_radix(hex, 16).map_err(|e| format!("invalid hex quantity {raw}: {e}"))
    } else {
        trimmed
            .parse()
            .map_err(|e| format!("invalid quantity {raw}: {e}"))
    }
}

mod opt_quantity {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<u64>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => s.serialize_str(&format!("0x{v:x}")),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
        let raw = Option::<serde_json::Value>::deserialize(d)?;
        match raw {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(serde_json::Value::Number(n)) => n
                .as_u64()
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom("chain id must be unsigned")),
            Some(serde_json::Value::String(s)) => super::parse_quantity(&s)
                .map(Some)
                .map_err(serde::de::Error::custom),
            Some(other) => Err(serde::de::Error::custom(format!(
                "invalid chain id: {other}"
            ))),
        }
    }
}
