//! JSON-RPC 2.0 over HTTP with request batching.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::B256;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde_json::{json, Value};

use wallet_runtime_core::{
    parse_quantity, CallReceipt, Eip1193Provider, ReceiptSource, WalletError, WalletResult,
};

use crate::config::RuntimeConfig;

#[derive(Debug)]
pub struct RpcTransport {
    client: reqwest::Client,
    url: String,
    backend: String,
    max_batch_size: usize,
    next_id: AtomicU64,
}

impl RpcTransport {
    pub fn new(url: impl Into<String>, timeout_ms: u64) -> WalletResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| WalletError::Transport(format!("rpc client init failed: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
            backend: "rpc".to_owned(),
            max_batch_size: 100,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn from_config(config: &RuntimeConfig) -> WalletResult<Self> {
        Ok(Self::new(config.rpc_url.clone(), config.rpc_timeout_ms)?
            .with_max_batch_size(config.rpc_batch_max_size))
    }

    /// Label carried by `HttpTransport` errors.
    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = backend.into();
        self
    }

    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size.max(1);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn allocate_ids(&self, n: usize) -> u64 {
        self.next_id.fetch_add(n as u64, Ordering::Relaxed)
    }

    pub async fn request(&self, method: &str, params: Value) -> WalletResult<Value> {
        let id = self.allocate_ids(1);
        let body = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        let response = self.post(&body).await?;
        let object = match response {
            Value::Array(items) => {
                let mut by_id = index_by_id(items)?;
                by_id.remove(&id).ok_or_else(|| {
                    WalletError::ResponseParse(format!("no response for request id {id}"))
                })?
            }
            other => other,
        };
        decode_response(&object)
    }

    /// Sends `calls` as JSON-RPC batches of at most `max_batch_size`
    /// requests. Results come back in call order, matched by id.
    pub async fn batch(&self, calls: &[(&str, Value)]) -> WalletResult<Vec<WalletResult<Value>>> {
        let mut out = Vec::with_capacity(calls.len());
        for chunk in calls.chunks(self.max_batch_size) {
            let first_id = self.allocate_ids(chunk.len());
            let body: Vec<Value> = chunk
                .iter()
                .enumerate()
                .map(|(i, (method, params))| {
                    json!({
                        "jsonrpc": "2.0",
                        "id": first_id + i as u64,
                        "method": method,
                        "params": params,
                    })
                })
                .collect();

            let response = self.post(&Value::Array(body)).await?;
            let items = match response {
                Value::Array(items) => items,
                // Some servers answer a one-element batch with a bare object.
                other => vec![other],
            };
            let mut by_id = index_by_id(items)?;
            for i in 0..chunk.len() {
                let id = first_id + i as u64;
                out.push(match by_id.remove(&id) {
                    Some(object) => decode_response(&object),
                    None => Err(WalletError::ResponseParse(format!(
                        "batch response missing id {id}"
                    ))),
                });
            }
            tracing::debug!(backend = %self.backend, size = chunk.len(), "rpc batch complete");
        }
        Ok(out)
    }

    async fn post(&self, body: &Value) -> WalletResult<Value> {
        let response = self
            .client
            .post(&self.url)
            .json(body)
            .send()
            .await
            .map_err(|e| WalletError::Transport(format!("{} request failed: {e}", self.backend)))?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(backend = %self.backend, status = status.as_u16(), "rpc http error");
            return Err(WalletError::HttpTransport {
                backend: self.backend.clone(),
                status: status.as_u16(),
            });
        }

        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_ascii_lowercase().starts_with("application/json"))
            .unwrap_or(false);
        if is_json {
            response
                .json()
                .await
                .map_err(|e| WalletError::ResponseParse(format!("{} json decode failed: {e}", self.backend)))
        } else {
            let text = response
                .text()
                .await
                .map_err(|e| WalletError::Transport(format!("{} body read failed: {e}", self.backend)))?;
            serde_json::from_str(text.trim()).map_err(|e| {
                WalletError::ResponseParse(format!("{} returned a non-json body: {e}", self.backend))
            })
        }
    }

    pub async fn block_number(&self) -> WalletResult<u64> {
        let raw = self.request("eth_blockNumber", json!([])).await?;
        quantity(&raw, "eth_blockNumber")
    }
}

fn index_by_id(items: Vec<Value>) -> WalletResult<HashMap<u64, Value>> {
    let mut by_id = HashMap::with_capacity(items.len());
    for item in items {
        let id = match item.get("id") {
            Some(Value::Number(n)) => n.as_u64(),
            Some(Value::String(s)) => parse_quantity(s).ok(),
            _ => None,
        };
        match id {
            Some(id) => {
                by_id.insert(id, item);
            }
            None => {
                return Err(WalletError::ResponseParse(format!(
                    "rpc response without usable id: {item}"
                )))
            }
        }
    }
    Ok(by_id)
}

fn decode_response(object: &Value) -> WalletResult<Value> {
    if let Some(error) = object.get("error").filter(|e| !e.is_null()) {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or(-32603);
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown rpc error")
            .to_owned();
        return Err(WalletError::Rpc { code, message });
    }
    object
        .get("result")
        .cloned()
        .ok_or_else(|| WalletError::ResponseParse(format!("rpc response without result: {object}")))
}

pub(crate) fn quantity(value: &Value, what: &str) -> WalletResult<u64> {
    match value {
        Value::String(s) => parse_quantity(s).map_err(WalletError::ResponseParse),
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| WalletError::ResponseParse(format!("{what}: negative quantity"))),
        other => Err(WalletError::ResponseParse(format!(
            "{what}: expected quantity, got {other}"
        ))),
    }
}

pub(crate) fn hash(value: &Value, what: &str) -> WalletResult<B256> {
    value
        .as_str()
        .ok_or_else(|| WalletError::ResponseParse(format!("{what} must be a hex string")))?
        .parse()
        .map_err(|e| WalletError::ResponseParse(format!("{what}: invalid hash: {e}")))
}

/// Reads an `eth_getTransactionReceipt`-shaped object.
pub(crate) fn parse_receipt(value: &Value) -> WalletResult<CallReceipt> {
    let field = |name: &str| {
        value
            .get(name)
            .ok_or_else(|| WalletError::ResponseParse(format!("receipt missing {name}")))
    };
    let success = match value.get("status") {
        Some(Value::String(s)) => parse_quantity(s).map_err(WalletError::ResponseParse)? == 1,
        Some(Value::Number(n)) => n.as_u64() == Some(1),
        Some(Value::Bool(b)) => *b,
        _ => true,
    };
    Ok(CallReceipt {
        transaction_hash: hash(field("transactionHash")?, "transactionHash")?,
        block_number: quantity(field("blockNumber")?, "blockNumber")?,
        gas_used: quantity(field("gasUsed")?, "gasUsed")?,
        success,
    })
}

#[async_trait]
impl Eip1193Provider for RpcTransport {
    async fn request(&self, method: &str, params: Value) -> WalletResult<Value> {
        RpcTransport::request(self, method, params).await
    }
}

#[async_trait]
impl ReceiptSource for RpcTransport {
    async fn transaction_receipt(
        &self,
        _chain_id: u64,
        tx_hash: B256,
    ) -> WalletResult<Option<CallReceipt>> {
        let raw = self
            .request("eth_getTransactionReceipt", json!([tx_hash]))
            .await?;
        if raw.is_null() {
            return Ok(None);
        }
        parse_receipt(&raw).map(Some)
    }
}

/// Receipt lookups routed by chain id.
#[derive(Debug, Default)]
pub struct ChainRpcs {
    chains: HashMap<u64, Arc<RpcTransport>>,
}

impl ChainRpcs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chain(mut self, chain_id: u64, rpc: Arc<RpcTransport>) -> Self {
        self.chains.insert(chain_id, rpc);
        self
    }

    pub fn get(&self, chain_id: u64) -> WalletResult<&Arc<RpcTransport>> {
        self.chains
            .get(&chain_id)
            .ok_or_else(|| WalletError::NotFound(format!("no rpc configured for chain {chain_id}")))
    }
}

#[async_trait]
impl ReceiptSource for ChainRpcs {
    async fn transaction_receipt(
        &self,
        chain_id: u64,
        tx_hash: B256,
    ) -> WalletResult<Option<CallReceipt>> {
        self.get(chain_id)?.transaction_receipt(chain_id, tx_hash).await
    }
}
