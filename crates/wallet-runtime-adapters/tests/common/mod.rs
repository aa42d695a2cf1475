#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Read;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use alloy::primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use serde_json::Value;
use tiny_http::{Header, Response, Server, StatusCode};

use wallet_runtime_core::{
    Account, AccountSigner, BackendKind, CallReceipt, ClockPort, Eip1193Provider,
    ReceiptSource, SignableMessage, TxRequest, WalletError, WalletId, WalletResult,
};

#[derive(Debug, Default)]
pub struct TestClock {
    now: AtomicU64,
}

impl ClockPort for TestClock {
    fn now_ms(&self) -> WalletResult<u64> {
        Ok(self.now.fetch_add(1, Ordering::SeqCst) + 1_739_750_400_000)
    }
}

pub fn owner_address() -> Address {
    "0x1000000000000000000000000000000000000001"
        .parse()
        .expect("owner address")
}

pub fn smart_address() -> Address {
    "0x000000000000000000000000000000000000BEEF"
        .parse()
        .expect("smart account address")
}

pub fn target_address() -> Address {
    "0x3000000000000000000000000000000000000003"
        .parse()
        .expect("target address")
}

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub body: String,
    pub authorization: Option<String>,
}

impl Recorded {
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body).expect("request body is json")
    }
}

pub struct Reply {
    pub status: u16,
    pub body: String,
    pub json_content_type: bool,
}

impl Reply {
    pub fn json(body: Value) -> Self {
        Self {
            status: 200,
            body: body.to_string(),
            json_content_type: true,
        }
    }

    /// JSON payload served as `text/plain`.
    pub fn text(body: Value) -> Self {
        Self {
            status: 200,
            body: body.to_string(),
            json_content_type: false,
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: "{\"error\":\"rejected\"}".to_owned(),
            json_content_type: true,
        }
    }
}

pub type RequestLog = Arc<Mutex<Vec<Recorded>>>;

pub fn spawn_mock_server<F>(handler: F) -> (String, RequestLog)
where
    F: Fn(&Recorded) -> Reply + Send + 'static,
{
    let server = Server::http("127.0.0.1:0").expect("start server");
    let addr = format!("http://{}", server.server_addr());
    let log: RequestLog = Arc::new(Mutex::new(Vec::new()));
    let requests = Arc::clone(&log);

    thread::spawn(move || {
        for mut req in server.incoming_requests() {
            let mut body = String::new();
            let _ = req.as_reader().read_to_string(&mut body);
            let recorded = Recorded {
                method: req.method().to_string(),
                path: req.url().to_owned(),
                body,
                authorization: req
                    .headers()
                    .iter()
                    .find(|h| h.field.equiv("Authorization"))
                    .map(|h| h.value.as_str().to_owned()),
            };
            let reply = handler(&recorded);
            if let Ok(mut g) = requests.lock() {
                g.push(recorded);
            }

            let mut response =
                Response::from_string(reply.body).with_status_code(StatusCode(reply.status));
            if reply.json_content_type {
                response = response.with_header(
                    Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
                        .expect("content type header"),
                );
            }
            let _ = req.respond(response);
        }
    });

    (addr, log)
}

pub fn paths(log: &RequestLog) -> Vec<String> {
    log.lock()
        .expect("request log")
        .iter()
        .map(|r| r.path.clone())
        .collect()
}

/// Provider answering from a fixed table; anything else is `method not found`.
#[derive(Default)]
pub struct StubProvider {
    responses: Mutex<HashMap<String, WalletResult<Value>>>,
    pub calls: Mutex<Vec<(String, Value)>>,
}

impl StubProvider {
    pub fn with(self, method: &str, result: WalletResult<Value>) -> Self {
        self.responses
            .lock()
            .expect("responses")
            .insert(method.to_owned(), result);
        self
    }

    pub fn calls_to(&self, method: &str) -> Vec<Value> {
        self.calls
            .lock()
            .expect("calls")
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

#[async_trait]
impl Eip1193Provider for StubProvider {
    async fn request(&self, method: &str, params: Value) -> WalletResult<Value> {
        self.calls
            .lock()
            .expect("calls")
            .push((method.to_owned(), params));
        self.responses
            .lock()
            .expect("responses")
            .get(method)
            .cloned()
            .unwrap_or_else(|| {
                Err(WalletError::Rpc {
                    code: -32601,
                    message: format!("the method {method} does not exist"),
                })
            })
    }
}

pub fn method_not_found() -> WalletError {
    WalletError::Rpc {
        code: -32601,
        message: "Method not found".to_owned(),
    }
}

#[derive(Default)]
pub struct StubReceipts {
    receipts: Mutex<HashMap<B256, CallReceipt>>,
}

impl StubReceipts {
    pub fn mine(&self, hash: B256, success: bool) {
        self.receipts.lock().expect("receipts").insert(
            hash,
            CallReceipt {
                transaction_hash: hash,
                block_number: 100,
                gas_used: 21_000,
                success,
            },
        );
    }
}

#[async_trait]
impl ReceiptSource for StubReceipts {
    async fn transaction_receipt(
        &self,
        _chain_id: u64,
        tx_hash: B256,
    ) -> WalletResult<Option<CallReceipt>> {
        Ok(self.receipts.lock().expect("receipts").get(&tx_hash).cloned())
    }
}

/// Signer that hands out sequential transaction hashes.
#[derive(Default)]
pub struct SequentialSigner {
    next: AtomicU64,
    pub sent: Mutex<Vec<TxRequest>>,
    pub batches: Mutex<Vec<Vec<TxRequest>>>,
    pub atomic: bool,
}

impl SequentialSigner {
    pub fn atomic() -> Self {
        Self {
            atomic: true,
            ..Self::default()
        }
    }

    fn next_hash(&self) -> B256 {
        let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        B256::with_last_byte(n as u8)
    }
}

#[async_trait]
impl AccountSigner for SequentialSigner {
    async fn sign_message(&self, message: &SignableMessage) -> WalletResult<Bytes> {
        Ok(Bytes::copy_from_slice(message.as_bytes()))
    }

    async fn sign_typed_data(&self, _typed_data: &Value) -> WalletResult<Bytes> {
        Ok(Bytes::from(vec![0x1b; 65]))
    }

    async fn sign_transaction(&self, _tx: &TxRequest) -> WalletResult<Bytes> {
        Ok(Bytes::from(vec![0x02]))
    }

    async fn send_transaction(&self, tx: &TxRequest) -> WalletResult<B256> {
        self.sent.lock().expect("sent").push(tx.clone());
        Ok(self.next_hash())
    }

    async fn send_raw_transaction(&self, _raw: &Bytes, _chain_id: u64) -> WalletResult<B256> {
        Ok(self.next_hash())
    }

    async fn send_batch_transaction(&self, txs: &[TxRequest]) -> WalletResult<Option<B256>> {
        if !self.atomic {
            return Ok(None);
        }
        self.batches.lock().expect("batches").push(txs.to_vec());
        Ok(Some(self.next_hash()))
    }
}

pub fn account_with(signer: Arc<SequentialSigner>, kind: BackendKind, chain_id: u64) -> Account {
    Account::new(
        owner_address(),
        chain_id,
        WalletId::new("test"),
        kind,
        signer,
    )
}
