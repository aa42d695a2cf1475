//! Peer session manager: the inbound path where a remote application drives
//! this wallet over a session-relay protocol.

use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use alloy::primitives::{Address, Bytes};
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;

use crate::domain::{
    parse_quantity, PeerResponse, ProposalNamespace, Session, SessionNamespace, SessionProposal,
    SessionRequest, SignableMessage, TxRequest, WalletId,
};
use crate::error::{WalletError, WalletResult};
use crate::ports::{ClockPort, DisconnectReason, PeerRelayPort};
use crate::wallet::{Account, Wallet};

pub const EIP155_NAMESPACE: &str = "eip155";

const UNSUPPORTED_METHOD_CODE: i64 = 5000;
const HANDLER_ERROR_CODE: i64 = -32000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerMethod {
    PersonalSign,
    EthSign,
    EthSignTypedData,
    EthSignTypedDataV4,
    EthSignTransaction,
    EthSendTransaction,
    EthSendRawTransaction,
}

impl PeerMethod {
    pub const ALL: [PeerMethod; 7] = [
        PeerMethod::PersonalSign,
        PeerMethod::EthSign,
        PeerMethod::EthSignTypedData,
        PeerMethod::EthSignTypedDataV4,
        PeerMethod::EthSignTransaction,
        PeerMethod::EthSendTransaction,
        PeerMethod::EthSendRawTransaction,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PeerMethod::PersonalSign => "personal_sign",
            PeerMethod::EthSign => "eth_sign",
            PeerMethod::EthSignTypedData => "eth_signTypedData",
            PeerMethod::EthSignTypedDataV4 => "eth_signTypedData_v4",
            PeerMethod::EthSignTransaction => "eth_signTransaction",
            PeerMethod::EthSendTransaction => "eth_sendTransaction",
            PeerMethod::EthSendRawTransaction => "eth_sendRawTransaction",
        }
    }
}

impl FromStr for PeerMethod {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PeerMethod::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| WalletError::UnsupportedMethod(s.to_owned()))
    }
}

/// `"eip155:137"` -> 137. Bare numbers are accepted too.
pub fn parse_namespaced_chain_id(raw: &str) -> WalletResult<u64> {
    let reference = match raw.split_once(':') {
        Some((namespace, reference)) => {
            if namespace != EIP155_NAMESPACE {
                return Err(WalletError::Validation(format!(
                    "unsupported chain namespace: {namespace}"
                )));
            }
            reference
        }
        None => raw,
    };
    parse_quantity(reference).map_err(WalletError::Validation)
}

pub struct PeerSessionManager<R: PeerRelayPort> {
    relay: R,
    clock: Arc<dyn ClockPort>,
    sessions: Mutex<HashMap<WalletId, Session>>,
    // Held across supersede + approve so two proposals never both see an
    // empty slot.
    proposals: AsyncMutex<()>,
}

impl<R: PeerRelayPort> PeerSessionManager<R> {
    pub fn new(relay: R, clock: Arc<dyn ClockPort>) -> Self {
        Self {
            relay,
            clock,
            sessions: Mutex::new(HashMap::new()),
            proposals: AsyncMutex::new(()),
        }
    }

    pub fn relay(&self) -> &R {
        &self.relay
    }

    fn lock(&self) -> WalletResult<MutexGuard<'_, HashMap<WalletId, Session>>> {
        self.sessions
            .lock()
            .map_err(|e| WalletError::Transport(format!("session lock poisoned: {e}")))
    }

    pub fn session(&self, wallet: &WalletId) -> WalletResult<Option<Session>> {
        Ok(self.lock()?.get(wallet).cloned())
    }

    pub fn session_count(&self) -> WalletResult<usize> {
        Ok(self.lock()?.len())
    }

    /// Accepts a proposal for `wallet`, first tearing down any session it
    /// already has.
    pub async fn handle_proposal(
        &self,
        wallet: &Wallet,
        proposal: &SessionProposal,
    ) -> WalletResult<Session> {
        let account = wallet.require_account()?;
        let _serial = self.proposals.lock().await;

        let previous = self.lock()?.remove(wallet.id());
        if let Some(previous) = previous {
            tracing::info!(
                wallet = %wallet.id(),
                topic = %previous.topic,
                "disconnecting superseded peer session"
            );
            // The relay may already have dropped the topic (expiry, peer left).
            if let Err(e) = self
                .relay
                .disconnect_session(&previous.topic, &DisconnectReason::user_disconnected())
                .await
            {
                tracing::debug!(
                    topic = %previous.topic,
                    error = %e,
                    "superseded session already gone on relay"
                );
            }
        }

        let namespaces = negotiate_namespaces(proposal, account.address())?;
        let session = self.relay.approve_session(proposal, namespaces).await?;
        tracing::info!(
            wallet = %wallet.id(),
            topic = %session.topic,
            peer = %session.peer.name,
            "peer session approved"
        );
        self.lock()?.insert(wallet.id().clone(), session.clone());
        Ok(session)
    }

    pub async fn reject_proposal(
        &self,
        proposal: &SessionProposal,
        reason: &DisconnectReason,
    ) -> WalletResult<()> {
        self.relay.reject_session(proposal.id, reason).await
    }

    /// User-initiated disconnect of `wallet`'s session, if any.
    pub async fn disconnect(&self, wallet: &WalletId) -> WalletResult<()> {
        let previous = self.lock()?.remove(wallet);
        if let Some(session) = previous {
            self.relay
                .disconnect_session(&session.topic, &DisconnectReason::user_disconnected())
                .await?;
        }
        Ok(())
    }

    /// The peer deleted the session on its side.
    pub fn handle_session_delete(&self, topic: &str) -> WalletResult<bool> {
        let mut g = self.lock()?;
        let before = g.len();
        g.retain(|_, s| s.topic != topic);
        Ok(g.len() != before)
    }

    /// Runs a peer request against the wallet's account and answers the peer
    /// on the session topic, with a result or an error object.
    pub async fn handle_request(
        &self,
        wallet: &Wallet,
        request: &SessionRequest,
    ) -> WalletResult<Value> {
        let session = self
            .session(wallet.id())?
            .filter(|s| s.topic == request.topic)
            .ok_or_else(|| {
                WalletError::NotFound(format!("no session for topic {}", request.topic))
            })?;
        if self.clock.now_ms()? >= session.expiry.0 {
            self.handle_session_delete(&session.topic)?;
            tracing::info!(topic = %session.topic, "peer session expired");
            return Err(WalletError::NotFound(format!(
                "session {} expired",
                session.topic
            )));
        }

        let outcome = match wallet.require_account() {
            Ok(account) => dispatch_request(&account, request).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(result) => {
                self.relay
                    .respond(&session.topic, &PeerResponse::success(request.id, result.clone()))
                    .await?;
                Ok(result)
            }
            Err(e) => {
                let code = match e {
                    WalletError::UnsupportedMethod(_) => UNSUPPORTED_METHOD_CODE,
                    _ => HANDLER_ERROR_CODE,
                };
                tracing::warn!(
                    method = %request.request.method,
                    error = %e,
                    "peer request failed"
                );
                self.relay
                    .respond(
                        &session.topic,
                        &PeerResponse::failure(request.id, code, e.to_string()),
                    )
                    .await?;
                Err(e)
            }
        }
    }
}

/// Merges required and optional namespaces and binds every chain to the
/// account address.
pub fn negotiate_namespaces(
    proposal: &SessionProposal,
    address: Address,
) -> WalletResult<HashMap<String, SessionNamespace>> {
    let required = proposal.required_namespaces.get(EIP155_NAMESPACE);
    let optional = proposal.optional_namespaces.get(EIP155_NAMESPACE);
    if required.is_none() && optional.is_none() {
        return Err(WalletError::MalformedPeerProposal(format!(
            "proposal {} carries no {EIP155_NAMESPACE} namespace",
            proposal.id
        )));
    }

    let mut chains = BTreeSet::new();
    let mut methods = BTreeSet::new();
    let mut events = BTreeSet::new();
    for ns in [required, optional].into_iter().flatten() {
        merge_namespace(ns, &mut chains, &mut methods, &mut events);
    }
    if chains.is_empty() {
        return Err(WalletError::MalformedPeerProposal(format!(
            "proposal {} has an empty {EIP155_NAMESPACE} chain list",
            proposal.id
        )));
    }
    for chain in &chains {
        parse_namespaced_chain_id(chain).map_err(|e| {
            WalletError::MalformedPeerProposal(format!("invalid chain {chain}: {e}"))
        })?;
    }

    let accounts = chains.iter().map(|c| format!("{c}:{address}")).collect();
    let namespace = SessionNamespace {
        chains: chains.into_iter().collect(),
        accounts,
        methods: methods.into_iter().collect(),
        events: events.into_iter().collect(),
    };
    Ok(HashMap::from([(EIP155_NAMESPACE.to_owned(), namespace)]))
}

fn merge_namespace(
    ns: &ProposalNamespace,
    chains: &mut BTreeSet<String>,
    methods: &mut BTreeSet<String>,
    events: &mut BTreeSet<String>,
) {
    chains.extend(ns.chains.iter().flatten().cloned());
    methods.extend(ns.methods.iter().cloned());
    events.extend(ns.events.iter().cloned());
}

async fn dispatch_request(account: &Account, request: &SessionRequest) -> WalletResult<Value> {
    let method: PeerMethod = request.request.method.parse()?;
    let params = &request.request.params;
    match method {
        PeerMethod::PersonalSign => {
            let message = param_str(params, 0)?;
            check_address(account, param_str(params, 1)?)?;
            let signature = account.sign_message(&decode_message(message)).await?;
            Ok(Value::String(signature.to_string()))
        }
        PeerMethod::EthSign => {
            check_address(account, param_str(params, 0)?)?;
            let message = param_str(params, 1)?;
            let signature = account.sign_message(&decode_message(message)).await?;
            Ok(Value::String(signature.to_string()))
        }
        PeerMethod::EthSignTypedData | PeerMethod::EthSignTypedDataV4 => {
            check_address(account, param_str(params, 0)?)?;
            let typed_data = match param(params, 1)? {
                Value::String(raw) => serde_json::from_str(raw).map_err(|e| {
                    WalletError::Validation(format!("typed data is not valid json: {e}"))
                })?,
                other => other.clone(),
            };
            let signature = account.sign_typed_data(&typed_data).await?;
            Ok(Value::String(signature.to_string()))
        }
        PeerMethod::EthSignTransaction => {
            let tx = param_tx(params)?;
            check_from(account, &tx)?;
            let signed = account.sign_transaction(&tx).await?;
            Ok(Value::String(signed.to_string()))
        }
        PeerMethod::EthSendTransaction => {
            let chain_id = parse_namespaced_chain_id(&request.chain_id)?;
            let mut tx = param_tx(params)?;
            check_from(account, &tx)?;
            tx.chain_id = Some(chain_id);
            let hash = account.send_transaction(&tx).await?;
            Ok(Value::String(hash.to_string()))
        }
        PeerMethod::EthSendRawTransaction => {
            let chain_id = parse_namespaced_chain_id(&request.chain_id)?;
            let raw: Bytes = param_str(params, 0)?
                .parse()
                .map_err(|e| WalletError::Validation(format!("invalid raw transaction: {e}")))?;
            let hash = account.send_raw_transaction(&raw, chain_id).await?;
            Ok(Value::String(hash.to_string()))
        }
    }
}

fn param(params: &Value, index: usize) -> WalletResult<&Value> {
    params
        .get(index)
        .ok_or_else(|| WalletError::Validation(format!("missing request param {index}")))
}

fn param_str(params: &Value, index: usize) -> WalletResult<&str> {
    param(params, index)?
        .as_str()
        .ok_or_else(|| WalletError::Validation(format!("request param {index} must be a string")))
}

fn param_tx(params: &Value) -> WalletResult<TxRequest> {
    serde_json::from_value(param(params, 0)?.clone())
        .map_err(|e| WalletError::Validation(format!("invalid transaction param: {e}")))
}

fn check_address(account: &Account, raw: &str) -> WalletResult<()> {
    let requested: Address = raw
        .parse()
        .map_err(|e| WalletError::Validation(format!("invalid address param: {e}")))?;
    if requested != account.address() {
        return Err(WalletError::Validation(format!(
            "request address {requested} does not match connected account {}",
            account.address()
        )));
    }
    Ok(())
}

fn check_from(account: &Account, tx: &TxRequest) -> WalletResult<()> {
    match tx.from {
        Some(from) if from != account.address() => Err(WalletError::Validation(format!(
            "transaction from {from} does not match connected account {}",
            account.address()
        ))),
        _ => Ok(()),
    }
}

fn decode_message(raw: &str) -> SignableMessage {
    if raw.starts_with("0x") {
        if let Ok(bytes) = raw.parse::<Bytes>() {
            return SignableMessage::Raw(bytes);
        }
    }
    SignableMessage::Text(raw.to_owned())
}
