#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use alloy::primitives::{keccak256, Address, Bytes, B256};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use wallet_runtime_core::{
    Account, AccountSigner, AuthPort, AuthResponse, BackendKind, BlockSource, BlockSubscription,
    BundleId, BundleStatusSource, BundleState, BundleStatus, ClockPort, ConnectOptions, DisconnectReason,
    LinkConflictPolicy, LinkOutcome, OAuthCallback, OtpIdentifier, PasskeyAssertion,
    PasskeyChallenge, PasskeyKind, PeerRelayPort, PeerResponse, Profile, RelyingParty,
    SendCallsRequest, Session, SessionNamespace, SessionProposal, SignableMessage, TimestampMs,
    TxRequest, WalletBackend, WalletError, WalletId, WalletResult,
};

#[derive(Debug, Default)]
pub struct TestClock {
    now: AtomicU64,
}

impl TestClock {
    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl ClockPort for TestClock {
    fn now_ms(&self) -> WalletResult<u64> {
        Ok(self.now.load(Ordering::SeqCst) + 1_739_750_400_000)
    }
}

pub fn owner_address() -> Address {
    "0x1000000000000000000000000000000000000001"
        .parse()
        .expect("valid owner address")
}

pub fn other_address() -> Address {
    "0x2000000000000000000000000000000000000002"
        .parse()
        .expect("valid other address")
}

#[derive(Debug, Default)]
pub struct RecordingSigner {
    pub sent: Mutex<Vec<TxRequest>>,
    pub raw_sent: Mutex<Vec<(Bytes, u64)>>,
    pub messages: Mutex<Vec<SignableMessage>>,
    pub typed: Mutex<Vec<Value>>,
}

fn fake_signature(seed: &[u8]) -> Bytes {
    let hash = keccak256(seed);
    let mut sig = Vec::with_capacity(65);
    sig.extend_from_slice(hash.as_slice());
    sig.extend_from_slice(hash.as_slice());
    sig.push(27);
    Bytes::from(sig)
}

#[async_trait]
impl AccountSigner for RecordingSigner {
    async fn sign_message(&self, message: &SignableMessage) -> WalletResult<Bytes> {
        self.messages.lock().expect("lock").push(message.clone());
        Ok(fake_signature(message.as_bytes()))
    }

    async fn sign_typed_data(&self, typed_data: &Value) -> WalletResult<Bytes> {
        self.typed.lock().expect("lock").push(typed_data.clone());
        Ok(fake_signature(typed_data.to_string().as_bytes()))
    }

    async fn sign_transaction(&self, tx: &TxRequest) -> WalletResult<Bytes> {
        Ok(fake_signature(&serde_json::to_vec(tx).expect("tx json")))
    }

    async fn send_transaction(&self, tx: &TxRequest) -> WalletResult<B256> {
        self.sent.lock().expect("lock").push(tx.clone());
        Ok(keccak256(serde_json::to_vec(tx).expect("tx json")))
    }

    async fn send_raw_transaction(&self, raw: &Bytes, chain_id: u64) -> WalletResult<B256> {
        self.raw_sent.lock().expect("lock").push((raw.clone(), chain_id));
        Ok(keccak256(raw))
    }
}

/// Backend whose network-facing methods count every call.
pub struct StubBackend {
    pub id: WalletId,
    pub kind: BackendKind,
    pub signer: Arc<RecordingSigner>,
    pub network_calls: AtomicUsize,
    pub status_calls: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub statuses: Mutex<Vec<WalletResult<BundleStatus>>>,
}

impl StubBackend {
    pub fn new(id: &str, kind: BackendKind) -> Self {
        Self {
            id: WalletId::new(id),
            kind,
            signer: Arc::new(RecordingSigner::default()),
            network_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            statuses: Mutex::new(Vec::new()),
        }
    }

    /// Queue of answers for `get_calls_status`; pending once exhausted.
    pub fn with_statuses(self, statuses: Vec<WalletResult<BundleStatus>>) -> Self {
        *self.statuses.lock().expect("lock") = statuses;
        self
    }
}

#[async_trait]
impl WalletBackend for StubBackend {
    fn id(&self) -> &WalletId {
        &self.id
    }

    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn connect(&self, options: ConnectOptions) -> WalletResult<Account> {
        Ok(Account::new(
            owner_address(),
            options.chain_id.unwrap_or(1),
            self.id.clone(),
            self.kind,
            Arc::clone(&self.signer) as Arc<dyn AccountSigner>,
        ))
    }

    async fn disconnect(&self) -> WalletResult<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn switch_chain(&self, account: &Account, chain_id: u64) -> WalletResult<Account> {
        self.network_calls.fetch_add(1, Ordering::SeqCst);
        Ok(account.on_chain(chain_id))
    }

    async fn send_calls(
        &self,
        _account: &Account,
        request: &SendCallsRequest,
    ) -> WalletResult<BundleId> {
        self.network_calls.fetch_add(1, Ordering::SeqCst);
        Ok(BundleId(format!("bundle-{}", request.calls.len())))
    }

    async fn get_calls_status(
        &self,
        _account: &Account,
        bundle_id: &BundleId,
    ) -> WalletResult<BundleStatus> {
        self.network_calls.fetch_add(1, Ordering::SeqCst);
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let mut queue = self.statuses.lock().expect("lock");
        if queue.is_empty() {
            return Ok(BundleStatus::pending(bundle_id.clone()));
        }
        queue.remove(0)
    }
}

pub fn confirmed(id: &str) -> BundleStatus {
    BundleStatus {
        id: BundleId(id.to_owned()),
        status: BundleState::Confirmed,
        receipts: Vec::new(),
    }
}

/// Block emitter driven by the test. Every subscription gets its own
/// channel; `emit` fans a block out to all live subscribers.
#[derive(Default)]
pub struct ManualBlocks {
    senders: Mutex<Vec<mpsc::UnboundedSender<u64>>>,
    pub subscribes: AtomicUsize,
    pub unsubscribes: Arc<AtomicUsize>,
}

impl ManualBlocks {
    pub fn subscriber_count(&self) -> usize {
        self.subscribes.load(Ordering::SeqCst)
    }

    pub fn unsubscribe_count(&self) -> usize {
        self.unsubscribes.load(Ordering::SeqCst)
    }

    /// Drops every sender, closing all live subscriptions.
    pub fn close(&self) {
        self.senders.lock().expect("lock").clear();
    }

    pub fn emit(&self, block: u64) {
        let senders = self.senders.lock().expect("lock");
        for tx in senders.iter() {
            let _ = tx.send(block);
        }
    }
}

impl BlockSource for ManualBlocks {
    fn watch_blocks(&self, _chain_id: u64) -> WalletResult<BlockSubscription> {
        self.subscribes.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.lock().expect("lock").push(tx);
        let unsubscribes = Arc::clone(&self.unsubscribes);
        Ok(BlockSubscription::new(rx, move || {
            unsubscribes.fetch_add(1, Ordering::SeqCst);
        }))
    }
}

/// Status source answering from a script, then `pending` forever.
#[derive(Default)]
pub struct ScriptedStatus {
    pub script: Mutex<Vec<WalletResult<BundleStatus>>>,
    pub calls: AtomicUsize,
}

impl ScriptedStatus {
    pub fn new(script: Vec<WalletResult<BundleStatus>>) -> Self {
        Self {
            script: Mutex::new(script),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BundleStatusSource for ScriptedStatus {
    async fn bundle_status(&self, bundle_id: &BundleId) -> WalletResult<BundleStatus> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock().expect("lock");
        if script.is_empty() {
            return Ok(BundleStatus::pending(bundle_id.clone()));
        }
        script.remove(0)
    }
}

/// Yields to the scheduler until `cond` holds; panics after a bounded spin.
pub async fn settle_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..1_000 {
        if cond() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}

#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    Approved(u64),
    Rejected(u64, i64),
    Disconnected(String, i64),
    Responded(String, PeerResponse),
}

pub const SESSION_TTL_MS: u64 = 60_000;

/// Cloned handles share one event log and one clock.
#[derive(Clone, Default)]
pub struct RecordingRelay {
    pub events: Arc<Mutex<Vec<RelayEvent>>>,
    pub clock: Arc<TestClock>,
    next_topic: Arc<AtomicU64>,
}

impl RecordingRelay {
    pub fn events(&self) -> Vec<RelayEvent> {
        self.events.lock().expect("lock").clone()
    }
}

#[async_trait]
impl PeerRelayPort for RecordingRelay {
    async fn approve_session(
        &self,
        proposal: &SessionProposal,
        namespaces: HashMap<String, SessionNamespace>,
    ) -> WalletResult<Session> {
        // Lets a competing proposal run between supersede and approve.
        tokio::task::yield_now().await;
        self.events
            .lock()
            .expect("lock")
            .push(RelayEvent::Approved(proposal.id));
        let n = self.next_topic.fetch_add(1, Ordering::SeqCst);
        Ok(Session {
            topic: format!("topic-{n}"),
            peer: proposal.proposer.clone(),
            namespaces,
            expiry: TimestampMs(self.clock.now_ms()? + SESSION_TTL_MS),
        })
    }

    async fn reject_session(&self, proposal_id: u64, reason: &DisconnectReason) -> WalletResult<()> {
        self.events
            .lock()
            .expect("lock")
            .push(RelayEvent::Rejected(proposal_id, reason.code));
        Ok(())
    }

    async fn disconnect_session(&self, topic: &str, reason: &DisconnectReason) -> WalletResult<()> {
        self.events
            .lock()
            .expect("lock")
            .push(RelayEvent::Disconnected(topic.to_owned(), reason.code));
        Ok(())
    }

    async fn respond(&self, topic: &str, response: &PeerResponse) -> WalletResult<()> {
        self.events
            .lock()
            .expect("lock")
            .push(RelayEvent::Responded(topic.to_owned(), response.clone()));
        Ok(())
    }
}

pub const GOOD_CODE: &str = "424242";

/// In-memory auth backend: one valid OTP code, one conflicting profile.
#[derive(Default)]
pub struct StubAuth {
    pub ready_calls: AtomicUsize,
    pub sent: Mutex<Vec<OtpIdentifier>>,
    pub expire_next_verify: Mutex<bool>,
    pub conflict_on_link: Mutex<bool>,
    pub resolved_with: Mutex<Option<LinkConflictPolicy>>,
    pub logouts: AtomicUsize,
    pub fail_next_address_lookup: Mutex<bool>,
}

fn token_for(seed: &str) -> String {
    format!("tok-{}", keccak256(seed.as_bytes()))
}

fn profile(kind: &str, identifier: &str) -> Profile {
    Profile {
        kind: kind.to_owned(),
        identifier: identifier.to_owned(),
    }
}

#[async_trait]
impl AuthPort for StubAuth {
    async fn ensure_ready(&self) -> WalletResult<()> {
        self.ready_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send_otp(&self, identifier: &OtpIdentifier) -> WalletResult<()> {
        self.sent.lock().expect("lock").push(identifier.clone());
        Ok(())
    }

    async fn verify_otp(&self, identifier: &OtpIdentifier, code: &str) -> WalletResult<AuthResponse> {
        if std::mem::take(&mut *self.expire_next_verify.lock().expect("lock")) {
            return Err(WalletError::AuthChallengeExpired(identifier.value().to_owned()));
        }
        if code != GOOD_CODE {
            return Err(WalletError::AuthChallengeInvalid(identifier.value().to_owned()));
        }
        Ok(AuthResponse {
            auth_token: token_for(identifier.value()),
            wallet_address: None,
            email: match identifier {
                OtpIdentifier::Email(e) => Some(e.clone()),
                OtpIdentifier::Phone(_) => None,
            },
            phone: None,
            is_new_user: true,
        })
    }

    fn oauth_login_url(&self, provider: &str, redirect_url: &str) -> WalletResult<String> {
        Ok(format!("https://auth.test/{provider}?redirect={redirect_url}"))
    }

    async fn oauth_callback(&self, callback: &OAuthCallback) -> WalletResult<AuthResponse> {
        Ok(AuthResponse {
            auth_token: token_for(&callback.code),
            wallet_address: Some(owner_address()),
            ..AuthResponse::default()
        })
    }

    async fn passkey_challenge(
        &self,
        relying_party: &RelyingParty,
        kind: PasskeyKind,
    ) -> WalletResult<PasskeyChallenge> {
        Ok(PasskeyChallenge {
            challenge: "challenge-1".to_owned(),
            relying_party: relying_party.clone(),
            kind,
        })
    }

    async fn passkey_verify(&self, assertion: &PasskeyAssertion) -> WalletResult<AuthResponse> {
        Ok(AuthResponse {
            auth_token: token_for(&assertion.credential_id),
            wallet_address: Some(owner_address()),
            ..AuthResponse::default()
        })
    }

    async fn jwt_login(&self, jwt: &str, _encryption_key: &str) -> WalletResult<AuthResponse> {
        Ok(AuthResponse {
            auth_token: token_for(jwt),
            wallet_address: Some(owner_address()),
            ..AuthResponse::default()
        })
    }

    async fn auth_endpoint_login(&self, payload: &str, _encryption_key: &str) -> WalletResult<AuthResponse> {
        Ok(AuthResponse {
            auth_token: if payload.is_empty() { String::new() } else { token_for(payload) },
            wallet_address: Some(owner_address()),
            ..AuthResponse::default()
        })
    }

    async fn wallet_address(&self, _auth_token: &str) -> WalletResult<Address> {
        if std::mem::take(&mut *self.fail_next_address_lookup.lock().expect("lock")) {
            return Err(WalletError::Transport("profile service unavailable".into()));
        }
        Ok(owner_address())
    }

    async fn linked_profiles(&self, _auth_token: &str) -> WalletResult<Vec<Profile>> {
        Ok(vec![profile("email", "a@b.com")])
    }

    async fn link_profile(&self, _auth_token: &str, _new_profile_token: &str) -> WalletResult<LinkOutcome> {
        if *self.conflict_on_link.lock().expect("lock") {
            return Ok(LinkOutcome::Conflict {
                existing_account: other_address().to_string(),
            });
        }
        Ok(LinkOutcome::Linked {
            profiles: vec![profile("email", "a@b.com"), profile("phone", "+15550100")],
        })
    }

    async fn resolve_link_conflict(
        &self,
        _auth_token: &str,
        _new_profile_token: &str,
        policy: LinkConflictPolicy,
    ) -> WalletResult<Vec<Profile>> {
        *self.resolved_with.lock().expect("lock") = Some(policy);
        Ok(vec![profile("email", "a@b.com"), profile("phone", "+15550100")])
    }

    async fn unlink_profile(&self, _auth_token: &str, _profile: &Profile) -> WalletResult<Vec<Profile>> {
        Ok(vec![profile("email", "a@b.com")])
    }

    async fn logout(&self, _auth_token: &str) -> WalletResult<()> {
        self.logouts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
