use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use alloy::primitives::B256;
use async_trait::async_trait;

use wallet_runtime_core::{
    ClockPort, DisconnectReason, PeerRelayPort, PeerResponse, Session, SessionNamespace,
    SessionProposal, TimestampMs, WalletError, WalletResult,
};

use crate::clock::SystemClock;

const SESSION_TTL_MS: u64 = 7 * 24 * 60 * 60 * 1000;

/// Relay that keeps sessions and outbound messages in memory. Hosts that
/// bridge a real relay network drain `outbox` and forward it.
#[derive(Clone)]
pub struct InMemoryRelay {
    inner: Arc<Mutex<RelayState>>,
    clock: Arc<dyn ClockPort>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    Approved { proposal_id: u64, topic: String },
    Rejected { proposal_id: u64, reason: DisconnectReason },
    Disconnected { topic: String, reason: DisconnectReason },
    Response { topic: String, response: PeerResponse },
}

#[derive(Debug, Default)]
struct RelayState {
    sessions: HashMap<String, Session>,
    outbox: Vec<RelayMessage>,
}

impl Default for InMemoryRelay {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl InMemoryRelay {
    pub fn new(clock: Arc<dyn ClockPort>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RelayState::default())),
            clock,
        }
    }

    fn lock(&self) -> WalletResult<MutexGuard<'_, RelayState>> {
        self.inner
            .lock()
            .map_err(|e| WalletError::Transport(format!("relay lock poisoned: {e}")))
    }

    pub fn sessions(&self) -> WalletResult<Vec<Session>> {
        Ok(self.lock()?.sessions.values().cloned().collect())
    }

    pub fn drain_outbox(&self) -> WalletResult<Vec<RelayMessage>> {
        Ok(std::mem::take(&mut self.lock()?.outbox))
    }
}

fn new_topic() -> WalletResult<String> {
    let mut raw = [0u8; 32];
    getrandom::getrandom(&mut raw)
        .map_err(|e| WalletError::Transport(format!("topic generation failed: {e}")))?;
    Ok(alloy::hex::encode(B256::from(raw)))
}

#[async_trait]
impl PeerRelayPort for InMemoryRelay {
    async fn approve_session(
        &self,
        proposal: &SessionProposal,
        namespaces: HashMap<String, SessionNamespace>,
    ) -> WalletResult<Session> {
        let topic = new_topic()?;
        let now = self.clock.now_ms()?;
        let session = Session {
            topic: topic.clone(),
            peer: proposal.proposer.clone(),
            namespaces,
            expiry: TimestampMs(now.saturating_add(SESSION_TTL_MS)),
        };
        let mut g = self.lock()?;
        g.sessions.insert(topic.clone(), session.clone());
        g.outbox.push(RelayMessage::Approved {
            proposal_id: proposal.id,
            topic,
        });
        Ok(session)
    }

    async fn reject_session(&self, proposal_id: u64, reason: &DisconnectReason) -> WalletResult<()> {
        self.lock()?.outbox.push(RelayMessage::Rejected {
            proposal_id,
            reason: reason.clone(),
        });
        Ok(())
    }

    async fn disconnect_session(&self, topic: &str, reason: &DisconnectReason) -> WalletResult<()> {
        let mut g = self.lock()?;
        if g.sessions.remove(topic).is_none() {
            return Err(WalletError::NotFound(format!("relay session missing: {topic}")));
        }
        g.outbox.push(RelayMessage::Disconnected {
            topic: topic.to_owned(),
            reason: reason.clone(),
        });
        Ok(())
    }

    async fn respond(&self, topic: &str, response: &PeerResponse) -> WalletResult<()> {
        let mut g = self.lock()?;
        if !g.sessions.contains_key(topic) {
            return Err(WalletError::NotFound(format!("relay session missing: {topic}")));
        }
        g.outbox.push(RelayMessage::Response {
            topic: topic.to_owned(),
            response: response.clone(),
        });
        Ok(())
    }
}
