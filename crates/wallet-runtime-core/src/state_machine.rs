use serde::{Deserialize, Serialize};

use crate::domain::BundleState;
use crate::error::WalletError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStage {
    Ready,
    NeedsSecondFactor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthLevel {
    Basic,
    SecondFactor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthAction {
    /// A challenge (OTP code, passkey assertion) was issued.
    IssueChallenge,
    /// A wrong code was submitted; the challenge stays open.
    RejectCode,
    /// The challenge expired or ran out of attempts.
    ExpireChallenge,
    /// The second factor verified.
    VerifySecondFactor,
    /// A single-step strategy (OAuth, JWT, endpoint, modal) succeeded.
    CompleteSingleStep,
    Logout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTransition<S> {
    pub from: S,
    pub to: S,
    pub reason: &'static str,
}

/// Returns the next `(stage, level)` pair. Every reachable pair is consistent:
/// a pending second factor is never paired with a second-factor level.
pub fn auth_transition(
    stage: AuthStage,
    level: AuthLevel,
    action: AuthAction,
) -> Result<(AuthStage, AuthLevel, StateTransition<AuthStage>), WalletError> {
    use AuthAction::*;
    use AuthStage::*;

    let (to, to_level, reason) = match (stage, action) {
        (Ready, IssueChallenge) => (NeedsSecondFactor, AuthLevel::Basic, "challenge_issued"),
        (NeedsSecondFactor, IssueChallenge) => {
            (NeedsSecondFactor, AuthLevel::Basic, "challenge_reissued")
        }
        (NeedsSecondFactor, RejectCode) => (NeedsSecondFactor, AuthLevel::Basic, "code_rejected"),
        (NeedsSecondFactor, ExpireChallenge) => (Ready, AuthLevel::Basic, "challenge_expired"),
        (NeedsSecondFactor, VerifySecondFactor) => {
            (Ready, AuthLevel::SecondFactor, "second_factor_verified")
        }
        (Ready, CompleteSingleStep) | (NeedsSecondFactor, CompleteSingleStep) => {
            (Ready, AuthLevel::Basic, "single_step_login")
        }
        (_, Logout) => (Ready, AuthLevel::Basic, "logout"),
        (from, action) => {
            return Err(WalletError::IllegalTransition(format!(
                "illegal auth transition: {from:?} x {action:?} (level {level:?})"
            )))
        }
    };
    Ok((
        to,
        to_level,
        StateTransition {
            from: stage,
            to,
            reason,
        },
    ))
}

/// Bundle status only moves forward: pending may become terminal, terminal
/// states never change.
pub fn bundle_transition(
    from: BundleState,
    observed: BundleState,
) -> Result<StateTransition<BundleState>, WalletError> {
    let reason = match (from, observed) {
        (BundleState::Pending, BundleState::Pending) => "still_pending",
        (BundleState::Pending, BundleState::Confirmed) => "confirmed",
        (BundleState::Pending, BundleState::Failed) => "failed",
        (a, b) if a == b => "terminal_repeat",
        (a, b) => {
            return Err(WalletError::IllegalTransition(format!(
                "illegal bundle transition: {a:?} -> {b:?}"
            )))
        }
    };
    Ok(StateTransition {
        from,
        to: observed,
        reason,
    })
}
