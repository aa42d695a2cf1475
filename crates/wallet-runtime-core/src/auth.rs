//! Authentication state machine for embedded (custodial) accounts.
//!
//! Every login goes through the same three steps: the shared `pre_login`
//! readiness hook, a per-strategy `execute` selected by an exhaustive match
//! over [`LoginRequest`], and the shared `post_login` normalization into an
//! [`AuthLoginReturn`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::domain::TimestampMs;
use crate::error::{WalletError, WalletResult};
use crate::ports::{AuthPort, ClockPort};
use crate::state_machine::{auth_transition, AuthAction, AuthLevel, AuthStage};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum OtpIdentifier {
    Email(String),
    Phone(String),
}

impl OtpIdentifier {
    pub fn value(&self) -> &str {
        match self {
            OtpIdentifier::Email(v) | OtpIdentifier::Phone(v) => v,
        }
    }

    fn strategy(&self) -> AuthStrategy {
        match self {
            OtpIdentifier::Email(_) => AuthStrategy::Email,
            OtpIdentifier::Phone(_) => AuthStrategy::Phone,
        }
    }

    /// Log-safe form: keeps the first character and the domain / last digits.
    pub fn redacted(&self) -> String {
        match self {
            OtpIdentifier::Email(v) => match v.split_once('@') {
                Some((local, domain)) => {
                    format!("{}***@{domain}", local.chars().next().unwrap_or('*'))
                }
                None => "***".to_owned(),
            },
            OtpIdentifier::Phone(v) => {
                let tail: String = v
                    .chars()
                    .rev()
                    .take(2)
                    .collect::<Vec<_>>()
                    .into_iter()
                    .rev()
                    .collect();
                format!("***{tail}")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStrategy {
    Email,
    Phone,
    OAuth,
    Passkey,
    Jwt,
    AuthEndpoint,
    Modal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthCallback {
    pub provider: String,
    pub code: String,
    #[serde(default)]
    pub state: Option<String>,
    pub redirect_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelyingParty {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PasskeyKind {
    SignUp,
    SignIn,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasskeyChallenge {
    pub challenge: String,
    pub relying_party: RelyingParty,
    pub kind: PasskeyKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasskeyAssertion {
    pub challenge: String,
    pub credential_id: String,
    pub client_data_json: String,
    pub authenticator_data: String,
    pub signature: String,
    #[serde(default)]
    pub user_handle: Option<String>,
    pub kind: PasskeyKind,
}

/// Raw backend login result. Backends disagree on which fields they fill;
/// `post_login` turns this into an [`AuthLoginReturn`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    #[serde(default)]
    pub auth_token: String,
    #[serde(default)]
    pub wallet_address: Option<Address>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub is_new_user: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginRequest {
    Otp { identifier: OtpIdentifier, code: String },
    OAuth(OAuthCallback),
    Passkey(PasskeyAssertion),
    Jwt { jwt: String, encryption_key: String },
    AuthEndpoint { payload: String, encryption_key: String },
    /// Result handed back by the delegated login UI.
    Modal(AuthResponse),
}

impl LoginRequest {
    pub fn strategy(&self) -> AuthStrategy {
        match self {
            LoginRequest::Otp { identifier, .. } => identifier.strategy(),
            LoginRequest::OAuth(_) => AuthStrategy::OAuth,
            LoginRequest::Passkey(_) => AuthStrategy::Passkey,
            LoginRequest::Jwt { .. } => AuthStrategy::Jwt,
            LoginRequest::AuthEndpoint { .. } => AuthStrategy::AuthEndpoint,
            LoginRequest::Modal(_) => AuthStrategy::Modal,
        }
    }

    fn is_second_factor(&self) -> bool {
        matches!(self, LoginRequest::Otp { .. } | LoginRequest::Passkey(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub wallet_address: Address,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthLoginReturn {
    pub user: AuthUser,
    pub auth_token: String,
    pub auth_method: AuthStrategy,
    pub is_new_user: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Profile {
    #[serde(rename = "type")]
    pub kind: String,
    pub identifier: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LinkOutcome {
    Linked { profiles: Vec<Profile> },
    Conflict { existing_account: String },
}

/// Mandatory input to profile linking; never inferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkConflictPolicy {
    Error,
    OverrideCurrentAccount,
    OverrideLinkedAccount,
    Merge,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingChallenge {
    pub identifier: OtpIdentifier,
    pub issued_at_ms: TimestampMs,
    pub expires_at_ms: TimestampMs,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthState {
    pub stage: AuthStage,
    pub auth_level: AuthLevel,
    pub auth_method: Option<AuthStrategy>,
    pub linked_accounts: Vec<Profile>,
    pub auth_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub challenge_ttl_ms: u64,
    pub max_attempts: u32,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            challenge_ttl_ms: 10 * 60 * 1000,
            max_attempts: 5,
        }
    }
}

#[derive(Debug)]
struct AuthInner {
    stage: AuthStage,
    level: AuthLevel,
    method: Option<AuthStrategy>,
    linked: Vec<Profile>,
    token: Option<String>,
    challenges: HashMap<OtpIdentifier, PendingChallenge>,
    passkey: Option<PasskeyChallenge>,
}

impl Default for AuthInner {
    fn default() -> Self {
        Self {
            stage: AuthStage::Ready,
            level: AuthLevel::Basic,
            method: None,
            linked: Vec::new(),
            token: None,
            challenges: HashMap::new(),
            passkey: None,
        }
    }
}

impl AuthInner {
    fn apply(&mut self, action: AuthAction) -> WalletResult<()> {
        let (stage, level, transition) = auth_transition(self.stage, self.level, action)?;
        tracing::debug!(
            from = ?transition.from,
            to = ?transition.to,
            reason = transition.reason,
            "auth transition"
        );
        self.stage = stage;
        self.level = level;
        Ok(())
    }

    /// Challenge bookkeeping while already signed in (linking) leaves the
    /// terminal stage alone.
    fn apply_unless_authenticated(&mut self, action: AuthAction) -> WalletResult<()> {
        if self.token.is_some() {
            return Ok(());
        }
        self.apply(action)
    }
}

pub struct Authenticator {
    client_id: String,
    port: Arc<dyn AuthPort>,
    clock: Arc<dyn ClockPort>,
    settings: AuthSettings,
    ready: OnceCell<()>,
    inner: Mutex<AuthInner>,
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("client_id", &self.client_id)
            .field("settings", &self.settings)
            .finish()
    }
}

impl Authenticator {
    pub fn new(
        client_id: impl Into<String>,
        port: Arc<dyn AuthPort>,
        clock: Arc<dyn ClockPort>,
        settings: AuthSettings,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            port,
            clock,
            settings,
            ready: OnceCell::new(),
            inner: Mutex::new(AuthInner::default()),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    fn lock(&self) -> WalletResult<MutexGuard<'_, AuthInner>> {
        self.inner
            .lock()
            .map_err(|e| WalletError::Transport(format!("auth lock poisoned: {e}")))
    }

    pub fn state(&self) -> WalletResult<AuthState> {
        let g = self.lock()?;
        Ok(AuthState {
            stage: g.stage,
            auth_level: g.level,
            auth_method: g.method,
            linked_accounts: g.linked.clone(),
            auth_token: g.token.clone(),
        })
    }

    pub fn auth_token(&self) -> WalletResult<Option<String>> {
        Ok(self.lock()?.token.clone())
    }

    pub fn pending_challenge(&self, identifier: &OtpIdentifier) -> WalletResult<Option<PendingChallenge>> {
        Ok(self.lock()?.challenges.get(identifier).cloned())
    }

    async fn pre_login(&self) -> WalletResult<()> {
        self.ready
            .get_or_try_init(|| async { self.port.ensure_ready().await })
            .await?;
        Ok(())
    }

    /// First OTP step: asks the backend to deliver a code.
    pub async fn initiate_otp(&self, identifier: OtpIdentifier) -> WalletResult<PendingChallenge> {
        self.pre_login().await?;
        self.port.send_otp(&identifier).await?;
        let now = self.clock.now_ms()?;
        let challenge = PendingChallenge {
            identifier: identifier.clone(),
            issued_at_ms: TimestampMs(now),
            expires_at_ms: TimestampMs(now.saturating_add(self.settings.challenge_ttl_ms)),
            attempts: 0,
        };
        let mut g = self.lock()?;
        g.challenges.insert(identifier.clone(), challenge.clone());
        g.apply_unless_authenticated(AuthAction::IssueChallenge)?;
        tracing::info!(identifier = %identifier.redacted(), "otp challenge issued");
        Ok(challenge)
    }

    /// Second OTP step. A wrong code leaves the challenge pending.
    pub async fn complete_otp(
        &self,
        identifier: OtpIdentifier,
        code: impl Into<String>,
    ) -> WalletResult<AuthLoginReturn> {
        self.login(LoginRequest::Otp {
            identifier,
            code: code.into(),
        })
        .await
    }

    pub async fn begin_passkey(
        &self,
        relying_party: RelyingParty,
        kind: PasskeyKind,
    ) -> WalletResult<PasskeyChallenge> {
        self.pre_login().await?;
        let challenge = self.port.passkey_challenge(&relying_party, kind).await?;
        let mut g = self.lock()?;
        g.passkey = Some(challenge.clone());
        g.apply_unless_authenticated(AuthAction::IssueChallenge)?;
        Ok(challenge)
    }

    pub fn oauth_login_url(&self, provider: &str, redirect_url: &str) -> WalletResult<String> {
        self.port.oauth_login_url(provider, redirect_url)
    }

    pub async fn login(&self, request: LoginRequest) -> WalletResult<AuthLoginReturn> {
        self.pre_login().await?;
        let strategy = request.strategy();
        let second_factor = request.is_second_factor();
        let raw = match self.execute(request).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(?strategy, error = %e, "login failed");
                return Err(e);
            }
        };
        match self.post_login(raw, strategy, second_factor).await {
            Ok(login) => Ok(login),
            Err(e) => {
                tracing::warn!(?strategy, error = %e, "login failed after verification");
                self.release_second_factor()?;
                Err(e)
            }
        }
    }

    /// A verified challenge is already consumed; without another one pending
    /// the second-factor stage has nothing left to wait for.
    fn release_second_factor(&self) -> WalletResult<()> {
        let mut g = self.lock()?;
        if g.stage == AuthStage::NeedsSecondFactor && g.challenges.is_empty() && g.passkey.is_none()
        {
            g.apply_unless_authenticated(AuthAction::ExpireChallenge)?;
        }
        Ok(())
    }

    async fn execute(&self, request: LoginRequest) -> WalletResult<AuthResponse> {
        match request {
            LoginRequest::Otp { identifier, code } => self.verify_otp(&identifier, &code).await,
            LoginRequest::OAuth(callback) => self.port.oauth_callback(&callback).await,
            LoginRequest::Passkey(assertion) => {
                {
                    let g = self.lock()?;
                    match g.passkey.as_ref() {
                        Some(c) if c.challenge == assertion.challenge => {}
                        _ => {
                            return Err(WalletError::AuthChallengeExpired(
                                "passkey".to_owned(),
                            ))
                        }
                    }
                }
                let raw = self.port.passkey_verify(&assertion).await?;
                self.lock()?.passkey = None;
                Ok(raw)
            }
            LoginRequest::Jwt {
                jwt,
                encryption_key,
            } => self.port.jwt_login(&jwt, &encryption_key).await,
            LoginRequest::AuthEndpoint {
                payload,
                encryption_key,
            } => {
                self.port
                    .auth_endpoint_login(&payload, &encryption_key)
                    .await
            }
            LoginRequest::Modal(raw) => Ok(raw),
        }
    }

    async fn verify_otp(&self, identifier: &OtpIdentifier, code: &str) -> WalletResult<AuthResponse> {
        let now = self.clock.now_ms()?;
        {
            let mut g = self.lock()?;
            let expired = match g.challenges.get(identifier) {
                None => true,
                Some(c) => c.expires_at_ms.0 <= now,
            };
            if expired {
                if g.challenges.remove(identifier).is_some() && g.challenges.is_empty() {
                    g.apply_unless_authenticated(AuthAction::ExpireChallenge)?;
                }
                return Err(WalletError::AuthChallengeExpired(identifier.redacted()));
            }
        }

        match self.port.verify_otp(identifier, code).await {
            Ok(raw) => {
                self.lock()?.challenges.remove(identifier);
                Ok(raw)
            }
            Err(WalletError::AuthChallengeInvalid(_)) => {
                let mut g = self.lock()?;
                let attempts = match g.challenges.get_mut(identifier) {
                    Some(c) => {
                        c.attempts += 1;
                        c.attempts
                    }
                    None => return Err(WalletError::AuthChallengeExpired(identifier.redacted())),
                };
                if attempts >= self.settings.max_attempts {
                    g.challenges.remove(identifier);
                    if g.challenges.is_empty() {
                        g.apply_unless_authenticated(AuthAction::ExpireChallenge)?;
                    }
                    return Err(WalletError::AuthChallengeExpired(identifier.redacted()));
                }
                g.apply_unless_authenticated(AuthAction::RejectCode)?;
                Err(WalletError::AuthChallengeInvalid(identifier.redacted()))
            }
            Err(WalletError::AuthChallengeExpired(_)) => {
                let mut g = self.lock()?;
                g.challenges.remove(identifier);
                if g.challenges.is_empty() {
                    g.apply_unless_authenticated(AuthAction::ExpireChallenge)?;
                }
                Err(WalletError::AuthChallengeExpired(identifier.redacted()))
            }
            Err(e) => Err(e),
        }
    }

    async fn post_login(
        &self,
        raw: AuthResponse,
        strategy: AuthStrategy,
        second_factor: bool,
    ) -> WalletResult<AuthLoginReturn> {
        if raw.auth_token.trim().is_empty() {
            return Err(WalletError::Auth(format!(
                "{strategy:?} login returned an empty auth token"
            )));
        }
        let wallet_address = match raw.wallet_address {
            Some(address) => address,
            None => self.port.wallet_address(&raw.auth_token).await?,
        };
        let linked = match self.port.linked_profiles(&raw.auth_token).await {
            Ok(profiles) => profiles,
            Err(e) => {
                tracing::warn!(error = %e, "failed to load linked profiles after login");
                Vec::new()
            }
        };

        {
            let mut g = self.lock()?;
            let action = if second_factor && g.stage == AuthStage::NeedsSecondFactor {
                AuthAction::VerifySecondFactor
            } else {
                AuthAction::CompleteSingleStep
            };
            g.apply(action)?;
            g.challenges.clear();
            g.passkey = None;
            g.method = Some(strategy);
            g.linked = linked;
            g.token = Some(raw.auth_token.clone());
        }

        tracing::info!(?strategy, address = %wallet_address, "login complete");
        Ok(AuthLoginReturn {
            user: AuthUser {
                wallet_address,
                email: raw.email,
                phone: raw.phone,
            },
            auth_token: raw.auth_token,
            auth_method: strategy,
            is_new_user: raw.is_new_user,
        })
    }

    fn require_token(&self) -> WalletResult<String> {
        self.auth_token()?
            .ok_or_else(|| WalletError::Auth("not authenticated".to_owned()))
    }

    /// Attaches another identity to the signed-in account. `policy` decides
    /// what happens when that identity already belongs to another account.
    pub async fn link_profile(
        &self,
        request: LoginRequest,
        policy: LinkConflictPolicy,
    ) -> WalletResult<Vec<Profile>> {
        let token = self.require_token()?;
        self.pre_login().await?;
        let proof = self.execute(request).await?;
        if proof.auth_token.trim().is_empty() {
            return Err(WalletError::Auth(
                "link proof returned an empty auth token".to_owned(),
            ));
        }

        let profiles = match self.port.link_profile(&token, &proof.auth_token).await? {
            LinkOutcome::Linked { profiles } => profiles,
            LinkOutcome::Conflict { existing_account } => match policy {
                LinkConflictPolicy::Error => {
                    return Err(WalletError::AuthLinkConflict(format!(
                        "profile already linked to {existing_account}"
                    )))
                }
                LinkConflictPolicy::OverrideCurrentAccount
                | LinkConflictPolicy::OverrideLinkedAccount
                | LinkConflictPolicy::Merge => {
                    tracing::info!(?policy, "resolving profile link conflict");
                    self.port
                        .resolve_link_conflict(&token, &proof.auth_token, policy)
                        .await?
                }
            },
        };
        self.lock()?.linked = profiles.clone();
        Ok(profiles)
    }

    pub async fn linked_profiles(&self) -> WalletResult<Vec<Profile>> {
        let token = self.require_token()?;
        let profiles = self.port.linked_profiles(&token).await?;
        self.lock()?.linked = profiles.clone();
        Ok(profiles)
    }

    pub async fn unlink_profile(&self, profile: &Profile) -> WalletResult<Vec<Profile>> {
        let token = self.require_token()?;
        let profiles = self.port.unlink_profile(&token, profile).await?;
        self.lock()?.linked = profiles.clone();
        Ok(profiles)
    }

    /// Adopts a token saved from an earlier session. The backend must still
    /// accept it.
    pub async fn restore(&self, auth_token: String) -> WalletResult<Address> {
        self.pre_login().await?;
        let address = self.port.wallet_address(&auth_token).await?;
        let linked = match self.port.linked_profiles(&auth_token).await {
            Ok(profiles) => profiles,
            Err(e) => {
                tracing::warn!(error = %e, "failed to load linked profiles for restored session");
                Vec::new()
            }
        };
        let mut g = self.lock()?;
        g.apply(AuthAction::CompleteSingleStep)?;
        g.challenges.clear();
        g.passkey = None;
        g.method = None;
        g.linked = linked;
        g.token = Some(auth_token);
        tracing::info!(%address, "session restored");
        Ok(address)
    }

    pub async fn logout(&self) -> WalletResult<()> {
        let token = {
            let mut g = self.lock()?;
            let token = g.token.take();
            g.apply(AuthAction::Logout)?;
            g.method = None;
            g.linked.clear();
            g.challenges.clear();
            g.passkey = None;
            token
        };
        if let Some(token) = token {
            self.port.logout(&token).await?;
        }
        Ok(())
    }
}

/// Authenticators keyed by client id. Grows with every distinct client id;
/// there is no eviction.
#[derive(Default)]
pub struct AuthClientCache {
    clients: Mutex<HashMap<String, Arc<Authenticator>>>,
}

impl AuthClientCache {
    pub fn get_or_create(
        &self,
        client_id: &str,
        create: impl FnOnce() -> Authenticator,
    ) -> WalletResult<Arc<Authenticator>> {
        let mut g = self
            .clients
            .lock()
            .map_err(|e| WalletError::Transport(format!("auth cache lock poisoned: {e}")))?;
        Ok(Arc::clone(
            g.entry(client_id.to_owned())
                .or_insert_with(|| Arc::new(create())),
        ))
    }

    pub fn len(&self) -> usize {
        self.clients.lock().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
