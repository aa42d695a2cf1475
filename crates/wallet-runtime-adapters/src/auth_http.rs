//! HTTP client for the embedded-account authentication service.

use std::time::Duration;

use alloy::primitives::Address;
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use wallet_runtime_core::{
    AuthPort, AuthResponse, LinkConflictPolicy, LinkOutcome, OAuthCallback, OtpIdentifier,
    PasskeyAssertion, PasskeyChallenge, PasskeyKind, Profile, RelyingParty, WalletError,
    WalletResult,
};

use crate::config::RuntimeConfig;

const BACKEND: &str = "auth";

#[derive(Debug, Clone)]
pub struct HttpAuthClient {
    client: reqwest::Client,
    base_url: String,
    client_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddressBody {
    wallet_address: Address,
}

#[derive(Deserialize)]
struct ProfilesBody {
    profiles: Vec<Profile>,
}

impl HttpAuthClient {
    pub fn new(
        base_url: impl Into<String>,
        client_id: impl Into<String>,
        timeout_ms: u64,
    ) -> WalletResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| WalletError::Transport(format!("auth client init failed: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            client_id: client_id.into(),
        })
    }

    pub fn from_config(config: &RuntimeConfig) -> WalletResult<Self> {
        Self::new(
            config.auth_base_url.clone(),
            config.client_id.clone(),
            config.rpc_timeout_ms,
        )
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> WalletResult<(StatusCode, Option<reqwest::Response>)> {
        let mut req = self
            .client
            .request(method, format!("{}{path}", self.base_url))
            .header("x-client-id", &self.client_id);
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        if let Some(body) = body {
            req = req.json(&body);
        }
        let response = req
            .send()
            .await
            .map_err(|e| WalletError::Transport(format!("auth request {path} failed: {e}")))?;
        let status = response.status();
        if status.is_success() {
            Ok((status, Some(response)))
        } else {
            tracing::debug!(path, status = status.as_u16(), "auth request rejected");
            Ok((status, None))
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> WalletResult<T> {
        match self.send(method, path, token, body).await? {
            (_, Some(response)) => decode(response, path).await,
            (status, None) => Err(http_error(status)),
        }
    }

    async fn call_unit(&self, path: &str, token: Option<&str>, body: Value) -> WalletResult<()> {
        match self.send(Method::POST, path, token, Some(body)).await? {
            (_, Some(_)) => Ok(()),
            (status, None) => Err(http_error(status)),
        }
    }
}

fn http_error(status: StatusCode) -> WalletError {
    WalletError::HttpTransport {
        backend: BACKEND.to_owned(),
        status: status.as_u16(),
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response, path: &str) -> WalletResult<T> {
    response
        .json()
        .await
        .map_err(|e| WalletError::ResponseParse(format!("auth {path} body: {e}")))
}

#[async_trait]
impl AuthPort for HttpAuthClient {
    async fn ensure_ready(&self) -> WalletResult<()> {
        self.call_unit("/v1/ready", None, json!({ "clientId": self.client_id }))
            .await
    }

    async fn send_otp(&self, identifier: &OtpIdentifier) -> WalletResult<()> {
        self.call_unit("/v1/otp/send", None, json!({ "identifier": identifier }))
            .await
    }

    async fn verify_otp(
        &self,
        identifier: &OtpIdentifier,
        code: &str,
    ) -> WalletResult<AuthResponse> {
        let body = json!({ "identifier": identifier, "code": code });
        match self
            .send(Method::POST, "/v1/otp/verify", None, Some(body))
            .await?
        {
            (_, Some(response)) => decode(response, "/v1/otp/verify").await,
            (StatusCode::UNAUTHORIZED | StatusCode::GONE, None) => {
                Err(WalletError::AuthChallengeExpired(identifier.redacted()))
            }
            (StatusCode::BAD_REQUEST | StatusCode::FORBIDDEN, None) => {
                Err(WalletError::AuthChallengeInvalid(identifier.redacted()))
            }
            (status, None) => Err(http_error(status)),
        }
    }

    fn oauth_login_url(&self, provider: &str, redirect_url: &str) -> WalletResult<String> {
        let url = reqwest::Url::parse_with_params(
            &format!("{}/v1/oauth/{provider}/login", self.base_url),
            &[("redirectUrl", redirect_url), ("clientId", self.client_id.as_str())],
        )
        .map_err(|e| WalletError::Validation(format!("invalid oauth login url: {e}")))?;
        Ok(url.to_string())
    }

    async fn oauth_callback(&self, callback: &OAuthCallback) -> WalletResult<AuthResponse> {
        self.call(Method::POST, "/v1/oauth/callback", None, Some(json!(callback)))
            .await
    }

    async fn passkey_challenge(
        &self,
        relying_party: &RelyingParty,
        kind: PasskeyKind,
    ) -> WalletResult<PasskeyChallenge> {
        self.call(
            Method::POST,
            "/v1/passkey/challenge",
            None,
            Some(json!({ "relyingParty": relying_party, "kind": kind })),
        )
        .await
    }

    async fn passkey_verify(&self, assertion: &PasskeyAssertion) -> WalletResult<AuthResponse> {
        self.call(Method::POST, "/v1/passkey/verify", None, Some(json!(assertion)))
            .await
    }

    async fn jwt_login(&self, jwt: &str, encryption_key: &str) -> WalletResult<AuthResponse> {
        self.call(
            Method::POST,
            "/v1/jwt",
            None,
            Some(json!({ "jwt": jwt, "encryptionKey": encryption_key })),
        )
        .await
    }

    async fn auth_endpoint_login(
        &self,
        payload: &str,
        encryption_key: &str,
    ) -> WalletResult<AuthResponse> {
        self.call(
            Method::POST,
            "/v1/auth-endpoint",
            None,
            Some(json!({ "payload": payload, "encryptionKey": encryption_key })),
        )
        .await
    }

    async fn wallet_address(&self, auth_token: &str) -> WalletResult<Address> {
        let body: AddressBody = self
            .call(Method::GET, "/v1/profiles/address", Some(auth_token), None)
            .await?;
        Ok(body.wallet_address)
    }

    async fn linked_profiles(&self, auth_token: &str) -> WalletResult<Vec<Profile>> {
        let body: ProfilesBody = self
            .call(Method::GET, "/v1/profiles", Some(auth_token), None)
            .await?;
        Ok(body.profiles)
    }

    async fn link_profile(
        &self,
        auth_token: &str,
        new_profile_token: &str,
    ) -> WalletResult<LinkOutcome> {
        self.call(
            Method::POST,
            "/v1/profiles/link",
            Some(auth_token),
            Some(json!({ "profileToken": new_profile_token })),
        )
        .await
    }

    async fn resolve_link_conflict(
        &self,
        auth_token: &str,
        new_profile_token: &str,
        policy: LinkConflictPolicy,
    ) -> WalletResult<Vec<Profile>> {
        let body: ProfilesBody = self
            .call(
                Method::POST,
                "/v1/profiles/resolve",
                Some(auth_token),
                Some(json!({ "profileToken": new_profile_token, "policy": policy })),
            )
            .await?;
        Ok(body.profiles)
    }

    async fn unlink_profile(
        &self,
        auth_token: &str,
        profile: &Profile,
    ) -> WalletResult<Vec<Profile>> {
        let body: ProfilesBody = self
            .call(
                Method::POST,
                "/v1/profiles/unlink",
                Some(auth_token),
                Some(json!(profile)),
            )
            .await?;
        Ok(body.profiles)
    }

    async fn logout(&self, auth_token: &str) -> WalletResult<()> {
        self.call_unit("/v1/logout", Some(auth_token), json!({}))
            .await
    }
}
