use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, ExchangeError};
use crate::pkce;

/// Path of the callback route, relative to the app origin.
pub const CALLBACK_PATH: &str = "/oauth/keycloak/callback";

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Raw Keycloak settings as read at startup.
///
/// Values may be absent: the gateway still serves static logins, and flow
/// initiation reports [`Error::Configuration`] until they are filled in.
///
/// ```rust,ignore
/// let settings = ProviderSettings::default()
///     .with_base_url("https://keycloak.example.com")
///     .with_realm("my-realm")
///     .with_client_id("gateway")
///     .with_app_origin("https://gateway.example.com");
/// let config = settings.resolve()?;
/// ```
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub(crate) base_url: Option<String>,
    pub(crate) realm: Option<String>,
    pub(crate) client_id: Option<String>,
    pub(crate) client_secret: Option<String>,
    pub(crate) app_origin: Option<String>,
    pub(crate) scopes: Vec<String>,
    pub(crate) probe: ProbeTarget,
}

/// Where the pre-flight liveness probe goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeTarget {
    /// No probe; initiation never fails as unreachable.
    Disabled,
    /// Probe the provider base URL.
    BaseUrl,
    /// Probe an explicit URL.
    Url(String),
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            realm: None,
            client_id: None,
            client_secret: None,
            app_origin: None,
            scopes: vec!["openid".into(), "profile".into(), "email".into()],
            probe: ProbeTarget::BaseUrl,
        }
    }
}

impl ProviderSettings {
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = non_empty(url.into());
        self
    }

    #[must_use]
    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = non_empty(realm.into());
        self
    }

    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = non_empty(client_id.into());
        self
    }

    /// Client secret for confidential clients; public clients leave it unset.
    #[must_use]
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = non_empty(secret.into());
        self
    }

    #[must_use]
    pub fn with_app_origin(mut self, origin: impl Into<String>) -> Self {
        self.app_origin = non_empty(origin.into());
        self
    }

    /// Override the requested scopes (default: `["openid", "profile", "email"]`).
    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    #[must_use]
    pub fn with_probe(mut self, probe: ProbeTarget) -> Self {
        self.probe = probe;
        self
    }

    /// Derive the provider endpoints and redirect URI.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] naming the first missing or invalid value.
    pub fn resolve(&self) -> Result<OAuthConfig, Error> {
        let base_url = require(self.base_url.as_deref(), "KEYCLOAK_URL")?;
        let realm = require(self.realm.as_deref(), "KEYCLOAK_REALM")?;
        let client_id = require(self.client_id.as_deref(), "KEYCLOAK_CLIENT_ID")?;
        let app_origin = require(self.app_origin.as_deref(), "APP_ORIGIN")?;

        let base = base_url.trim_end_matches('/');
        let realm = urlencoding::encode(realm);
        let endpoint = |name: &str| {
            parse_url(
                &format!("{base}/auth/realms/{realm}/protocol/openid-connect/{name}"),
                "KEYCLOAK_URL",
            )
        };

        let probe_url = match &self.probe {
            ProbeTarget::Disabled => None,
            ProbeTarget::BaseUrl => Some(parse_url(base, "KEYCLOAK_URL")?),
            ProbeTarget::Url(url) => Some(parse_url(url, "KEYCLOAK_PROBE_URL")?),
        };

        Ok(OAuthConfig {
            client_id: client_id.to_string(),
            client_secret: self.client_secret.clone(),
            auth_url: endpoint("auth")?,
            token_url: endpoint("token")?,
            userinfo_url: endpoint("userinfo")?,
            redirect_uri: parse_url(
                &format!("{}{CALLBACK_PATH}", app_origin.trim_end_matches('/')),
                "APP_ORIGIN",
            )?,
            scopes: self.scopes.clone(),
            probe_url,
        })
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn require<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str, Error> {
    value.ok_or_else(|| Error::Configuration(format!("{name} is not configured")))
}

fn parse_url(value: &str, name: &str) -> Result<Url, Error> {
    value
        .parse()
        .map_err(|e| Error::Configuration(format!("{name}: {e}")))
}

/// Resolved Keycloak endpoints for one realm and client.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    client_id: String,
    client_secret: Option<String>,
    auth_url: Url,
    token_url: Url,
    userinfo_url: Url,
    redirect_uri: Url,
    scopes: Vec<String>,
    probe_url: Option<Url>,
}

impl OAuthConfig {
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn auth_url(&self) -> &Url {
        &self.auth_url
    }

    #[must_use]
    pub fn token_url(&self) -> &Url {
        &self.token_url
    }

    #[must_use]
    pub fn userinfo_url(&self) -> &Url {
        &self.userinfo_url
    }

    /// Redirect URI sent with both the authorization request and the code exchange.
    #[must_use]
    pub fn redirect_uri(&self) -> &Url {
        &self.redirect_uri
    }

    #[must_use]
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }
}

/// Authorization URL with the PKCE values to keep in the session.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct AuthorizationRequest {
    pub url: String,
    pub state: String,
    pub code_verifier: String,
    pub code_challenge: String,
}

/// Identity claims from the Keycloak userinfo endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct UserInfo {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub cloud_project_id: Option<String>,
}

impl UserInfo {
    /// `preferred_username`, falling back to `name`.
    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        self.preferred_username
            .as_deref()
            .or(self.name.as_deref())
    }

    /// Project identifier, ignoring blank values.
    #[must_use]
    pub fn project_id(&self) -> Option<&str> {
        self.cloud_project_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Default, Deserialize)]
struct TokenEndpointResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// `OAuth2` authorization-code client for one Keycloak realm.
pub struct AuthClient {
    config: Result<OAuthConfig, String>,
    http: reqwest::Client,
}

impl AuthClient {
    /// Create a client from raw settings.
    ///
    /// Incomplete settings are kept and reported on each use.
    #[must_use]
    pub fn new(settings: &ProviderSettings, http: reqwest::Client) -> Self {
        let config = settings.resolve().map_err(|e| match e {
            Error::Configuration(msg) => msg,
            other => other.to_string(),
        });
        if let Err(msg) = &config {
            tracing::warn!(reason = %msg, "Keycloak login disabled until configured");
        }
        Self { config, http }
    }

    /// Resolved configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the settings were incomplete.
    pub fn config(&self) -> Result<&OAuthConfig, Error> {
        self.config
            .as_ref()
            .map_err(|msg| Error::Configuration(msg.clone()))
    }

    /// Check that the provider host answers at all.
    ///
    /// Any HTTP response counts as reachable; only transport failures fail.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProviderUnreachable`] on connect failure or timeout.
    pub async fn probe(&self) -> Result<(), Error> {
        let Some(url) = self.config()?.probe_url.clone() else {
            return Ok(());
        };

        match self.http.get(url).timeout(PROBE_TIMEOUT).send().await {
            Ok(response) => {
                tracing::debug!(status = %response.status(), "Keycloak probe answered");
                Ok(())
            }
            Err(e) => Err(Error::ProviderUnreachable(e.to_string())),
        }
    }

    /// Generate an authorization URL with fresh PKCE and state values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the settings were incomplete.
    pub fn authorization_url(&self) -> Result<AuthorizationRequest, Error> {
        let config = self.config()?;
        let state = pkce::generate_state();
        let code_verifier = pkce::generate_code_verifier();
        let code_challenge = pkce::generate_code_challenge(&code_verifier);
        let scope = config.scopes.join(" ");

        let mut url = config.auth_url.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &config.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", config.redirect_uri.as_str())
            .append_pair("scope", &scope)
            .append_pair("state", &state)
            .append_pair("code_challenge", &code_challenge)
            .append_pair("code_challenge_method", "S256");

        Ok(AuthorizationRequest {
            url: url.into(),
            state,
            code_verifier,
            code_challenge,
        })
    }

    /// Exchange an authorization code for an access token using PKCE.
    ///
    /// Single attempt; authorization codes are single-use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the settings were incomplete and
    /// [`Error::Exchange`] for transport failures, provider rejections, or a
    /// response without `access_token`.
    pub async fn exchange_code(&self, code: &str, code_verifier: &str) -> Result<String, Error> {
        let config = self.config()?;

        let mut params = vec![
            ("client_id", config.client_id.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", config.redirect_uri.as_str()),
            ("code_verifier", code_verifier),
        ];
        if let Some(secret) = config.client_secret.as_deref() {
            params.push(("client_secret", secret));
        }

        let response = self
            .http
            .post(config.token_url.clone())
            .form(&params)
            .send()
            .await
            .map_err(ExchangeError::from)?;

        let status = response.status();
        let body = response.text().await.map_err(ExchangeError::from)?;
        let payload: TokenEndpointResponse = serde_json::from_str(&body).unwrap_or_default();

        if !status.is_success() || payload.error.is_some() {
            return Err(ExchangeError::Rejected {
                status: status.as_u16(),
                error: payload.error.unwrap_or_else(|| "invalid_response".into()),
                description: payload.error_description.unwrap_or_default(),
            }
            .into());
        }

        payload
            .access_token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ExchangeError::MissingAccessToken.into())
    }

    /// Fetch identity claims using an access token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IdentityLookup`] on network failure, a non-success
    /// status, or an unparseable payload.
    pub async fn get_user_info(&self, access_token: &str) -> Result<UserInfo, Error> {
        let config = self.config()?;
        let lookup = |e: reqwest::Error| Error::IdentityLookup(e.to_string());

        let response = self
            .http
            .get(config.userinfo_url.clone())
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(lookup)?;

        if !response.status().is_success() {
            return Err(Error::IdentityLookup(format!(
                "userinfo answered {}",
                response.status()
            )));
        }
        response.json::<UserInfo>().await.map_err(lookup)
    }

    /// Best-effort identity lookup: failures are logged and read as "no identity".
    pub async fn fetch_identity(&self, access_token: &str) -> Option<UserInfo> {
        match self.get_user_info(access_token).await {
            Ok(info) => Some(info),
            Err(e) => {
                tracing::warn!(error = %e, "Userinfo unavailable, continuing without identity");
                None
            }
        }
    }
}
