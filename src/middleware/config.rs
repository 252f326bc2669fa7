use axum_extra::extract::cookie::Key;
use subtle::ConstantTimeEq;

use super::error::AuthError;
use crate::cloud::CloudSettings;
use crate::oauth::{ProbeTarget, ProviderSettings};

/// Minimum `SECRET_KEY` length accepted for cookie key derivation.
const MIN_SECRET_LEN: usize = 32;

/// Static login/password pair for local sign-in.
///
/// An empty pair disables local sign-in entirely.
#[derive(Clone, Default)]
pub struct StaticCredentials {
    username: String,
    password: String,
}

impl StaticCredentials {
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }

    /// Constant-time comparison of both halves.
    #[must_use]
    pub fn verify(&self, username: &str, password: &str) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let user_ok = username.as_bytes().ct_eq(self.username.as_bytes());
        let pass_ok = password.as_bytes().ct_eq(self.password.as_bytes());
        (user_ok & pass_ok).into()
    }
}

impl std::fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Runtime settings shared by the route handlers.
#[derive(Clone)]
pub(crate) struct GatewaySettings {
    pub(crate) cookie_key: Key,
    pub(crate) session_cookie_name: String,
    pub(crate) secure_cookies: bool,
    pub(crate) insecure_tls: bool,
    pub(crate) credentials: StaticCredentials,
    pub(crate) home_path: String,
}

impl GatewaySettings {
    fn defaults() -> Self {
        Self {
            cookie_key: Key::generate(),
            session_cookie_name: "__gateway_session".into(),
            secure_cookies: true,
            insecure_tls: false,
            credentials: StaticCredentials::default(),
            home_path: "/".into(),
        }
    }
}

/// Gateway configuration, built once at startup.
///
/// Use [`from_env()`](GatewayConfig::from_env) for the deployed setup, or
/// [`new()`](GatewayConfig::new) with `with_*` methods for full control.
pub struct GatewayConfig {
    pub(super) provider: ProviderSettings,
    pub(super) cloud: CloudSettings,
    pub(super) settings: GatewaySettings,
}

impl GatewayConfig {
    /// Create config with the provider settings.
    ///
    /// The cookie key is ephemeral unless overridden with [`with_cookie_key`](Self::with_cookie_key).
    #[must_use]
    pub fn new(provider: ProviderSettings) -> Self {
        Self {
            provider,
            cloud: CloudSettings::default(),
            settings: GatewaySettings::defaults(),
        }
    }

    /// Create config from environment variables.
    ///
    /// # Required env vars
    /// - `SECRET_KEY`: cookie encryption secret, at least 32 bytes
    ///
    /// # Optional env vars
    /// - `APP_USERNAME`, `APP_PASSWORD`: static credential pair
    /// - `KEYCLOAK_URL`, `KEYCLOAK_REALM`, `KEYCLOAK_CLIENT_ID`, `APP_ORIGIN`:
    ///   required for Keycloak login, checked when a login starts
    /// - `KEYCLOAK_CLIENT_SECRET`: for confidential clients
    /// - `KEYCLOAK_SCOPES`: comma-separated scopes
    /// - `KEYCLOAK_PROBE`: `0`/`false` disables the liveness probe
    /// - `KEYCLOAK_PROBE_URL`: probe target (default: `KEYCLOAK_URL`)
    /// - `CLOUD_CLIENT_ID`, `CLOUD_CLIENT_SECRET`: service key pair for VM counts
    /// - `CLOUD_IAM_URL`, `CLOUD_COMPUTE_URL`: cloud API base URLs
    /// - `DEV_INSECURE_TLS`: `1`/`true` disables TLS verification and secure cookies
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if `SECRET_KEY` is missing or too short.
    pub fn from_env() -> Result<Self, AuthError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if `SECRET_KEY` is missing or too short.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AuthError> {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let flag = |name: &str| matches!(var(name).as_deref(), Some("1" | "true"));

        let secret = var("SECRET_KEY")
            .ok_or_else(|| AuthError::Config("SECRET_KEY environment variable must be set".into()))?;
        if secret.len() < MIN_SECRET_LEN {
            return Err(AuthError::Config(format!(
                "SECRET_KEY must be at least {MIN_SECRET_LEN} bytes"
            )));
        }
        let cookie_key = Key::derive_from(secret.as_bytes());

        let mut provider = ProviderSettings::default()
            .with_base_url(var("KEYCLOAK_URL").unwrap_or_default())
            .with_realm(var("KEYCLOAK_REALM").unwrap_or_default())
            .with_client_id(var("KEYCLOAK_CLIENT_ID").unwrap_or_default())
            .with_client_secret(var("KEYCLOAK_CLIENT_SECRET").unwrap_or_default())
            .with_app_origin(var("APP_ORIGIN").unwrap_or_default());
        if let Some(scopes) = var("KEYCLOAK_SCOPES") {
            provider = provider.with_scopes(
                scopes
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            );
        }
        if matches!(var("KEYCLOAK_PROBE").as_deref(), Some("0" | "false")) {
            provider = provider.with_probe(ProbeTarget::Disabled);
        } else if let Some(url) = var("KEYCLOAK_PROBE_URL") {
            provider = provider.with_probe(ProbeTarget::Url(url));
        }

        let mut cloud = CloudSettings::default().with_credentials(
            var("CLOUD_CLIENT_ID").unwrap_or_default(),
            var("CLOUD_CLIENT_SECRET").unwrap_or_default(),
        );
        if let Some(url) = var("CLOUD_IAM_URL") {
            cloud = cloud.with_iam_url(url);
        }
        if let Some(url) = var("CLOUD_COMPUTE_URL") {
            cloud = cloud.with_compute_url(url);
        }

        let dev_insecure = flag("DEV_INSECURE_TLS");

        Ok(Self::new(provider)
            .with_cloud(cloud)
            .with_cookie_key(cookie_key)
            .with_credentials(StaticCredentials::new(
                var("APP_USERNAME").unwrap_or_default(),
                var("APP_PASSWORD").unwrap_or_default(),
            ))
            .with_secure_cookies(!dev_insecure)
            .with_insecure_tls(dev_insecure))
    }

    #[must_use]
    pub fn with_cloud(mut self, cloud: CloudSettings) -> Self {
        self.cloud = cloud;
        self
    }

    #[must_use]
    pub fn with_cookie_key(mut self, key: Key) -> Self {
        self.settings.cookie_key = key;
        self
    }

    #[must_use]
    pub fn with_session_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.settings.session_cookie_name = name.into();
        self
    }

    #[must_use]
    pub fn with_credentials(mut self, credentials: StaticCredentials) -> Self {
        self.settings.credentials = credentials;
        self
    }

    #[must_use]
    pub fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.settings.secure_cookies = secure;
        self
    }

    /// Disable TLS certificate validation for outbound calls. Development only.
    #[must_use]
    pub fn with_insecure_tls(mut self, insecure: bool) -> Self {
        self.settings.insecure_tls = insecure;
        self
    }

    #[must_use]
    pub fn with_home_path(mut self, path: impl Into<String>) -> Self {
        self.settings.home_path = path.into();
        self
    }
}
