//! Outbound HTTP client shared by the Keycloak and cloud clients.

use std::time::Duration;

use crate::error::Error;

/// Timeout applied to every outbound request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the outbound HTTP client shared by the provider and cloud clients.
///
/// `insecure_tls` turns off certificate validation. It exists for development
/// against self-signed providers only.
///
/// # Errors
///
/// Returns [`Error::Configuration`] if the TLS backend cannot be initialised.
pub fn build_client(insecure_tls: bool) -> Result<reqwest::Client, Error> {
    let mut builder = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .timeout(REQUEST_TIMEOUT);

    if insecure_tls {
        tracing::warn!(
            "TLS certificate validation is DISABLED for outbound requests (DEV_INSECURE_TLS). \
             Never run this in production."
        );
        builder = builder.danger_accept_invalid_certs(true);
    }

    builder
        .build()
        .map_err(|e| Error::Configuration(format!("HTTP client: {e}")))
}
