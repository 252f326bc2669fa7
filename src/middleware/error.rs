use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use super::types::InitFailure;
use crate::error::{Error, ExchangeError};

/// Errors surfaced directly as HTTP responses.
///
/// Callback failures never reach this type: they become an error flash and a
/// redirect home.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Starting a Keycloak login failed.
    #[error("{0}")]
    Initiation(Error),

    /// Session store operation failed.
    #[error("Session store error: {0}")]
    Store(String),

    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        match self {
            Self::Initiation(ref e) => {
                tracing::warn!(reason = e.reason(), error = %e, "Keycloak login not started");
                let body = InitFailure {
                    success: false,
                    error: user_message(e),
                };
                (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
            }
            Self::Store(_) | Self::Config(_) => {
                tracing::error!(error = %self, "Gateway internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response()
            }
        }
    }
}

impl From<Error> for AuthError {
    fn from(e: Error) -> Self {
        match e {
            Error::Store(msg) => Self::Store(msg),
            other => Self::Initiation(other),
        }
    }
}

/// Text shown to the user for a failed login.
pub(crate) fn user_message(e: &Error) -> String {
    match e {
        Error::Configuration(msg) => format!("Keycloak not configured: {msg}"),
        Error::ProviderUnreachable(_) => "Network issues with Keycloak".into(),
        Error::ProviderDenied { error, description } if description.is_empty() => {
            format!("Keycloak authorization error: {error}")
        }
        Error::ProviderDenied { error, description } => {
            format!("Keycloak authorization error ({error}): {description}")
        }
        Error::CsrfMismatch => "Security error: invalid state parameter".into(),
        Error::MissingCode => "Error: authorization code not received".into(),
        Error::MissingVerifier => "Error: PKCE verifier not found".into(),
        Error::Exchange(ExchangeError::Rejected {
            error, description, ..
        }) => {
            let detail = if description.is_empty() { error } else { description };
            format!("Token exchange error: {detail}")
        }
        Error::Exchange(ExchangeError::MissingAccessToken) => {
            "Error: access token not received".into()
        }
        Error::Exchange(e) => format!("API error: {e}"),
        other => format!("Login failed: {}", other.reason()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_denied_message_names_provider_code() {
        let msg = user_message(&Error::ProviderDenied {
            error: "access_denied".into(),
            description: "User denied consent".into(),
        });
        assert!(msg.contains("access_denied"));
        assert!(msg.contains("User denied consent"));
    }

    #[test]
    fn test_configuration_is_reported_to_user() {
        let err = AuthError::from(Error::Configuration("APP_ORIGIN is not configured".into()));
        assert!(matches!(err, AuthError::Initiation(Error::Configuration(_))));
    }

    #[test]
    fn test_unreachable_maps_to_initiation() {
        let err = AuthError::from(Error::ProviderUnreachable("refused".into()));
        assert_eq!(
            err.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
