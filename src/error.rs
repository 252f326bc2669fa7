/// Errors raised while running the login flow.
///
/// `IdentityLookup` and `ResourceLookup` are absorbed by the callback handler;
/// every other variant aborts the flow before the session is authenticated.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Required provider settings are missing or malformed.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Pre-flight liveness probe of the identity provider failed.
    #[error("Identity provider unreachable: {0}")]
    ProviderUnreachable(String),

    /// The provider redirected back with an `error` parameter.
    #[error("Provider returned {error}: {description}")]
    ProviderDenied { error: String, description: String },

    #[error("State parameter does not match a pending login")]
    CsrfMismatch,

    #[error("Authorization code missing from callback")]
    MissingCode,

    #[error("PKCE verifier not found for pending login")]
    MissingVerifier,

    #[error("Token exchange failed: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("Identity lookup failed: {0}")]
    IdentityLookup(String),

    #[error("Resource count unavailable: {0}")]
    ResourceLookup(String),

    #[error("Session store error: {0}")]
    Store(String),
}

/// Failure talking to the provider token endpoint.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ExchangeError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("token endpoint answered {status}: {error}: {description}")]
    Rejected {
        status: u16,
        error: String,
        description: String,
    },

    #[error("token response carried no access_token")]
    MissingAccessToken,
}

impl Error {
    /// Short machine-readable reason, used in logs and user-facing messages.
    #[must_use]
    pub fn reason(&self) -> &str {
        match self {
            Self::Configuration(_) => "configuration_error",
            Self::ProviderUnreachable(_) => "provider_unreachable",
            Self::ProviderDenied { error, .. } => error,
            Self::CsrfMismatch => "csrf_mismatch",
            Self::MissingCode => "missing_code",
            Self::MissingVerifier => "missing_verifier",
            Self::Exchange(_) => "exchange_error",
            Self::IdentityLookup(_) => "identity_lookup_failed",
            Self::ResourceLookup(_) => "resource_lookup_failed",
            Self::Store(_) => "session_store_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_denied_reason_is_provider_code() {
        let err = Error::ProviderDenied {
            error: "access_denied".into(),
            description: "User cancelled".into(),
        };
        assert_eq!(err.reason(), "access_denied");
        assert!(err.to_string().contains("access_denied"));
    }

    #[test]
    fn test_exchange_rejection_message() {
        let err = Error::from(ExchangeError::Rejected {
            status: 400,
            error: "invalid_grant".into(),
            description: "Code not valid".into(),
        });
        assert_eq!(err.reason(), "exchange_error");
        assert!(err.to_string().contains("invalid_grant"));
    }
}
