//! Login gateway: static credentials or Keycloak `OAuth2` authorization code
//! with PKCE, followed by a cloud VM count for the user's project.

pub mod cloud;
pub mod error;
pub mod flow;
pub mod http;
pub mod middleware;
pub mod oauth;
pub mod pkce;
pub mod session;

// Re-exports for convenient access
pub use cloud::{CloudClient, CloudSettings, ResourceCounter};
pub use error::{Error, ExchangeError};
pub use flow::{CallbackParams, LoginFlow};
pub use oauth::{AuthClient, AuthorizationRequest, OAuthConfig, ProbeTarget, ProviderSettings, UserInfo};
pub use pkce::{generate_code_challenge, generate_code_verifier, generate_state};
pub use session::{AuthProvider, AuthenticatedSession, MemorySessionStore, PendingFlow, SessionStore};
