//! Axum routes for the login gateway.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use keycloak_gateway::middleware::{GatewayConfig, gateway_routes};
//! use keycloak_gateway::session::MemorySessionStore;
//!
//! let config = GatewayConfig::from_env()?;
//! let app = gateway_routes(config, MemorySessionStore::new())?;
//! ```
//!
//! | Route | |
//! |---|---|
//! | `GET /` | session view + pending flash messages |
//! | `POST /login`, `POST /logout` | static credential sign-in / sign-out |
//! | `POST /oauth/keycloak/init` | start Keycloak login, JSON answer |
//! | `GET /oauth/keycloak/login` | start Keycloak login, redirect answer |
//! | `GET /oauth/keycloak/callback` | provider redirect target |

mod config;
mod cookies;
mod error;
mod routes;
mod state;
mod types;

pub use config::{GatewayConfig, StaticCredentials};
pub use error::AuthError;
pub use routes::gateway_routes;
pub use types::{InitFailure, InitResponse, SessionView, UserInfoView};

/// Re-export cookie key type for builder API.
pub use axum_extra::extract::cookie::Key as CookieKey;
