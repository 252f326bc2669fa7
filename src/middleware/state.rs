use axum::extract::FromRef;
use axum_extra::extract::cookie::Key;

use super::config::GatewaySettings;
use crate::cloud::ResourceCounter;
use crate::flow::LoginFlow;
use crate::session::SessionStore;

/// Shared state for gateway route handlers.
pub(super) struct AppState<S, C> {
    pub(super) flow: LoginFlow<S, C>,
    pub(super) settings: GatewaySettings,
}

// Manual Clone: avoid derive adding `S: Clone, C: Clone` bounds.
impl<S, C> Clone for AppState<S, C> {
    fn clone(&self) -> Self {
        Self {
            flow: self.flow.clone(),
            settings: self.settings.clone(),
        }
    }
}

// PrivateCookieJar requires Key to be extractable from state
impl<S: SessionStore, C: ResourceCounter> FromRef<AppState<S, C>> for Key {
    fn from_ref(state: &AppState<S, C>) -> Self {
        state.settings.cookie_key.clone()
    }
}
