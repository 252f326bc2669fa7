//! Authorization-code flow orchestration, independent of HTTP framing.
//!
//! A callback moves through
//! `Start → StateChecked → CodePresent → VerifierPresent → Exchanged → IdentityResolved → Finalized`.
//! Every failing transition returns an [`Error`] and leaves the session
//! unauthenticated. The pending flow is consumed on the first callback either
//! way, so a replayed callback fails the state check.

use std::sync::Arc;

use serde::Deserialize;
use subtle::ConstantTimeEq;

use crate::cloud::ResourceCounter;
use crate::error::Error;
use crate::oauth::{AuthClient, AuthorizationRequest, UserInfo};
use crate::session::{AuthProvider, AuthenticatedSession, PendingFlow, SessionStore, StoreError};

/// Query parameters of the provider redirect.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Drives login initiation and callback processing for one provider.
pub struct LoginFlow<S, C> {
    client: Arc<AuthClient>,
    counter: Arc<C>,
    store: Arc<S>,
}

// Manual Clone: avoid derive adding `S: Clone, C: Clone` bounds.
impl<S, C> Clone for LoginFlow<S, C> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            counter: self.counter.clone(),
            store: self.store.clone(),
        }
    }
}

impl<S: SessionStore, C: ResourceCounter> LoginFlow<S, C> {
    #[must_use]
    pub fn new(client: AuthClient, counter: C, store: Arc<S>) -> Self {
        Self {
            client: Arc::new(client),
            counter: Arc::new(counter),
            store,
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Start an authorization for `session_id`.
    ///
    /// Configuration and provider reachability are checked before any state
    /// is generated, so a failed start leaves nothing behind.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`], [`Error::ProviderUnreachable`], or
    /// [`Error::Store`].
    pub async fn begin(&self, session_id: &str) -> Result<AuthorizationRequest, Error> {
        self.client.config()?;
        self.client.probe().await.inspect_err(|e| {
            tracing::warn!(error = %e, "Keycloak liveness probe failed");
        })?;

        let request = self.client.authorization_url()?;
        self.store
            .put_pending(
                session_id,
                PendingFlow {
                    state: request.state.clone(),
                    code_verifier: request.code_verifier.clone(),
                },
            )
            .await
            .map_err(store_error)?;

        tracing::debug!("Authorization request issued");
        Ok(request)
    }

    /// Process the provider redirect for `session_id`.
    ///
    /// On success the authenticated session has already been saved.
    ///
    /// # Errors
    ///
    /// [`Error::ProviderDenied`], [`Error::CsrfMismatch`], [`Error::MissingCode`],
    /// [`Error::MissingVerifier`], [`Error::Exchange`], or [`Error::Store`].
    /// Identity and resource lookup failures are absorbed.
    pub async fn complete(
        &self,
        session_id: &str,
        params: CallbackParams,
    ) -> Result<AuthenticatedSession, Error> {
        let pending = self
            .store
            .take_pending(session_id)
            .await
            .map_err(store_error)?;

        if let Some(error) = params.error.filter(|e| !e.is_empty()) {
            let description = params.error_description.unwrap_or_default();
            tracing::warn!(error = %error, description = %description, "OAuth2 error from Keycloak");
            return Err(Error::ProviderDenied { error, description });
        }

        let Some(pending) = pending.filter(|flow| {
            params
                .state
                .as_deref()
                .is_some_and(|received| states_match(received, &flow.state))
        }) else {
            tracing::warn!("OAuth state mismatch");
            return Err(Error::CsrfMismatch);
        };

        let code = params
            .code
            .filter(|code| !code.is_empty())
            .ok_or(Error::MissingCode)?;

        if pending.code_verifier.is_empty() {
            return Err(Error::MissingVerifier);
        }

        let access_token = self
            .client
            .exchange_code(&code, &pending.code_verifier)
            .await
            .inspect_err(|e| tracing::error!(error = %e, "Token exchange failed"))?;

        let identity = self.client.fetch_identity(&access_token).await;
        let vm_count = match identity.as_ref().and_then(UserInfo::project_id) {
            Some(project_id) => self.count_vms(project_id).await,
            None => None,
        };

        let session = finalize(identity, vm_count);
        self.store
            .save(session_id, session.clone())
            .await
            .map_err(store_error)?;

        tracing::info!(
            user = session.user_name.as_deref().unwrap_or("-"),
            vm_count = ?session.vm_count,
            "Keycloak login successful"
        );
        Ok(session)
    }

    async fn count_vms(&self, project_id: &str) -> Option<u64> {
        match self.counter.count_vms(project_id).await {
            Ok(count) => Some(count),
            Err(e) => {
                tracing::warn!(error = %e, project_id, "VM count unavailable");
                None
            }
        }
    }
}

fn finalize(identity: Option<UserInfo>, vm_count: Option<u64>) -> AuthenticatedSession {
    let identity = identity.unwrap_or_default();
    AuthenticatedSession {
        is_authenticated: true,
        provider: AuthProvider::External,
        user_name: identity.display_name().map(str::to_string),
        user_email: identity.email.clone(),
        project_id: identity.project_id().map(str::to_string),
        vm_count,
    }
}

fn states_match(received: &str, stored: &str) -> bool {
    received.as_bytes().ct_eq(stored.as_bytes()).into()
}

#[allow(clippy::needless_pass_by_value)]
fn store_error(e: StoreError) -> Error {
    tracing::error!(error = %e, "Session store operation failed");
    Error::Store(e.to_string())
}
