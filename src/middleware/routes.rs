use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::Redirect;
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use axum_extra::extract::PrivateCookieJar;
use serde::Deserialize;

use super::config::GatewayConfig;
use super::cookies;
use super::error::{AuthError, user_message};
use super::state::AppState;
use super::types::{InitResponse, SessionView};
use crate::cloud::{CloudClient, ResourceCounter};
use crate::error::Error;
use crate::flow::{CallbackParams, LoginFlow};
use crate::http;
use crate::oauth::{AuthClient, CALLBACK_PATH};
use crate::session::{AuthenticatedSession, Flash, SessionStore};

/// Create the gateway router with the Keycloak and cloud clients built from `config`.
///
/// # Errors
///
/// Returns [`AuthError::Config`] if the outbound HTTP client cannot be built.
pub fn gateway_routes<S>(config: GatewayConfig, session_store: S) -> Result<Router, AuthError>
where
    S: SessionStore,
{
    let http = http::build_client(config.settings.insecure_tls)
        .map_err(|e| AuthError::Config(e.to_string()))?;
    let client = AuthClient::new(&config.provider, http.clone());
    let cloud = CloudClient::new(config.cloud, http);
    let flow = LoginFlow::new(client, cloud, Arc::new(session_store));

    Ok(router(flow, config.settings))
}

fn router<S, C>(flow: LoginFlow<S, C>, settings: super::config::GatewaySettings) -> Router
where
    S: SessionStore,
    C: ResourceCounter,
{
    let state = AppState { flow, settings };

    Router::new()
        .route("/", get(index::<S, C>))
        .route("/login", post(login::<S, C>))
        .route("/logout", post(logout::<S, C>))
        .route("/oauth/keycloak/init", post(keycloak_init::<S, C>))
        .route("/oauth/keycloak/login", get(keycloak_login::<S, C>))
        .route(CALLBACK_PATH, get(keycloak_callback::<S, C>))
        .with_state(state)
}

// ── Page ───────────────────────────────────────────────────────────

async fn index<S: SessionStore, C: ResourceCounter>(
    State(state): State<AppState<S, C>>,
    jar: PrivateCookieJar,
) -> Result<Json<SessionView>, AuthError> {
    let Some(session_id) = cookies::get_session_id(&jar, &state.settings.session_cookie_name)
    else {
        return Ok(Json(SessionView::new(None, Vec::new())));
    };

    let store = state.flow.store();
    let session = store.load(&session_id).await.map_err(store_error)?;
    let flashes = store.take_flashes(&session_id).await.map_err(store_error)?;

    Ok(Json(SessionView::new(session, flashes)))
}

// ── Static login / logout ──────────────────────────────────────────

#[derive(Deserialize)]
struct LoginForm {
    #[serde(default)]
    login: String,
    #[serde(default)]
    password: String,
}

async fn login<S: SessionStore, C: ResourceCounter>(
    State(state): State<AppState<S, C>>,
    jar: PrivateCookieJar,
    Form(form): Form<LoginForm>,
) -> Result<(PrivateCookieJar, Redirect), AuthError> {
    let (jar, session_id) = session_id(jar, &state);
    let store = state.flow.store();

    if !state.settings.credentials.verify(&form.login, &form.password) {
        store
            .push_flash(&session_id, Flash::error("Invalid login or password"))
            .await
            .map_err(store_error)?;
        tracing::warn!("Static credential login rejected");
        return Ok((jar, Redirect::to(&state.settings.home_path)));
    }

    store
        .save(&session_id, AuthenticatedSession::local())
        .await
        .map_err(store_error)?;
    let (jar, session_id) = rotate_session(jar, &state, &session_id).await?;
    store
        .push_flash(&session_id, Flash::success("Signed in"))
        .await
        .map_err(store_error)?;
    tracing::info!("Static credential login successful");

    Ok((jar, Redirect::to(&state.settings.home_path)))
}

async fn logout<S: SessionStore, C: ResourceCounter>(
    State(state): State<AppState<S, C>>,
    jar: PrivateCookieJar,
) -> Result<(PrivateCookieJar, Redirect), AuthError> {
    let Some(old_id) = cookies::get_session_id(&jar, &state.settings.session_cookie_name) else {
        return Ok((jar, Redirect::to(&state.settings.home_path)));
    };

    let store = state.flow.store();
    store.clear(&old_id).await.map_err(store_error)?;
    // The old id is dead; the goodbye flash rides on a fresh one.
    let (jar, session_id) = cookies::fresh_session_id(
        jar,
        &state.settings.session_cookie_name,
        state.settings.secure_cookies,
    );
    store
        .push_flash(&session_id, Flash::info("Signed out"))
        .await
        .map_err(store_error)?;

    Ok((jar, Redirect::to(&state.settings.home_path)))
}

// ── Keycloak ───────────────────────────────────────────────────────

async fn keycloak_init<S: SessionStore, C: ResourceCounter>(
    State(state): State<AppState<S, C>>,
    jar: PrivateCookieJar,
) -> Result<(PrivateCookieJar, Json<InitResponse>), AuthError> {
    let (jar, session_id) = session_id(jar, &state);
    let request = state.flow.begin(&session_id).await?;

    Ok((
        jar,
        Json(InitResponse {
            success: true,
            auth_url: request.url,
            state: request.state,
        }),
    ))
}

async fn keycloak_login<S: SessionStore, C: ResourceCounter>(
    State(state): State<AppState<S, C>>,
    jar: PrivateCookieJar,
) -> Result<(PrivateCookieJar, Redirect), AuthError> {
    let (jar, session_id) = session_id(jar, &state);
    let request = state.flow.begin(&session_id).await?;

    Ok((jar, Redirect::to(&request.url)))
}

async fn keycloak_callback<S: SessionStore, C: ResourceCounter>(
    State(state): State<AppState<S, C>>,
    jar: PrivateCookieJar,
    Query(params): Query<CallbackParams>,
) -> Result<(PrivateCookieJar, Redirect), AuthError> {
    let (jar, session_id) = session_id(jar, &state);

    let outcome = state.flow.complete(&session_id, params).await;
    let (jar, session_id, flash) = match outcome {
        Ok(_) => {
            let (jar, session_id) = rotate_session(jar, &state, &session_id).await?;
            (jar, session_id, Flash::success("Signed in with Keycloak"))
        }
        Err(Error::Store(msg)) => return Err(AuthError::Store(msg)),
        Err(e) => {
            tracing::warn!(reason = e.reason(), "Keycloak login failed");
            (jar, session_id, Flash::error(user_message(&e)))
        }
    };

    state
        .flow
        .store()
        .push_flash(&session_id, flash)
        .await
        .map_err(store_error)?;

    Ok((jar, Redirect::to(&state.settings.home_path)))
}

// ── Helpers ────────────────────────────────────────────────────────

fn session_id<S, C>(jar: PrivateCookieJar, state: &AppState<S, C>) -> (PrivateCookieJar, String) {
    cookies::ensure_session_id(
        jar,
        &state.settings.session_cookie_name,
        state.settings.secure_cookies,
    )
}

/// Move the session to a new id and cookie once it has been authenticated.
async fn rotate_session<S: SessionStore, C: ResourceCounter>(
    jar: PrivateCookieJar,
    state: &AppState<S, C>,
    old_id: &str,
) -> Result<(PrivateCookieJar, String), AuthError> {
    let (jar, new_id) = cookies::fresh_session_id(
        jar,
        &state.settings.session_cookie_name,
        state.settings.secure_cookies,
    );
    state
        .flow
        .store()
        .rotate(old_id, &new_id)
        .await
        .map_err(store_error)?;
    Ok((jar, new_id))
}

#[allow(clippy::needless_pass_by_value)]
fn store_error(e: crate::session::StoreError) -> AuthError {
    AuthError::Store(e.to_string())
}
