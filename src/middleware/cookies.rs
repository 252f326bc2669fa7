use axum_extra::extract::PrivateCookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};

use crate::pkce;

/// Create the session-id cookie.
///
/// No `Max-Age`: the session lives as long as the browser session.
pub(super) fn session_cookie(name: &str, session_id: &str, secure: bool) -> Cookie<'static> {
    Cookie::build((name.to_string(), session_id.to_string()))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/".to_string())
        .build()
}

/// Get the session id from cookies.
pub(super) fn get_session_id(jar: &PrivateCookieJar, name: &str) -> Option<String> {
    jar.get(name)
        .map(|c| c.value().to_string())
        .filter(|id| !id.is_empty())
}

/// Return the existing session id, or mint one and add its cookie to the jar.
pub(super) fn ensure_session_id(
    jar: PrivateCookieJar,
    name: &str,
    secure: bool,
) -> (PrivateCookieJar, String) {
    if let Some(session_id) = get_session_id(&jar, name) {
        return (jar, session_id);
    }
    fresh_session_id(jar, name, secure)
}

/// Mint a new session id and set its cookie, replacing any existing one.
pub(super) fn fresh_session_id(
    jar: PrivateCookieJar,
    name: &str,
    secure: bool,
) -> (PrivateCookieJar, String) {
    let session_id = pkce::generate_session_id();
    let jar = jar.add(session_cookie(name, &session_id, secure));
    (jar, session_id)
}
