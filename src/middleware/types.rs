use serde::Serialize;

use crate::session::{AuthProvider, AuthenticatedSession, Flash};

/// Body of `GET /`: the current session as seen by the page.
#[derive(Debug, Serialize)]
pub struct SessionView {
    pub is_authenticated: bool,
    pub provider: Option<AuthProvider>,
    pub user_info: Option<UserInfoView>,
    pub flashes: Vec<Flash>,
}

/// Identity attributes of an authenticated session.
#[derive(Debug, Serialize)]
pub struct UserInfoView {
    pub name: Option<String>,
    pub email: Option<String>,
    pub cloud_project_id: Option<String>,
    pub all_vms: Option<u64>,
}

impl SessionView {
    pub(super) fn new(session: Option<AuthenticatedSession>, flashes: Vec<Flash>) -> Self {
        match session.filter(|s| s.is_authenticated) {
            Some(session) => Self {
                is_authenticated: true,
                provider: Some(session.provider),
                user_info: Some(UserInfoView {
                    name: session.user_name,
                    email: session.user_email,
                    cloud_project_id: session.project_id,
                    all_vms: session.vm_count,
                }),
                flashes,
            },
            None => Self {
                is_authenticated: false,
                provider: None,
                user_info: None,
                flashes,
            },
        }
    }
}

/// Body of a successful `POST /oauth/keycloak/init`.
#[derive(Debug, Serialize)]
pub struct InitResponse {
    pub success: bool,
    pub auth_url: String,
    pub state: String,
}

/// Body of a failed `POST /oauth/keycloak/init`.
#[derive(Debug, Serialize)]
pub struct InitFailure {
    pub success: bool,
    pub error: String,
}
