use std::future::Future;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Error;

/// Counts virtual machines belonging to a cloud project.
///
/// Called once per successful login that carries a project identifier.
/// Any failure is reported as [`Error::ResourceLookup`].
pub trait ResourceCounter: Send + Sync + 'static {
    fn count_vms(&self, project_id: &str) -> impl Future<Output = Result<u64, Error>> + Send;
}

/// Cloud control-plane endpoints and the service key pair.
#[derive(Debug, Clone)]
pub struct CloudSettings {
    pub(crate) key_id: Option<String>,
    pub(crate) secret: Option<String>,
    pub(crate) iam_url: String,
    pub(crate) compute_url: String,
}

impl Default for CloudSettings {
    fn default() -> Self {
        Self {
            key_id: None,
            secret: None,
            iam_url: "https://iam.api.cloud.ru".into(),
            compute_url: "https://compute.api.cloud.ru".into(),
        }
    }
}

impl CloudSettings {
    #[must_use]
    pub fn with_credentials(mut self, key_id: impl Into<String>, secret: impl Into<String>) -> Self {
        let (key_id, secret) = (key_id.into(), secret.into());
        self.key_id = (!key_id.is_empty()).then_some(key_id);
        self.secret = (!secret.is_empty()).then_some(secret);
        self
    }

    #[must_use]
    pub fn with_iam_url(mut self, url: impl Into<String>) -> Self {
        self.iam_url = url.into();
        self
    }

    #[must_use]
    pub fn with_compute_url(mut self, url: impl Into<String>) -> Self {
        self.compute_url = url.into();
        self
    }

    /// Whether both halves of the service key pair are present.
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        self.key_id.is_some() && self.secret.is_some()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ServiceTokenRequest<'a> {
    key_id: &'a str,
    secret: &'a str,
}

#[derive(Deserialize)]
struct ServiceTokenResponse {
    #[serde(default)]
    access_token: Option<String>,
}

#[derive(Deserialize)]
struct VmListResponse {
    #[serde(default)]
    total: Option<u64>,
}

/// Client for the cloud IAM and compute APIs.
///
/// Uses its own service credentials, never the user's access token.
#[derive(Clone)]
pub struct CloudClient {
    settings: CloudSettings,
    http: reqwest::Client,
}

impl CloudClient {
    #[must_use]
    pub fn new(settings: CloudSettings, http: reqwest::Client) -> Self {
        if !settings.has_credentials() {
            tracing::warn!("Cloud credentials not configured, VM counts will be unavailable");
        }
        Self { settings, http }
    }

    /// Obtain a service access token from the IAM endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ResourceLookup`] if credentials are missing, the
    /// request fails, or the response carries no `access_token`.
    pub async fn service_token(&self) -> Result<String, Error> {
        let (Some(key_id), Some(secret)) = (&self.settings.key_id, &self.settings.secret) else {
            return Err(Error::ResourceLookup("cloud credentials not configured".into()));
        };

        let url = endpoint(&self.settings.iam_url, "/api/v1/auth/token")?;
        let response = self
            .http
            .post(url)
            .json(&ServiceTokenRequest { key_id, secret })
            .send()
            .await
            .map_err(lookup_error)?;

        let response = ensure_success(response, "service token").await?;
        response
            .json::<ServiceTokenResponse>()
            .await
            .map_err(lookup_error)?
            .access_token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| Error::ResourceLookup("service token response carried no access_token".into()))
    }

    /// Count VMs in `project_id` with the given service token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ResourceLookup`] on request failure or a missing `total`.
    pub async fn list_vm_total(&self, token: &str, project_id: &str) -> Result<u64, Error> {
        let mut url = endpoint(&self.settings.compute_url, "/api/v1/vms")?;
        url.query_pairs_mut().append_pair("project_id", project_id);

        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(lookup_error)?;

        let response = ensure_success(response, "vm inventory").await?;
        response
            .json::<VmListResponse>()
            .await
            .map_err(lookup_error)?
            .total
            .ok_or_else(|| Error::ResourceLookup("inventory response carried no total".into()))
    }
}

impl ResourceCounter for CloudClient {
    async fn count_vms(&self, project_id: &str) -> Result<u64, Error> {
        let token = self.service_token().await?;
        self.list_vm_total(&token, project_id).await
    }
}

fn endpoint(base: &str, path: &str) -> Result<Url, Error> {
    format!("{}{path}", base.trim_end_matches('/'))
        .parse()
        .map_err(|e| Error::ResourceLookup(format!("invalid cloud URL {base}: {e}")))
}

#[allow(clippy::needless_pass_by_value)]
fn lookup_error(e: reqwest::Error) -> Error {
    Error::ResourceLookup(e.to_string())
}

async fn ensure_success(
    response: reqwest::Response,
    operation: &'static str,
) -> Result<reqwest::Response, Error> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(Error::ResourceLookup(format!("{operation} answered {status}: {body}")))
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn test_client(server: &MockServer) -> CloudClient {
        let settings = CloudSettings::default()
            .with_credentials("key-1", "secret-1")
            .with_iam_url(server.uri())
            .with_compute_url(server.uri());
        CloudClient::new(settings, reqwest::Client::new())
    }

    async fn mount_token(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/api/v1/auth/token"))
            .and(body_json(serde_json::json!({"keyId": "key-1", "secret": "secret-1"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"access_token": "svc"})),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_count_vms() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/v1/vms"))
            .and(query_param("project_id", "P1"))
            .and(header("authorization", "Bearer svc"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"total": 7, "items": []})),
            )
            .expect(1)
            .mount(&server)
            .await;

        assert_eq!(test_client(&server).count_vms("P1").await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_count_vms_token_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/auth/token"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/vms"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = test_client(&server).count_vms("P1").await.unwrap_err();
        assert!(matches!(err, Error::ResourceLookup(_)));
    }

    #[tokio::test]
    async fn test_count_vms_missing_total() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/v1/vms"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"items": []})))
            .mount(&server)
            .await;

        let err = test_client(&server).count_vms("P1").await.unwrap_err();
        assert!(matches!(err, Error::ResourceLookup(ref msg) if msg.contains("total")));
    }

    #[tokio::test]
    async fn test_count_vms_without_credentials() {
        let client = CloudClient::new(CloudSettings::default(), reqwest::Client::new());
        let err = client.count_vms("P1").await.unwrap_err();
        assert!(matches!(err, Error::ResourceLookup(_)));
    }
}
