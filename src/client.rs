//! Controller API client
//!
//! The collector talks to the controller only through the [`ControllerClient`] trait,
//! so the cycle logic can be driven by any transport. [`HttpControllerClient`] is the
//! production implementation: JSON over HTTPS with the client id and API token sent
//! as fixed headers on every request.
//!
//! | Operation | Request |
//! |---|---|
//! | device lookup | `GET /api/v1/hipservices/{id}` |
//! | submit bundle job | `POST /api/v1/hipservices/{id}/support_bundle` |
//! | job status | `GET /api/v1/jobs/{job_id}` |
//! | bundle fetch | `GET /api/v1/{uri}` |

use crate::config::{ConnectionConfig, RetryConfig};
use crate::error::{ControllerError, Error, Result};
use crate::retry::with_retry;
use crate::types::{DeviceInfo, JobHandle, JobStatusReport, ResultLocator};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use url::Url;

/// Header carrying the API client id
pub const CLIENT_ID_HEADER: &str = "X-API-Client-ID";
/// Header carrying the API token
pub const API_TOKEN_HEADER: &str = "X-API-Token";

/// Response bodies are cut to this many characters in error messages
const MAX_ERROR_BODY: usize = 512;

/// Abstract request client for the controller service
#[async_trait]
pub trait ControllerClient: Send + Sync {
    /// Look up a device's metadata
    async fn device_info(&self, device_id: &str) -> Result<DeviceInfo>;

    /// Ask the controller to generate a diagnostic bundle for a device
    async fn submit_bundle_job(&self, device_id: &str) -> Result<JobHandle>;

    /// Query the status of a bundle job
    async fn job_status(&self, job: &JobHandle) -> Result<JobStatusReport>;

    /// Download a finished bundle
    async fn fetch_bundle(&self, result: &ResultLocator) -> Result<Vec<u8>>;
}

#[derive(Deserialize)]
struct SubmitResponse {
    #[serde(default)]
    job_id: serde_json::Value,
}

/// [`ControllerClient`] backed by reqwest
#[derive(Clone, Debug)]
pub struct HttpControllerClient {
    http: reqwest::Client,
    api_base: Url,
    retry: RetryConfig,
}

impl HttpControllerClient {
    /// Build a client from connection settings
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the controller URL or credentials cannot be
    /// turned into a request target and headers.
    pub fn new(connection: &ConnectionConfig, retry: RetryConfig) -> Result<Self> {
        let api_base = api_base_url(connection)?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            CLIENT_ID_HEADER,
            HeaderValue::from_str(&connection.client_id)
                .map_err(|_| Error::config("client_id", "client_id is not a valid header value"))?,
        );
        let mut token = HeaderValue::from_str(&connection.api_token)
            .map_err(|_| Error::config("api_token", "api_token is not a valid header value"))?;
        token.set_sensitive(true);
        headers.insert(API_TOKEN_HEADER, token);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(connection.request_timeout)
            .timeout(connection.request_timeout)
            .danger_accept_invalid_certs(connection.accept_invalid_certs)
            .build()?;

        if connection.accept_invalid_certs {
            tracing::warn!(
                conductor_url = %connection.conductor_url,
                "TLS certificate verification is disabled"
            );
        }

        Ok(Self {
            http,
            api_base,
            retry,
        })
    }

    /// Base URL every request path is resolved against (ends in `/api/v1/`)
    pub fn api_base(&self) -> &Url {
        &self.api_base
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|_| Error::config("conductor_url", "conductor_url cannot be a base URL"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn result_url(&self, result: &ResultLocator) -> Result<Url> {
        let relative = result.0.trim().trim_start_matches('/');
        let url = self
            .api_base
            .join(relative)
            .map_err(|e| ControllerError::InvalidResponse {
                endpoint: result.0.clone(),
                reason: format!("result uri is not a valid URL: {e}"),
            })?;
        // credentials are attached to every request, never follow a uri to another host
        if url.origin() != self.api_base.origin() {
            return Err(ControllerError::InvalidResponse {
                endpoint: result.0.clone(),
                reason: "result uri points outside the controller".to_string(),
            }
            .into());
        }
        Ok(url)
    }

    async fn get_bytes(&self, url: Url) -> Result<Vec<u8>> {
        with_retry(&self.retry, || {
            let url = url.clone();
            async move {
                let response = self.http.get(url.clone()).send().await?;
                let response = ensure_success(url.path(), response).await?;
                Ok::<_, Error>(response.bytes().await?.to_vec())
            }
        })
        .await
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let endpoint = url.path().to_string();
        let body = self.get_bytes(url).await?;
        parse_json(&endpoint, &body)
    }
}

#[async_trait]
impl ControllerClient for HttpControllerClient {
    async fn device_info(&self, device_id: &str) -> Result<DeviceInfo> {
        let url = self.endpoint(&["hipservices", device_id])?;
        self.get_json(url).await
    }

    async fn submit_bundle_job(&self, device_id: &str) -> Result<JobHandle> {
        let url = self.endpoint(&["hipservices", device_id, "support_bundle"])?;
        let endpoint = url.path().to_string();
        let response = self.http.post(url).send().await?;
        let response = ensure_success(&endpoint, response).await?;
        let body = response.bytes().await?;
        let parsed: SubmitResponse = parse_json(&endpoint, &body)?;

        let job_id = match parsed.job_id {
            serde_json::Value::String(id) if !id.trim().is_empty() => id,
            serde_json::Value::Number(id) => id.to_string(),
            _ => {
                return Err(ControllerError::InvalidResponse {
                    endpoint,
                    reason: "response has no job_id".to_string(),
                }
                .into());
            }
        };
        Ok(JobHandle(job_id))
    }

    async fn job_status(&self, job: &JobHandle) -> Result<JobStatusReport> {
        let url = self.endpoint(&["jobs", &job.0])?;
        self.get_json(url).await
    }

    async fn fetch_bundle(&self, result: &ResultLocator) -> Result<Vec<u8>> {
        let url = self.result_url(result)?;
        self.get_bytes(url).await
    }
}

fn api_base_url(connection: &ConnectionConfig) -> Result<Url> {
    let raw = connection.conductor_url.trim();
    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    };

    let mut url = Url::parse(&with_scheme).map_err(|e| {
        Error::config("conductor_url", format!("invalid conductor_url '{raw}': {e}"))
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::config(
            "conductor_url",
            format!("unsupported scheme '{}' in conductor_url", url.scheme()),
        ));
    }
    if let Some(port) = connection.port {
        url.set_port(Some(port))
            .map_err(|_| Error::config("port", "port cannot be set on conductor_url"))?;
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }

    url.join("api/v1/")
        .map_err(|e| Error::config("conductor_url", format!("invalid conductor_url '{raw}': {e}")))
}

async fn ensure_success(endpoint: &str, response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ControllerError::UnexpectedStatus {
        endpoint: endpoint.to_string(),
        status: status.as_u16(),
        body: truncate(body.trim()),
    }
    .into())
}

fn parse_json<T: DeserializeOwned>(endpoint: &str, body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| {
        ControllerError::InvalidResponse {
            endpoint: endpoint.to_string(),
            reason: format!("malformed JSON: {e}"),
        }
        .into()
    })
}

fn truncate(body: &str) -> String {
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn connection(url: &str) -> ConnectionConfig {
        ConnectionConfig {
            conductor_url: url.to_string(),
            client_id: "client-1".to_string(),
            api_token: "token-1".to_string(),
            request_timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }

    fn no_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 0,
            ..Default::default()
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn bare_host_becomes_https_api_base() {
        let client = HttpControllerClient::new(&connection("conductor.acme.com"), no_retry()).unwrap();
        assert_eq!(client.api_base().as_str(), "https://conductor.acme.com/api/v1/");
    }

    #[test]
    fn port_override_and_path_prefix_are_kept() {
        let mut conn = connection("https://conductor.acme.com/tenant");
        conn.port = Some(8443);
        let client = HttpControllerClient::new(&conn, no_retry()).unwrap();
        assert_eq!(
            client.api_base().as_str(),
            "https://conductor.acme.com:8443/tenant/api/v1/"
        );
    }

    #[test]
    fn unsupported_scheme_is_a_config_error() {
        let err = HttpControllerClient::new(&connection("ftp://conductor"), no_retry()).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn endpoint_escapes_path_segments() {
        let client = HttpControllerClient::new(&connection("conductor.acme.com"), no_retry()).unwrap();
        let url = client.endpoint(&["hipservices", "a/b c"]).unwrap();
        assert_eq!(url.path(), "/api/v1/hipservices/a%2Fb%20c");
    }

    #[test]
    fn result_uri_cannot_leave_the_controller() {
        let client = HttpControllerClient::new(&connection("conductor.acme.com"), no_retry()).unwrap();
        let inside = client
            .result_url(&ResultLocator("/support_bundles/9/download".to_string()))
            .unwrap();
        assert_eq!(
            inside.as_str(),
            "https://conductor.acme.com/api/v1/support_bundles/9/download"
        );

        let outside = client.result_url(&ResultLocator("https://evil.example/x".to_string()));
        assert!(outside.is_err());
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(MAX_ERROR_BODY + 10);
        let cut = truncate(&body);
        assert_eq!(cut.len(), MAX_ERROR_BODY + 3);
        assert!(cut.ends_with("..."));
        assert_eq!(truncate("short"), "short");
    }

    #[tokio::test]
    async fn device_lookup_sends_fixed_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/hipservices/dev-1"))
            .and(header("X-API-Client-ID", "client-1"))
            .and(header("X-API-Token", "token-1"))
            .and(header("Accept", "application/json"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"uid": "BHI@40130#0001", "title": "Edge"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpControllerClient::new(&connection(&server.uri()), no_retry()).unwrap();
        let info = client.device_info("dev-1").await.unwrap();
        assert_eq!(info.uid.as_deref(), Some("BHI@40130#0001"));
        assert_eq!(info.title.as_deref(), Some("Edge"));
    }

    #[tokio::test]
    async fn device_lookup_404_is_unexpected_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/hipservices/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no such hipservice"))
            .mount(&server)
            .await;

        let client = HttpControllerClient::new(&connection(&server.uri()), fast_retry(3)).unwrap();
        let err = client.device_info("missing").await.unwrap_err();
        match err {
            Error::Controller(ControllerError::UnexpectedStatus { status, body, .. }) => {
                assert_eq!(status, 404);
                assert_eq!(body, "no such hipservice");
            }
            other => panic!("expected UnexpectedStatus, got {other:?}"),
        }
        // 404 is permanent: exactly one request
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn submit_returns_job_handle_from_accepted_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/hipservices/dev-1/support_bundle"))
            .respond_with(ResponseTemplate::new(202).set_body_json(serde_json::json!({"job_id": "job-77"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpControllerClient::new(&connection(&server.uri()), no_retry()).unwrap();
        let job = client.submit_bundle_job("dev-1").await.unwrap();
        assert_eq!(job, JobHandle("job-77".to_string()));
    }

    #[tokio::test]
    async fn submit_accepts_numeric_job_ids() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/hipservices/dev-1/support_bundle"))
            .respond_with(ResponseTemplate::new(202).set_body_json(serde_json::json!({"job_id": 1234})))
            .mount(&server)
            .await;

        let client = HttpControllerClient::new(&connection(&server.uri()), no_retry()).unwrap();
        assert_eq!(
            client.submit_bundle_job("dev-1").await.unwrap(),
            JobHandle("1234".to_string())
        );
    }

    #[tokio::test]
    async fn submit_without_job_id_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/hipservices/dev-1/support_bundle"))
            .respond_with(ResponseTemplate::new(202).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let client = HttpControllerClient::new(&connection(&server.uri()), no_retry()).unwrap();
        let err = client.submit_bundle_job("dev-1").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Controller(ControllerError::InvalidResponse { .. })
        ));
    }

    #[tokio::test]
    async fn submit_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/hipservices/dev-1/support_bundle"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpControllerClient::new(&connection(&server.uri()), fast_retry(3)).unwrap();
        assert!(client.submit_bundle_job("dev-1").await.is_err());
    }

    #[tokio::test]
    async fn job_status_is_retried_after_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/jobs/job-1"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/jobs/job-1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"status": "complete", "uri": "bundles/1"})),
            )
            .mount(&server)
            .await;

        let client = HttpControllerClient::new(&connection(&server.uri()), fast_retry(3)).unwrap();
        let report = client.job_status(&JobHandle("job-1".to_string())).await.unwrap();
        assert_eq!(report.status, "complete");
        assert_eq!(report.uri.as_deref(), Some("bundles/1"));
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn malformed_status_body_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/jobs/job-1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let client = HttpControllerClient::new(&connection(&server.uri()), fast_retry(3)).unwrap();
        let err = client.job_status(&JobHandle("job-1".to_string())).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Controller(ControllerError::InvalidResponse { .. })
        ));
    }

    #[tokio::test]
    async fn fetch_bundle_returns_raw_bytes() {
        let server = MockServer::start().await;
        let payload: Vec<u8> = (0u8..=255).collect();
        Mock::given(method("GET"))
            .and(path("/api/v1/support_bundles/42/download"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(payload.clone()))
            .mount(&server)
            .await;

        let client = HttpControllerClient::new(&connection(&server.uri()), no_retry()).unwrap();
        let bytes = client
            .fetch_bundle(&ResultLocator("support_bundles/42/download".to_string()))
            .await
            .unwrap();
        assert_eq!(bytes, payload);
    }
}
