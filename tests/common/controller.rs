//! Mock controller endpoints built on wiremock

use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::{TEST_API_TOKEN, TEST_CLIENT_ID};

/// Device lookup: `GET /api/v1/hipservices/{id}`
pub async fn mount_device(server: &MockServer, id: &str, uid: &str, title: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/api/v1/hipservices/{id}")))
        .and(header("X-API-Client-ID", TEST_CLIENT_ID))
        .and(header("X-API-Token", TEST_API_TOKEN))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "uid": uid,
            "title": title,
        })))
        .mount(server)
        .await;
}

/// Bundle request accepted with `job_id`
pub async fn mount_submission(server: &MockServer, id: &str, job_id: &str) {
    Mock::given(method("POST"))
        .and(path(format!("/api/v1/hipservices/{id}/support_bundle")))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({ "job_id": job_id })))
        .mount(server)
        .await;
}

/// Bundle request refused with `status`
pub async fn mount_rejected_submission(server: &MockServer, id: &str, status: u16) {
    Mock::given(method("POST"))
        .and(path(format!("/api/v1/hipservices/{id}/support_bundle")))
        .respond_with(
            ResponseTemplate::new(status).set_body_json(json!({ "error": "forbidden" })),
        )
        .mount(server)
        .await;
}

/// Job reports `progress` for the first `rounds` polls, then `complete` with `uri`
pub async fn mount_job(server: &MockServer, job_id: &str, rounds: u64, uri: &str) {
    if rounds > 0 {
        Mock::given(method("GET"))
            .and(path(format!("/api/v1/jobs/{job_id}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "progress" })))
            .up_to_n_times(rounds)
            .mount(server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path(format!("/api/v1/jobs/{job_id}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "complete",
            "uri": uri,
        })))
        .mount(server)
        .await;
}

/// Bundle bytes served under `/api/v1/{uri}`
pub async fn mount_bundle(server: &MockServer, uri: &str, body: &[u8]) {
    Mock::given(method("GET"))
        .and(path(format!("/api/v1/{uri}")))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "application/octet-stream")
                .set_body_bytes(body.to_vec()),
        )
        .mount(server)
        .await;
}
