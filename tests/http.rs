//! Tests for the HTTP surface: routing, status mapping, and error bodies.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use serde_json::Value;
use tower::ServiceExt;
use vlei_verifier::http;
use vlei_verifier::provider::ChainStatus;
use vlei_verifier::test_utils::{self, Provider, sample};

const CESR: &str = "application/json+cesr";

async fn service() -> (Provider, Arc<vlei_verifier::Verifier<Provider>>, Router) {
    test_utils::init_tracer();
    let provider = Provider::new();
    let verifier = Arc::new(test_utils::verifier(provider.clone()).await);
    let router = http::router(Arc::clone(&verifier));
    (provider, verifier, router)
}

async fn put_presentation(router: &Router, said: &str, payload: &[u8]) -> StatusCode {
    let request = Request::builder()
        .method("PUT")
        .uri(format!("/presentations/{said}"))
        .header(header::CONTENT_TYPE, CESR)
        .body(Body::from(payload.to_vec()))
        .expect("request builds");
    router.clone().oneshot(request).await.expect("request succeeds").status()
}

async fn get_authorization(router: &Router, aid: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .uri(format!("/authorizations/{aid}"))
        .body(Body::empty())
        .expect("request builds");
    let response = router.clone().oneshot(request).await.expect("request succeeds");

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body reads");
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

/// Poll the authorization endpoint until the status code differs from 401,
/// or panic.
async fn poll_authorization(router: &Router, aid: &str) -> (StatusCode, Value) {
    for _ in 0..200 {
        let (status, body) = get_authorization(router, aid).await;
        if status != StatusCode::UNAUTHORIZED {
            return (status, body);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("authorization for {aid} did not conclude");
}

#[tokio::test]
async fn presentation_flow_end_to_end() {
    let (provider, verifier, router) = service().await;

    let (said, payload) = sample::credential(sample::HOLDER, sample::LEI);
    provider.set_outcome(&said, ChainStatus::Verified);

    // unknown until a presentation names the holder
    let (status, _) = get_authorization(&router, sample::HOLDER).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    assert_eq!(put_presentation(&router, &said, &payload).await, StatusCode::ACCEPTED);
    // idempotent: same submission accepted again
    assert_eq!(put_presentation(&router, &said, &payload).await, StatusCode::ACCEPTED);

    let (status, body) = poll_authorization(&router, sample::HOLDER).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["aid"], sample::HOLDER);
    assert_eq!(body["said"], said.as_str());

    assert_eq!(provider.resolve_calls(&said), 1);
    verifier.shutdown();
}

#[tokio::test]
async fn malformed_presentations_rejected() {
    let (_, verifier, router) = service().await;

    let (said, payload) = sample::credential(sample::HOLDER, sample::LEI);

    // wrong content type
    let request = Request::builder()
        .method("PUT")
        .uri(format!("/presentations/{said}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(payload.clone()))
        .expect("request builds");
    let response = router.clone().oneshot(request).await.expect("request succeeds");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // SAID/content mismatch
    let wrong = "EAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";
    assert_eq!(put_presentation(&router, wrong, &payload).await, StatusCode::BAD_REQUEST);

    // garbage body
    assert_eq!(put_presentation(&router, &said, b"not a credential").await, StatusCode::BAD_REQUEST);

    // nothing was recorded for the holder
    let (status, _) = get_authorization(&router, sample::HOLDER).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    verifier.shutdown();
}

#[tokio::test]
async fn revoked_is_unauthorized_with_distinct_body() {
    let (provider, verifier, router) = service().await;

    let (said, payload) = sample::credential(sample::HOLDER, sample::LEI);
    provider.set_outcome(&said, ChainStatus::Revoked);

    assert_eq!(put_presentation(&router, &said, &payload).await, StatusCode::ACCEPTED);

    // eventually 401 with a body naming revocation, distinguishable from 404
    for _ in 0..200 {
        let request = Request::builder()
            .uri(format!("/authorizations/{}", sample::HOLDER))
            .body(Body::empty())
            .expect("request builds");
        let response = router.clone().oneshot(request).await.expect("request succeeds");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body reads");
        let body = String::from_utf8_lossy(&bytes).to_string();

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        if body.contains("revoked") {
            verifier.shutdown();
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("revocation never became observable");
}

#[tokio::test]
async fn report_upload_roundtrip() {
    let (provider, verifier, router) = service().await;

    let (said, payload) = sample::credential(sample::HOLDER, sample::LEI);
    provider.set_outcome(&said, ChainStatus::Verified);
    assert_eq!(put_presentation(&router, &said, &payload).await, StatusCode::ACCEPTED);
    poll_authorization(&router, sample::HOLDER).await;

    let content = "quarterly-report-bytes";
    let dig = vlei_verifier::credential::content_digest(content.as_bytes());
    let sig = test_utils::sign(sample::HOLDER, content.as_bytes());

    let boundary = "X-REPORT-BOUNDARY";
    let body = format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"upload\"; filename=\"report.zip\"\r\n\
         Content-Type: application/zip\r\n\r\n\
         {content}\r\n\
         --{boundary}\r\n\
         Content-Disposition: form-data; name=\"signature\"\r\n\r\n\
         {sig}\r\n\
         --{boundary}--\r\n"
    );

    let request = Request::builder()
        .method("POST")
        .uri(format!("/reports/{}/{dig}", sample::HOLDER))
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={boundary}"))
        .body(Body::from(body))
        .expect("request builds");
    let response = router.clone().oneshot(request).await.expect("request succeeds");
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    // poll the status endpoint until verification concludes
    for _ in 0..200 {
        let request = Request::builder()
            .uri(format!("/reports/{}/{dig}", sample::HOLDER))
            .body(Body::empty())
            .expect("request builds");
        let response = router.clone().oneshot(request).await.expect("request succeeds");
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body reads");
        let stats: Value = serde_json::from_slice(&bytes).expect("stats deserialize");
        if stats["status"] == "verified" {
            assert_eq!(stats["submitter"], sample::HOLDER);
            assert_eq!(stats["size"], content.len() as u64);
            verifier.shutdown();
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("report never verified");
}

#[tokio::test]
async fn request_verification_for_authorized_aid() {
    let (provider, verifier, router) = service().await;

    let (said, payload) = sample::credential(sample::HOLDER, sample::LEI);
    provider.set_outcome(&said, ChainStatus::Verified);
    assert_eq!(put_presentation(&router, &said, &payload).await, StatusCode::ACCEPTED);
    poll_authorization(&router, sample::HOLDER).await;

    let data = "ordered-report-listing";
    let sig = test_utils::sign(sample::HOLDER, data.as_bytes());

    let request = Request::builder()
        .method("POST")
        .uri(format!("/request/verify/{}?data={data}&sig={sig}", sample::HOLDER))
        .body(Body::empty())
        .expect("request builds");
    let response = router.clone().oneshot(request).await.expect("request succeeds");
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let request = Request::builder()
        .method("POST")
        .uri(format!("/request/verify/{}?data={data}&sig=0Bforged", sample::HOLDER))
        .body(Body::empty())
        .expect("request builds");
    let response = router.clone().oneshot(request).await.expect("request succeeds");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    verifier.shutdown();
}
