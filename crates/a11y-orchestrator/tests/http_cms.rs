//! HttpCmsClient against a mock CMS

use a11y_core::{score, AuditOutcome, ScanRequest, WcagLevel, WcagVersion};
use a11y_orchestrator::{CmsClient, CmsError, HttpCmsClient, ResultsPayload};
use a11y_test_utils::fixtures::heavy_results;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn client() -> (MockServer, HttpCmsClient) {
    let server = MockServer::start().await;
    let client = HttpCmsClient::new(format!("{}/", server.uri()), Duration::from_secs(5)).unwrap();
    (server, client)
}

#[tokio::test]
async fn initiate_returns_scan_identity() {
    let (server, client) = client().await;
    Mock::given(method("POST"))
        .and(path("/scan/initiate"))
        .and(body_partial_json(json!({ "pagePath": "/home", "wcagLevel": "AA" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "scanId": "scan-42",
            "pagePath": "/home",
            "pageUrl": "http://site/home.html",
            "pageTitle": "Home",
            "wcagLevel": "AA",
            "message": "Scan initiated. Please perform the scan in your browser."
        })))
        .expect(1)
        .mount(&server)
        .await;

    let initiated = client.initiate_scan("/home", WcagLevel::AA).await.unwrap();
    assert_eq!(initiated.scan_id.as_str(), "scan-42");
    assert_eq!(initiated.page_url, "http://site/home.html");
    assert_eq!(initiated.page_title.as_deref(), Some("Home"));
}

#[tokio::test]
async fn rejected_initiate_carries_message() {
    let (server, client) = client().await;
    Mock::given(method("POST"))
        .and(path("/scan/initiate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "message": "Page not found: /missing"
        })))
        .mount(&server)
        .await;

    let err = client.initiate_scan("/missing", WcagLevel::A).await.unwrap_err();
    assert_eq!(
        err,
        CmsError::Rejected {
            endpoint: "scan/initiate".into(),
            message: "Page not found: /missing".into(),
        }
    );
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn save_results_posts_payload() {
    let (server, client) = client().await;
    Mock::given(method("POST"))
        .and(path("/scan/results"))
        .and(body_partial_json(json!({
            "scanId": "scan-7",
            "pagePath": "/home",
            "score": 0,
            "axeResults": { "toolOptions": { "version": "4.8.3" } }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = AuditOutcome::Completed(
        a11y_core::EngineResults::from_value(heavy_results()).unwrap().into_results(),
    );
    let request = ScanRequest::new("scan-7", "/home", "http://site/home.html", "Home", WcagLevel::AA);
    let payload = ResultsPayload::new(&request, &outcome, &score(&outcome));
    client.save_results(&payload).await.unwrap();
}

#[tokio::test]
async fn server_error_is_a_status_error() {
    let (server, client) = client().await;
    Mock::given(method("POST"))
        .and(path("/scan/results"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "success": false,
            "error": "repository write failed"
        })))
        .mount(&server)
        .await;

    let request = ScanRequest::new("scan-8", "/a", "http://site/a.html", "A", WcagLevel::AA);
    let outcome = AuditOutcome::TimedOut { after_ms: 30_000 };
    let payload = ResultsPayload::new(&request, &outcome, &score(&outcome));
    let err = client.save_results(&payload).await.unwrap_err();
    assert!(matches!(
        err,
        CmsError::Status { status: 500, ref message, .. } if message == "repository write failed"
    ));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn wrapped_configuration_decodes_lenient_flags() {
    let (server, client) = client().await;
    Mock::given(method("GET"))
        .and(path("/configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "configuration": {
                "serverSideScan": "true",
                "wcagLevel": "AAA",
                "wcagVersion": "2.2"
            }
        })))
        .mount(&server)
        .await;

    let configuration = client.fetch_configuration().await.unwrap();
    assert!(configuration.server_side_scan);
    assert_eq!(configuration.wcag_level, WcagLevel::AAA);
    assert_eq!(configuration.wcag_version, WcagVersion::V2_2);
}

#[tokio::test]
async fn detailed_result_unwraps_stored_engine_output() {
    let (server, client) = client().await;
    Mock::given(method("GET"))
        .and(path("/results/detail"))
        .and(query_param("pagePath", "/home"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "result": {
                "pageUrl": "http://site/home.html",
                "score": 0.0,
                "fullResults": heavy_results().to_string()
            }
        })))
        .mount(&server)
        .await;

    let detail = client.detailed_result("/home").await.unwrap();
    assert_eq!(detail.results.violations.len(), 3);
    assert_eq!(detail.results.passes.len(), 20);
    assert_eq!(detail.stored_score, Some(0.0));
    assert_eq!(detail.page_url.as_deref(), Some("http://site/home.html"));
}

#[tokio::test]
async fn list_pages_skips_rows_without_path() {
    let (server, client) = client().await;
    Mock::given(method("GET"))
        .and(path("/pages"))
        .and(query_param("path", "/site"))
        .and(query_param("includeStatus", "false"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "path": "/site",
            "totalPages": 3,
            "items": [
                { "name": "home", "path": "/site/home", "url": "http://site/home.html", "title": "Home" },
                { "name": "broken", "error": "Error accessing page properties" },
                { "name": "about", "path": "/site/about", "url": "http://site/about.html" }
            ]
        })))
        .mount(&server)
        .await;

    let listed = client.list_pages("/site").await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].label(), "Home");
    assert_eq!(listed[1].path, "/site/about");
    assert_eq!(listed[1].title, None);
}

#[tokio::test]
async fn unreachable_cms_is_a_transport_error() {
    let client = HttpCmsClient::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
    let err = client.fetch_configuration().await.unwrap_err();
    assert!(matches!(err, CmsError::Transport { .. }));
    assert_eq!(err.endpoint(), "configuration");
}
