use std::sync::Mutex;
use std::time::Duration;

use mapjob_core::{JobConfig, JobRequest, ProgressEvent, Stage, TerminalOutcome, UploadedFile};
use mapjob_engine::{BackendError, BackendSettings, HttpBackend, JobBackend, ProgressSink};
use pretty_assertions::assert_eq;
use url::Url;
use wiremock::matchers::{body_json, body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Default)]
struct TestSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl TestSink {
    fn stages(&self) -> Vec<Stage> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|event| event.stage)
            .collect()
    }
}

impl ProgressSink for TestSink {
    fn emit(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

fn backend(server: &MockServer) -> HttpBackend {
    let settings = BackendSettings::new(Url::parse(&server.uri()).unwrap());
    HttpBackend::new(settings).expect("client")
}

fn request() -> JobRequest {
    JobRequest {
        input: UploadedFile::new("site.kmz", b"PK\x03\x04".to_vec()),
        config: JobConfig {
            project_name: "Corridor".to_string(),
            ..JobConfig::default()
        },
    }
}

#[tokio::test]
async fn submit_streams_events_and_resolves_archive_link() {
    mapjob_logging::initialize_for_tests();
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"stage\":\"upload\",\"message\":\"File received\",\"progress\":5,\"job_id\":\"ab12cd34\"}\n\n",
        "data: {\"stage\":\"processing\",\"message\":\"Querying federal databases...\",\"progress\":40}\n\n",
        "data: {\"stage\":\"complete\",\"message\":\"Processing complete!\",\"progress\":100,",
        "\"job_id\":\"ab12cd34\",\"download_url\":\"/api/download/ab12cd34\"}\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/api/process"))
        .and(body_string_contains("name=\"project_name\""))
        .and(body_string_contains("Corridor"))
        .and(body_string_contains("filename=\"site.kmz\""))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let sink = TestSink::default();
    let outcome = backend(&server).submit(&request(), &sink).await;

    assert_eq!(
        sink.stages(),
        vec![Stage::Upload, Stage::Processing, Stage::Complete]
    );
    match outcome {
        TerminalOutcome::Succeeded(success) => {
            assert_eq!(success.job_id.as_deref(), Some("ab12cd34"));
            assert_eq!(
                success.links.archive_url,
                Some(format!("{}/api/download/ab12cd34", server.uri()))
            );
        }
        other => panic!("expected success, got {other:?}"),
    }
}

#[tokio::test]
async fn rate_limit_short_circuits_with_server_message() {
    mapjob_logging::initialize_for_tests();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/process"))
        .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
            "error": "Rate limit exceeded",
            "message": "Maximum 20 runs per day. Please try again tomorrow.",
            "remaining_runs": 0
        })))
        .mount(&server)
        .await;

    let sink = TestSink::default();
    let outcome = backend(&server).submit(&request(), &sink).await;

    assert_eq!(
        outcome,
        TerminalOutcome::RateLimited {
            message: "Maximum 20 runs per day. Please try again tomorrow.".to_string()
        }
    );
    assert!(sink.stages().is_empty());
}

#[tokio::test]
async fn rejected_submission_uses_detail() {
    mapjob_logging::initialize_for_tests();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/process"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(serde_json::json!({ "detail": "File too large. Maximum size: 5MB" })),
        )
        .mount(&server)
        .await;

    let outcome = backend(&server)
        .submit(&request(), &TestSink::default())
        .await;
    assert_eq!(outcome, TerminalOutcome::failed("File too large. Maximum size: 5MB"));
}

#[tokio::test]
async fn unreachable_service_becomes_a_failed_outcome() {
    mapjob_logging::initialize_for_tests();
    let settings = BackendSettings {
        connect_timeout: Duration::from_millis(200),
        ..BackendSettings::new(Url::parse("http://127.0.0.1:9").unwrap())
    };
    let outcome = HttpBackend::new(settings)
        .unwrap()
        .submit(&request(), &TestSink::default())
        .await;
    assert!(matches!(outcome, TerminalOutcome::Failed { .. }));
}

#[tokio::test]
async fn claim_posts_batch_and_returns_count() {
    mapjob_logging::initialize_for_tests();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/claim-jobs"))
        .and(body_json(serde_json::json!({
            "user_id": "user-1",
            "job_ids": ["a", "b", "c"]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "claimed": 2 })))
        .expect(1)
        .mount(&server)
        .await;

    let ids = vec!["a".to_string(), "b".to_string(), "c".to_string()];
    let claimed = backend(&server).claim("user-1", &ids).await.unwrap();
    assert_eq!(claimed, 2);
}

#[tokio::test]
async fn download_uses_disposition_filename() {
    mapjob_logging::initialize_for_tests();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/download/ab12cd34"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header(
                    "Content-Disposition",
                    "attachment; filename=\"peit_results_ab12cd34.zip\"",
                )
                .set_body_raw(b"PK\x05\x06".to_vec(), "application/zip"),
        )
        .mount(&server)
        .await;

    let file = backend(&server)
        .download("/api/download/ab12cd34")
        .await
        .unwrap();
    assert_eq!(file.filename, "peit_results_ab12cd34.zip");
    assert_eq!(file.bytes, b"PK\x05\x06");
}

#[tokio::test]
async fn expired_download_reports_server_detail() {
    mapjob_logging::initialize_for_tests();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/download/gone"))
        .respond_with(
            ResponseTemplate::new(404)
                .set_body_json(serde_json::json!({ "detail": "Result not found or expired" })),
        )
        .mount(&server)
        .await;

    let err = backend(&server)
        .download(&format!("{}/api/download/gone", server.uri()))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        BackendError::Status {
            status: 404,
            detail: "Result not found or expired".to_string()
        }
    );
    assert_eq!(err.to_string(), "Result not found or expired");
}

#[tokio::test]
async fn status_endpoints_decode() {
    mapjob_logging::initialize_for_tests();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/rate-limit"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "remaining_runs": 17,
            "max_runs_per_day": 20,
            "resets_at": "midnight UTC"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "healthy",
            "service": "peit-processor"
        })))
        .mount(&server)
        .await;

    let backend = backend(&server);
    let limit = backend.rate_limit().await.unwrap();
    assert_eq!(limit.remaining_runs, 17);
    assert_eq!(limit.max_runs_per_day, 20);
    let health = backend.health().await.unwrap();
    assert_eq!(health.status, "healthy");
}

#[tokio::test]
async fn api_url_path_prefix_is_kept() {
    mapjob_logging::initialize_for_tests();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/peit/api/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "healthy",
            "service": "peit-processor"
        })))
        .expect(1)
        .mount(&server)
        .await;

    // Both with and without the trailing slash.
    for base in [format!("{}/peit", server.uri()), format!("{}/peit/", server.uri())] {
        let backend = HttpBackend::new(BackendSettings::new(Url::parse(&base).unwrap())).unwrap();
        assert_eq!(
            backend.resolve_link("/api/download/ab12cd34").unwrap().as_str(),
            format!("{}/peit/api/download/ab12cd34", server.uri())
        );
        assert_eq!(
            backend.resolve_link("https://maps.example.com/ab12cd34").unwrap().as_str(),
            "https://maps.example.com/ab12cd34"
        );
    }

    let backend = HttpBackend::new(
        BackendSettings::new(Url::parse(&format!("{}/peit", server.uri())).unwrap()),
    )
    .unwrap();
    assert_eq!(backend.health().await.unwrap().service, "peit-processor");
}
