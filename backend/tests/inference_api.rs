mod common;

use actix_web::http::StatusCode;
use actix_web::{App, test, web};
use backend::inference::Dispatch;
use backend::pipeline::orchestrator::Orchestrator;
use backend::routes::configure_routes;
use backend::upstream::preprocess_service::{PreprocessClient, Preprocessor};
use common::{FakeDispatcher, FakePreprocessor, MemoryTracker, allowed_extensions, content_type, multipart_body};
use shared::TrackingStatus;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use url::Url;

struct Harness {
    preprocessor: Arc<FakePreprocessor>,
    dispatcher: Arc<FakeDispatcher>,
    tracker: Arc<MemoryTracker>,
}

impl Harness {
    fn new() -> Self {
        Self {
            preprocessor: Arc::new(FakePreprocessor::new()),
            dispatcher: Arc::new(FakeDispatcher::new()),
            tracker: Arc::new(MemoryTracker::new()),
        }
    }

    fn orchestrator(&self) -> web::Data<Orchestrator> {
        self.orchestrator_with(self.preprocessor.clone())
    }

    fn orchestrator_with(&self, preprocessor: Arc<dyn Preprocessor>) -> web::Data<Orchestrator> {
        let dispatcher: Arc<dyn Dispatch> = self.dispatcher.clone();
        web::Data::new(Orchestrator::new(
            preprocessor,
            dispatcher,
            self.tracker.clone(),
            allowed_extensions(),
        ))
    }
}

fn upload(task: &str, file_name: &str) -> test::TestRequest {
    test::TestRequest::post()
        .uri(&format!("/inference?task={}", task))
        .insert_header(("content-type", content_type()))
        .set_payload(multipart_body(file_name, b"raw image bytes"))
}

#[actix_web::test]
async fn classification_returns_category_and_tracks_success() {
    let harness = Harness::new();
    let app = test::init_service(App::new().app_data(harness.orchestrator()).configure(configure_routes)).await;

    let resp = test::call_service(&app, upload("classification", "cat.jpg").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body, serde_json::json!({"category": "tabby"}));

    let records = harness.tracker.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].file_name, "cat.jpg");
    assert_eq!(records[0].file_extension, "jpg");
    assert_eq!(records[0].task, "classification");
    assert_eq!(records[0].status, TrackingStatus::Passed);
    assert_eq!(records[0].id.len(), 32);
}

#[actix_web::test]
async fn unreachable_preprocessing_is_a_gateway_error_and_tracked() {
    let harness = Harness::new();
    let client = PreprocessClient::new(
        Url::parse("http://127.0.0.1:1/").unwrap(),
        Duration::from_secs(2),
    )
    .unwrap();
    let app = test::init_service(
        App::new()
            .app_data(harness.orchestrator_with(Arc::new(client)))
            .configure(configure_routes),
    )
    .await;

    let resp = test::call_service(&app, upload("detection", "cat.jpg").to_request()).await;
    assert!(matches!(
        resp.status(),
        StatusCode::BAD_GATEWAY | StatusCode::GATEWAY_TIMEOUT
    ));
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert!(body["Error"].as_str().is_some_and(|msg| !msg.is_empty()));

    let records = harness.tracker.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].task, "detection");
    assert_eq!(records[0].status, TrackingStatus::Failed);
}

#[actix_web::test]
async fn disallowed_extension_is_rejected_before_any_work() {
    let harness = Harness::new();
    let app = test::init_service(App::new().app_data(harness.orchestrator()).configure(configure_routes)).await;

    let resp = test::call_service(&app, upload("classification", "cat.exe").to_request()).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert!(body["Error"].as_str().unwrap().contains("cat.exe"));

    assert_eq!(harness.preprocessor.calls(), 0);
    assert!(harness.tracker.records().is_empty());
}

#[actix_web::test]
async fn extension_check_ignores_case() {
    let harness = Harness::new();
    let app = test::init_service(App::new().app_data(harness.orchestrator()).configure(configure_routes)).await;

    let resp = test::call_service(&app, upload("classification", "CAT.JPG").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(harness.tracker.records()[0].file_extension, "JPG");
}

#[actix_web::test]
async fn unknown_task_is_a_client_error_and_tracked_as_failed() {
    let harness = Harness::new();
    let app = test::init_service(App::new().app_data(harness.orchestrator()).configure(configure_routes)).await;

    let resp = test::call_service(&app, upload("captioning", "cat.jpg").to_request()).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert!(body["Error"].as_str().unwrap().contains("captioning"));

    let records = harness.tracker.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].task, "captioning");
    assert_eq!(records[0].status, TrackingStatus::Failed);
}

#[actix_web::test]
async fn missing_task_parameter_is_rejected() {
    let harness = Harness::new();
    let app = test::init_service(App::new().app_data(harness.orchestrator()).configure(configure_routes)).await;

    let req = test::TestRequest::post()
        .uri("/inference")
        .insert_header(("content-type", content_type()))
        .set_payload(multipart_body("cat.jpg", b"raw"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert!(body.get("Error").is_some());
    assert!(harness.tracker.records().is_empty());
}

#[actix_web::test]
async fn inference_failure_is_a_server_error_and_tracked() {
    let harness = Harness::new();
    harness.dispatcher.fail.store(true, Ordering::SeqCst);
    let app = test::init_service(App::new().app_data(harness.orchestrator()).configure(configure_routes)).await;

    let resp = test::call_service(&app, upload("segmentation", "street.jpeg").to_request()).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let records = harness.tracker.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, TrackingStatus::Failed);
}

#[actix_web::test]
async fn tracking_failure_does_not_change_the_response() {
    let harness = Harness::new();
    harness.tracker.fail.store(true, Ordering::SeqCst);
    let app = test::init_service(App::new().app_data(harness.orchestrator()).configure(configure_routes)).await;

    let resp = test::call_service(&app, upload("classification", "cat.jpg").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["category"], "tabby");
}

#[actix_web::test]
async fn detection_and_segmentation_answer_with_jpeg() {
    let harness = Harness::new();
    let app = test::init_service(App::new().app_data(harness.orchestrator()).configure(configure_routes)).await;

    for task in ["detection", "segmentation"] {
        let resp = test::call_service(&app, upload(task, "street.png").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get("content-type").unwrap(), "image/jpeg");
        let body = test::read_body(resp).await;
        assert_eq!(&body[..2], &[0xFF, 0xD8]);
    }

    let records = harness.tracker.records();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.status == TrackingStatus::Passed));
}

#[actix_web::test]
async fn upload_without_image_field_is_rejected() {
    let harness = Harness::new();
    let app = test::init_service(App::new().app_data(harness.orchestrator()).configure(configure_routes)).await;

    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"note\"\r\n\r\nhello\r\n--{b}--\r\n",
        b = common::BOUNDARY
    );
    let req = test::TestRequest::post()
        .uri("/inference?task=classification")
        .insert_header(("content-type", content_type()))
        .set_payload(body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(harness.preprocessor.calls(), 0);
}
