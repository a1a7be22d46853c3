//! Image-analysis client against a local fake endpoint

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use carelink_core::{PrescriptionStatus, Role, TimeOfDay};
use carelink_store::{
    AnalysisError, CareError, ErrorKind, HttpAnalyzer, PrescriptionAnalyzer,
    PrescriptionRepository,
};
use common::{create_test_app, register};
use serde_json::{json, Value};
use tokio::net::TcpListener;

/// Serve `router` on an ephemeral port and return the analyze URL
async fn spawn_endpoint(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}/analyze", addr)
}

async fn recognize(Json(body): Json<Value>) -> impl IntoResponse {
    let image = body["image_url"].as_str().unwrap_or_default().to_string();
    Json(json!({
        "medicines": [
            {"name": "Panadol", "dose": "1 tablet", "time": "morning,night", "note": "after meals"},
            {"name": "Antacid", "times": ["noon"]}
        ],
        "raw_text": format!("recognized from {}", image)
    }))
}

fn analyzer(url: String) -> HttpAnalyzer {
    HttpAnalyzer::new(url, Duration::from_secs(5))
}

/// Test: a successful response decodes into the payload
#[tokio::test]
async fn test_analyze_success() {
    let url = spawn_endpoint(Router::new().route("/analyze", post(recognize))).await;

    let payload = analyzer(url).analyze("file:///rx.jpg").await.unwrap();
    assert_eq!(payload.medicines.len(), 2);
    assert_eq!(payload.medicines[0].name.as_deref(), Some("Panadol"));
    assert_eq!(
        payload.raw_text.as_deref(),
        Some("recognized from file:///rx.jpg")
    );
}

/// Test: 429 surfaces as a rate-limit error with its retry hint
#[tokio::test]
async fn test_rate_limit_is_distinguishable() {
    let router = Router::new().route(
        "/analyze",
        post(|| async {
            (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, "7")],
                "slow down",
            )
        }),
    );
    let url = spawn_endpoint(router).await;

    let err = analyzer(url).analyze("file:///rx.jpg").await.unwrap_err();
    assert!(err.is_rate_limited());
    assert!(matches!(
        err,
        AnalysisError::RateLimited {
            retry_after_secs: Some(7)
        }
    ));

    let care = CareError::from(err);
    assert_eq!(care.kind(), ErrorKind::Analysis);
    assert!(care.user_message().contains("busy"));
}

/// Test: other non-2xx responses carry status and body
#[tokio::test]
async fn test_server_error_status() {
    let router = Router::new().route(
        "/analyze",
        post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "model offline") }),
    );
    let url = spawn_endpoint(router).await;

    let err = analyzer(url).analyze("file:///rx.jpg").await.unwrap_err();
    match err {
        AnalysisError::Status { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "model offline");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

/// Test: a body that is not the expected shape is a decode error
#[tokio::test]
async fn test_malformed_body_is_decode_error() {
    let router = Router::new().route("/analyze", post(|| async { "not json" }));
    let url = spawn_endpoint(router).await;

    let err = analyzer(url).analyze("file:///rx.jpg").await.unwrap_err();
    assert!(matches!(err, AnalysisError::Decode(_)));
}

/// Test: analysis results are stored under the active care target
#[tokio::test]
async fn test_submit_analysis_stores_prescription() {
    let url = spawn_endpoint(Router::new().route("/analyze", post(recognize))).await;
    let (app, _store) = create_test_app();
    let app = app.with_analyzer(Arc::new(analyzer(url)));
    let session = register(&app, "a@x.com", Role::Caregiver).await;
    let group = app
        .linking()
        .create_group(&session, "Grandpa Wang", None)
        .await
        .unwrap();

    let id = app
        .submit_analysis(&session, "file:///rx.jpg")
        .await
        .unwrap();

    let rx = app.prescriptions().get_by_id(&id).await.unwrap().unwrap();
    assert_eq!(rx.care_target_id, group.id);
    assert_eq!(rx.status, PrescriptionStatus::Parsed);
    assert_eq!(rx.source_image_ref.as_deref(), Some("file:///rx.jpg"));
    assert_eq!(rx.items.len(), 2);
    assert_eq!(
        rx.items[0].times_of_day.as_slice(),
        &[TimeOfDay::Morning, TimeOfDay::Night]
    );
    assert_eq!(rx.items[1].dose, "");
}

/// Test: submitting needs a linked care target and a configured analyzer
#[tokio::test]
async fn test_submit_analysis_preconditions() {
    let (app, _store) = create_test_app();
    let session = register(&app, "a@x.com", Role::Caregiver).await;

    let err = app
        .submit_analysis(&session, "file:///rx.jpg")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Auth);

    app.linking()
        .create_group(&session, "Grandpa Wang", None)
        .await
        .unwrap();
    let err = app
        .submit_analysis(&session, "file:///rx.jpg")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CareError::Analysis(AnalysisError::NotConfigured)
    ));
}
