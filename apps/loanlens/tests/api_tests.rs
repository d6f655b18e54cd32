//! Integration tests for the LoanLens REST API.
//!
//! Uses axum-test against the demo model bundle.

// Allow unwrap and panic in tests - these are standard for test code
#![allow(clippy::unwrap_used, clippy::panic)]

use axum::http::StatusCode;
use axum_test::TestServer;
use bytes::Bytes;
use loanlens::api::types::{BatchResponse, HealthResponse, PredictionResponse};
use loanlens::api::{AppState, build_router};
use loanlens::cli::load_pipeline;
use loanlens::config::ServerConfig;
use loanlens_core::template;
use serde_json::{Value, json};
use std::path::PathBuf;

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

fn models_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../models/loan_model.json")
}

fn server_with(config: ServerConfig) -> TestServer {
    let pipeline = load_pipeline(&models_path(), config.pipeline.clone()).unwrap();
    let app = build_router(AppState::new(pipeline, &config), &config);
    TestServer::new(app).unwrap()
}

fn server() -> TestServer {
    server_with(ServerConfig {
        rate_limit_per_second: 0,
        ..ServerConfig::default()
    })
}

fn sample() -> Value {
    json!({
        "no_of_dependents": 2,
        "education": "Graduate",
        "self_employed": "No",
        "income_annum": 8000000,
        "loan_amount": 25000000,
        "loan_term": 15,
        "cibil_score": 750,
        "residential_assets_value": 5000000,
        "commercial_assets_value": 3000000,
        "luxury_assets_value": 2000000,
        "bank_asset_value": 1000000
    })
}

fn weak() -> Value {
    json!({
        "no_of_dependents": 0,
        "education": " Not Graduate",
        "self_employed": " Yes",
        "income_annum": 4000000,
        "loan_amount": 15000000,
        "loan_term": 20,
        "cibil_score": 400,
        "residential_assets_value": 2000000,
        "commercial_assets_value": 500000,
        "luxury_assets_value": 1000000,
        "bank_asset_value": 500000
    })
}

fn error_code(body: &Value) -> &str {
    body["error"]["code"].as_str().unwrap_or_default()
}

// =============================================================================
// INFO ENDPOINTS
// =============================================================================

#[tokio::test]
async fn test_root_points_at_health() {
    let response = server().get("/").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["health"], "/api/v1/health");
}

#[tokio::test]
async fn test_health() {
    let response = server().get("/api/v1/health").await;
    response.assert_status_ok();
    let body: HealthResponse = response.json();
    assert_eq!(body.status, "healthy");
    assert_eq!(body.version, env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_models_lists_bundle() {
    let response = server().get("/api/v1/models").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["default_model"], "random_forest");
    assert_eq!(body["feature_count"], 11);
    assert_eq!(body["explainer"], "tree");
    assert_eq!(body["available_models"], json!(["decision_tree", "random_forest"]));
}

#[tokio::test]
async fn test_unknown_route_is_structured_404() {
    let response = server().get("/api/v1/nope").expect_failure().await;
    response.assert_status(StatusCode::NOT_FOUND);
    assert_eq!(error_code(&response.json()), "NOT_FOUND");
}

// =============================================================================
// PREDICT
// =============================================================================

#[tokio::test]
async fn test_predict_sample_is_approved() {
    let response = server().post("/api/v1/predict").json(&sample()).await;
    response.assert_status_ok();
    let body: PredictionResponse = response.json();
    assert_eq!(body.prediction, "Approved");
    assert_eq!(body.confidence, "High");
    assert!((body.probability - 0.96).abs() < 1e-9);
}

#[tokio::test]
async fn test_predict_with_decision_tree() {
    let response = server()
        .post("/api/v1/predict")
        .add_query_param("model", "decision_tree")
        .json(&weak())
        .await;
    response.assert_status_ok();
    let body: PredictionResponse = response.json();
    assert_eq!(body.prediction, "Rejected");
}

#[tokio::test]
async fn test_predict_unknown_model_is_404() {
    let response = server()
        .post("/api/v1/predict")
        .add_query_param("model", "xgboost")
        .json(&sample())
        .expect_failure()
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert_eq!(error_code(&body), "MODEL_NOT_FOUND");
    assert_eq!(body["error"]["message"], "Model xgboost not found");
}

#[tokio::test]
async fn test_predict_out_of_range_is_400() {
    let mut body = sample();
    body["cibil_score"] = json!(950);
    let response = server()
        .post("/api/v1/predict")
        .json(&body)
        .expect_failure()
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(error_code(&body), "BAD_REQUEST");
    assert_eq!(
        body["error"]["message"],
        "cibil_score must be between 300 and 900, got 950"
    );
}

#[tokio::test]
async fn test_predict_missing_fields_are_listed() {
    let response = server()
        .post("/api/v1/predict")
        .json(&json!({"education": "Graduate", "self_employed": "No"}))
        .expect_failure()
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    let message = body["error"]["message"].as_str().unwrap_or_default();
    assert!(message.starts_with("Missing required fields: no_of_dependents, income_annum"));
}

#[tokio::test]
async fn test_predict_malformed_json_is_400() {
    let response = server()
        .post("/api/v1/predict")
        .bytes(Bytes::from_static(b"{not json"))
        .content_type("application/json")
        .expect_failure()
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_oversized_body_is_413() {
    let server = server_with(ServerConfig {
        rate_limit_per_second: 0,
        max_body_bytes: 64,
        ..ServerConfig::default()
    });
    let response = server
        .post("/api/v1/predict")
        .json(&sample())
        .expect_failure()
        .await;
    response.assert_status(StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(error_code(&response.json()), "PAYLOAD_TOO_LARGE");
}

// =============================================================================
// BATCH
// =============================================================================

#[tokio::test]
async fn test_batch_predicts_in_order() {
    let response = server()
        .post("/api/v1/predict/batch")
        .json(&json!({"data": [sample(), weak()]}))
        .await;
    response.assert_status_ok();
    let body: BatchResponse = response.json();
    let labels: Vec<&str> = body
        .predictions
        .iter()
        .map(|p| p.prediction.as_str())
        .collect();
    assert_eq!(labels, vec!["Approved", "Rejected"]);
}

#[tokio::test]
async fn test_batch_reports_failing_index() {
    let mut bad = weak();
    bad["loan_term"] = json!(2.5);
    let response = server()
        .post("/api/v1/predict/batch")
        .json(&json!({"data": [sample(), bad]}))
        .expect_failure()
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    let message = body["error"]["message"].as_str().unwrap_or_default();
    assert!(message.starts_with("item 1:"), "{message}");
}

#[tokio::test]
async fn test_batch_over_limit_is_rejected() {
    let server = server_with(ServerConfig {
        rate_limit_per_second: 0,
        max_batch: 2,
        ..ServerConfig::default()
    });
    let response = server
        .post("/api/v1/predict/batch")
        .json(&json!({"data": [sample(), sample(), sample()]}))
        .expect_failure()
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_empty_batch_is_rejected() {
    let response = server()
        .post("/api/v1/predict/batch")
        .json(&json!({"data": []}))
        .expect_failure()
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

// =============================================================================
// CSV
// =============================================================================

#[tokio::test]
async fn test_csv_upload_returns_attachment() {
    let mut csv = template::csv_template();
    csv.push_str("0,Not Graduate,Yes,4000000,15000000,20,400,2000000,500000,1000000,500000\n");
    csv.push_str("0,PhD,Yes,1,1,1,400,1,1,1,1\n");

    let response = server()
        .post("/api/v1/predict/csv")
        .bytes(Bytes::from(csv))
        .content_type("text/csv")
        .await;
    response.assert_status_ok();
    assert_eq!(response.header("content-type"), "text/csv");
    assert_eq!(
        response.header("content-disposition"),
        "attachment; filename=predictions.csv"
    );

    let text = response.text();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[1].starts_with("1,Approved,"));
    assert!(lines[2].starts_with("2,Rejected,0.9433,High,"));
    assert!(lines[3].starts_with("3,Error,0.0000,,"));
}

#[tokio::test]
async fn test_csv_short_row_fails_alone() {
    let template = template::csv_template();
    let sample_row = template.lines().nth(1).unwrap().to_string();
    let csv = format!("{template}1,Graduate,No,100,100,5,700,0,0,0\n{sample_row}\n");

    let response = server()
        .post("/api/v1/predict/csv")
        .bytes(Bytes::from(csv))
        .content_type("text/csv")
        .await;
    response.assert_status_ok();

    let text = response.text();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[1].starts_with("1,Approved,"));
    assert!(lines[2].starts_with("2,Error,0.0000,,Row on line 3 has 10 fields"));
    assert!(lines[3].starts_with("3,Approved,"));
}

#[tokio::test]
async fn test_csv_multipart_file_upload() {
    let mut body = String::new();
    body.push_str("--XBOUND\r\n");
    body.push_str("Content-Disposition: form-data; name=\"file\"; filename=\"loans.csv\"\r\n");
    body.push_str("Content-Type: text/csv\r\n\r\n");
    body.push_str(&template::csv_template());
    body.push_str("\r\n--XBOUND--\r\n");

    let response = server()
        .post("/api/v1/predict/csv")
        .bytes(Bytes::from(body))
        .content_type("multipart/form-data; boundary=XBOUND")
        .await;
    response.assert_status_ok();

    let text = response.text();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[1].starts_with("1,Approved,0.9600,High,"));
}

#[tokio::test]
async fn test_csv_multipart_without_file_part_is_400() {
    let body = "--XBOUND\r\n\
                Content-Disposition: form-data; name=\"notes\"\r\n\r\n\
                hello\r\n\
                --XBOUND--\r\n";

    let response = server()
        .post("/api/v1/predict/csv")
        .bytes(Bytes::from_static(body.as_bytes()))
        .content_type("multipart/form-data; boundary=XBOUND")
        .expect_failure()
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert!(body["error"]["message"].as_str().unwrap().contains("file"));
}

#[tokio::test]
async fn test_csv_without_header_is_400() {
    let response = server()
        .post("/api/v1/predict/csv")
        .bytes(Bytes::from_static(b"\n\n"))
        .content_type("text/csv")
        .expect_failure()
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

// =============================================================================
// EXPLAIN / RECOMMEND
// =============================================================================

#[tokio::test]
async fn test_explain_weak_applicant() {
    let response = server().post("/api/v1/explain").json(&weak()).await;
    response.assert_status_ok();
    let body: Value = response.json();

    assert_eq!(body["prediction"], "Rejected");
    let cibil = body["shap_values"]["cibil_score"].as_f64().unwrap();
    assert!((cibil + 0.507_893).abs() < 1e-5);
    assert_eq!(body["top_contributing_features"][0]["feature"], "cibil_score");
    assert_eq!(body["top_contributing_features"][0]["impact"], "Negative");
    let top = body["top_contributing_features"].as_array().unwrap();
    assert_eq!(top.len(), 5);
    let ranks: Vec<u64> = top.iter().map(|t| t["rank"].as_u64().unwrap()).collect();
    assert_eq!(ranks, vec![1, 2, 3, 4, 5]);
    assert!(top[0]["shap_value"].is_f64());
    assert!(top[0]["importance"].is_f64());
    assert_eq!(
        body["feature_impact"]["cibil_score"],
        "Decreases approval probability by 0.508"
    );

    let keys: Vec<&String> = body["shap_values"].as_object().unwrap().keys().collect();
    assert_eq!(keys[0], "no_of_dependents");
    assert_eq!(keys.len(), 11);
}

#[tokio::test]
async fn test_recommend_weak_applicant() {
    let response = server().post("/api/v1/recommend").json(&weak()).await;
    response.assert_status_ok();
    let body: Value = response.json();

    assert_eq!(body["current_prediction"], "Rejected");
    assert_eq!(body["recommendations"][0]["feature"], "cibil_score");
    assert_eq!(body["recommendations"][0]["priority"], "High");
    assert_eq!(body["recommendations"][1]["feature"], "loan_term");
    assert_eq!(body["recommendations"][0]["current_value"], json!(400));
    assert!(body["recommendations"][0]["current_value"].is_u64());
    let gain = body["potential_improvements"]["cibil_score"].as_f64().unwrap();
    assert!((gain - 0.197_514).abs() < 1e-4);
}

#[tokio::test]
async fn test_recommend_approved_applicant() {
    let response = server().post("/api/v1/recommend").json(&sample()).await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["recommendations"][0]["feature"], "loan_approved");
    assert_eq!(body["potential_improvements"], json!({}));
    assert!(body["recommendations"][0].get("impact").is_none());
}

// =============================================================================
// TEMPLATES
// =============================================================================

#[tokio::test]
async fn test_template_csv_download() {
    let response = server().get("/api/v1/template").await;
    response.assert_status_ok();
    assert_eq!(
        response.header("content-disposition"),
        "attachment; filename=loan_application_template.csv"
    );
    assert_eq!(response.text(), template::csv_template());
}

#[tokio::test]
async fn test_template_json() {
    let response = server().get("/api/v1/template/json").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["columns"].as_array().map(Vec::len), Some(11));
    assert_eq!(body["sample_data"]["cibil_score"], 750);
}

// =============================================================================
// RATE LIMITING
// =============================================================================

#[tokio::test]
async fn test_rate_limit_returns_429_with_retry_after() {
    let server = server_with(ServerConfig {
        rate_limit_per_second: 1,
        ..ServerConfig::default()
    });
    server.get("/api/v1/health").await.assert_status_ok();

    let response = server.get("/api/v1/health").expect_failure().await;
    response.assert_status(StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(error_code(&response.json()), "RATE_LIMITED");
    assert!(response.maybe_header("retry-after").is_some());
}
