//! Route handlers.
//!
//! Each handler parses its body into core types, runs the pipeline on the
//! blocking pool, and maps the result into a response type from
//! [`super::types`].

use super::AppState;
use super::error::ApiError;
use super::types::{
    BatchRequest, BatchResponse, ExplanationResponse, HealthResponse, ModelQuery,
    PredictionResponse, RootResponse, application_from_json,
};
use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Multipart, Query, Request, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use loanlens_core::pipeline::ModelInfo;
use loanlens_core::template::{self, JsonTemplate};
use loanlens_core::{Pipeline, RawApplication, RecommendationReport};
use serde_json::Value;
use std::sync::Arc;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Run CPU-bound pipeline work off the async executor.
async fn blocking<T, F>(state: &AppState, work: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&Pipeline) -> Result<T, ApiError> + Send + 'static,
{
    let pipeline = Arc::clone(&state.pipeline);
    tokio::task::spawn_blocking(move || work(&pipeline))
        .await
        .map_err(|e| ApiError::Internal(format!("pipeline task failed: {e}")))?
}

/// Map an extractor rejection to 413 or 400.
fn rejected(status: StatusCode, body_text: String) -> ApiError {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge
    } else {
        ApiError::BadRequest(body_text)
    }
}

fn json_body(payload: Result<Json<Value>, JsonRejection>) -> Result<Value, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| rejected(rejection.status(), rejection.body_text()))
}

/// CSV text from either a `multipart/form-data` upload (the `file` part)
/// or a raw request body.
async fn csv_body(request: Request, state: &AppState) -> Result<String, ApiError> {
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("multipart/form-data"));

    if !is_multipart {
        return String::from_request(request, state)
            .await
            .map_err(|rejection| rejected(rejection.status(), rejection.body_text()));
    }

    let mut multipart = Multipart::from_request(request, state)
        .await
        .map_err(|rejection| rejected(rejection.status(), rejection.body_text()))?;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| rejected(e.status(), e.body_text()))?
    {
        if field.name() == Some("file") {
            return field
                .text()
                .await
                .map_err(|e| rejected(e.status(), e.body_text()));
        }
    }
    Err(ApiError::BadRequest(
        "multipart upload has no \"file\" part".to_string(),
    ))
}

fn application(payload: Result<Json<Value>, JsonRejection>) -> Result<RawApplication, ApiError> {
    application_from_json(json_body(payload)?).map_err(ApiError::BadRequest)
}

// =============================================================================
// INFO
// =============================================================================

pub async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        message: "LoanLens loan prediction API",
        version: VERSION,
        health: "/api/v1/health",
    })
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        message: "Loan prediction API is running".to_string(),
        version: VERSION.to_string(),
    })
}

pub async fn models(State(state): State<AppState>) -> Json<ModelInfo> {
    Json(state.pipeline.model_info())
}

pub async fn not_found() -> ApiError {
    ApiError::NotFound("No such route".to_string())
}

// =============================================================================
// PREDICTION
// =============================================================================

pub async fn predict(
    State(state): State<AppState>,
    Query(query): Query<ModelQuery>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<PredictionResponse>, ApiError> {
    let raw = application(payload)?;
    tracing::info!(endpoint = "predict", model = ?query.model, "request");

    let prediction = blocking(&state, move |pipeline| {
        Ok(pipeline.predict(&raw, query.model.as_deref())?)
    })
    .await?;

    tracing::info!(
        endpoint = "predict",
        prediction = %prediction.label,
        probability = prediction.probability,
        "response"
    );
    Ok(Json(prediction.into()))
}

pub async fn predict_batch(
    State(state): State<AppState>,
    Query(query): Query<ModelQuery>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<BatchResponse>, ApiError> {
    let request: BatchRequest = serde_json::from_value(json_body(payload)?)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    if request.data.is_empty() {
        return Err(ApiError::BadRequest("Batch contains no applications".to_string()));
    }
    if request.data.len() > state.max_batch {
        return Err(ApiError::BadRequest(format!(
            "Batch of {} exceeds the limit of {}",
            request.data.len(),
            state.max_batch
        )));
    }

    let raws = request
        .data
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            application_from_json(item).map_err(|e| ApiError::BadRequest(format!("item {index}: {e}")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    tracing::info!(endpoint = "predict/batch", batch_size = raws.len(), "request");

    let predictions = blocking(&state, move |pipeline| {
        Ok(pipeline.predict_batch(&raws, query.model.as_deref())?)
    })
    .await?;

    tracing::info!(
        endpoint = "predict/batch",
        predictions = predictions.len(),
        "response"
    );
    Ok(Json(BatchResponse {
        predictions: predictions.into_iter().map(Into::into).collect(),
    }))
}

pub async fn predict_csv(
    State(state): State<AppState>,
    Query(query): Query<ModelQuery>,
    request: Request,
) -> Result<Response, ApiError> {
    let text = csv_body(request, &state).await?;
    tracing::info!(endpoint = "predict/csv", bytes = text.len(), "request");

    let max_batch = state.max_batch;
    let csv = blocking(&state, move |pipeline| {
        let rows = text.lines().filter(|l| !l.trim().is_empty()).count();
        if rows > max_batch + 1 {
            return Err(ApiError::BadRequest(format!(
                "CSV has more than {max_batch} rows"
            )));
        }
        Ok(pipeline.predict_csv(&text, query.model.as_deref())?)
    })
    .await?;

    tracing::info!(
        endpoint = "predict/csv",
        rows = csv.lines().count().saturating_sub(1),
        "response"
    );
    Ok(csv_attachment(csv, "predictions.csv"))
}

// =============================================================================
// EXPLANATION
// =============================================================================

pub async fn explain(
    State(state): State<AppState>,
    Query(query): Query<ModelQuery>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<ExplanationResponse>, ApiError> {
    let raw = application(payload)?;
    tracing::info!(endpoint = "explain", model = ?query.model, "request");

    let explanation = blocking(&state, move |pipeline| {
        Ok(pipeline.explain(&raw, query.model.as_deref())?)
    })
    .await?;

    tracing::info!(
        endpoint = "explain",
        prediction = %explanation.prediction.label,
        top_feature = ?explanation.top_contributing_features.first().map(|t| t.feature.name()),
        "response"
    );
    Ok(Json(explanation.into()))
}

pub async fn recommend(
    State(state): State<AppState>,
    Query(query): Query<ModelQuery>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<RecommendationReport>, ApiError> {
    let raw = application(payload)?;
    tracing::info!(endpoint = "recommend", model = ?query.model, "request");

    let report = blocking(&state, move |pipeline| {
        Ok(pipeline.recommend(&raw, query.model.as_deref())?)
    })
    .await?;

    tracing::info!(
        endpoint = "recommend",
        prediction = %report.current_prediction,
        recommendations = report.recommendations.len(),
        "response"
    );
    Ok(Json(report))
}

// =============================================================================
// TEMPLATES
// =============================================================================

pub async fn template_csv() -> Response {
    csv_attachment(template::csv_template(), "loan_application_template.csv")
}

pub async fn template_json() -> Json<JsonTemplate> {
    Json(template::json_template())
}

fn csv_attachment(body: String, filename: &str) -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename={filename}"),
            ),
        ],
        body,
    )
        .into_response()
}
