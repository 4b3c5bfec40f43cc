use std::collections::HashMap;

use axum::{
    extract::{DefaultBodyLimit, Query, State},
    http::HeaderMap,
    routing, Json, Router,
};
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use tracing::info;

use crate::pipeline::{BatchResponse, LeadPipeline, QueueBatch};

pub fn add_routes(router: Router, pipeline: LeadPipeline, max_body_size: usize) -> Router {
    router
        .route("/", routing::get(index))
        .route("/_readiness", routing::get(index))
        .route("/_liveness", routing::get(index))
        .route(
            "/batch",
            routing::post(post_batch)
                .with_state(pipeline)
                .layer(DefaultBodyLimit::max(max_body_size)),
        )
        .route(
            "/echo",
            routing::post(post_echo).layer(DefaultBodyLimit::max(max_body_size)),
        )
}

pub async fn index() -> &'static str {
    "lead sync worker"
}

/// Process a queue batch. Always answers 200: per-message failures are listed in the body so
/// the queue only redelivers those.
pub async fn post_batch(
    State(pipeline): State<LeadPipeline>,
    Json(batch): Json<QueueBatch>,
) -> Json<BatchResponse> {
    Json(pipeline.process_batch(&batch.records).await)
}

/// Log whatever was sent and acknowledge it.
pub async fn post_echo(
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    body: String,
) -> Json<Value> {
    let headers: Map<String, Value> = headers
        .iter()
        .map(|(name, value)| {
            (
                name.to_string(),
                Value::String(String::from_utf8_lossy(value.as_bytes()).into_owned()),
            )
        })
        .collect();
    let parsed_body = serde_json::from_str::<Value>(&body).ok();

    info!(
        body = %body,
        parsed_body = ?parsed_body,
        headers = ?headers,
        query = ?query,
        "echo request received"
    );

    Json(json!({
        "message": "Data logged successfully",
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        "body": body,
        "parsedBody": parsed_body,
        "headers": headers,
        "query": query,
    }))
}
