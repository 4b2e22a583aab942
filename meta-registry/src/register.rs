use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use bytes::Bytes;
use tracing::instrument;

use crate::api::{HealthResponse, RegisterError, RegisterResponse};
use crate::collector::CollectedBatch;
use crate::event::{Compression, TrackEvent};
use crate::metrics_consts::{BATCHES_RECEIVED, RECORDS_RECEIVED};
use crate::router;

#[instrument(skip_all, fields(batch_size, content_encoding))]
pub async fn register(
    state: State<router::State>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<RegisterResponse>, RegisterError> {
    let content_encoding = headers
        .get("content-encoding")
        .map_or("", |v| v.to_str().unwrap_or(""));
    tracing::Span::current().record("content_encoding", content_encoding);

    let payload = TrackEvent::decode_body(
        Compression::from_header(content_encoding),
        body,
        state.max_body_size,
    )?;
    let batch = CollectedBatch::collect(TrackEvent::parse_batch(&payload));

    tracing::Span::current().record("batch_size", batch.records);
    metrics::counter!(BATCHES_RECEIVED).increment(1);
    metrics::counter!(RECORDS_RECEIVED).increment(batch.records as u64);

    let outcome = state.registrar.register(&batch).await?;

    Ok(Json(RegisterResponse {
        ok: true,
        registered: outcome.records,
    }))
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: String::from("ok"),
    })
}
