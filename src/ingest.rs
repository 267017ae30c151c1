//! Callback ingest endpoint.
//!
//! `POST /webhooks/{integration}`: accept one out-of-band delivery from the
//! workflow engine, classify it, and upsert it into the integration's store.
//! The response only confirms receipt; workflow-level outcomes travel inside
//! the payload and surface through the poll endpoint.

use axum::body::Bytes;
use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn, Instrument};

use crate::correlation::EntryKind;
use crate::error::{ApiError, IngestError};
use crate::integration::CallbackIntegration;
use crate::observability::create_delivery_span;
use crate::server::IntegrationState;
use crate::telemetry::generate_delivery_id;

pub const SESSION_ID_FIELD: &str = "session_id";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestAck {
    pub success: bool,
    pub received: bool,
}

impl IngestAck {
    pub fn received() -> Self {
        Self {
            success: true,
            received: true,
        }
    }
}

/// Decode a raw delivery into its session id and the remaining fields.
///
/// Anything that is not a JSON object is malformed. A missing, empty or
/// non-string `session_id` is a validation error.
pub fn parse_delivery(body: &[u8]) -> Result<(String, Map<String, Value>), IngestError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| IngestError::Malformed(e.to_string()))?;

    let mut fields = match value {
        Value::Object(fields) => fields,
        other => {
            return Err(IngestError::Malformed(format!(
                "expected a JSON object, got {}",
                json_type_name(&other)
            )))
        }
    };

    match fields.remove(SESSION_ID_FIELD) {
        Some(Value::String(session_id)) if !session_id.trim().is_empty() => {
            Ok((session_id, fields))
        }
        _ => Err(IngestError::MissingSessionId),
    }
}

/// Validate, classify and store one delivery. Exactly one `put` on success,
/// none on failure.
pub fn ingest<I: CallbackIntegration>(
    state: &IntegrationState<I>,
    body: &[u8],
) -> Result<EntryKind, IngestError> {
    let (session_id, fields) = match parse_delivery(body) {
        Ok(parsed) => parsed,
        Err(e) => {
            state.metrics.record_rejected_delivery();
            return Err(e);
        }
    };
    tracing::Span::current().record("session.id", session_id.as_str());

    let entry = state.integration.classify(fields, Utc::now());
    let kind = entry.kind();
    state.store.put(&session_id, entry);
    state.metrics.record_delivery(kind);

    Ok(kind)
}

pub async fn handle_ingest<I: CallbackIntegration>(
    State(state): State<IntegrationState<I>>,
    body: Bytes,
) -> Result<Json<IngestAck>, ApiError> {
    let delivery_id = generate_delivery_id();
    let span = create_delivery_span(state.integration.name(), &delivery_id);

    async move {
        match ingest(&state, &body) {
            Ok(kind) => {
                info!(?kind, "Accepted delivery");
                Ok(Json(IngestAck::received()))
            }
            Err(e) => {
                warn!("Rejected delivery: {}", e);
                Err(e.into())
            }
        }
    }
    .instrument(span)
    .await
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
