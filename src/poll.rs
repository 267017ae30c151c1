//! Poll endpoint.
//!
//! GET /poll/{integration}?session_id=... looks up the final result first
//! (consuming it) and falls back to the latest status update (left in place).
//! "Nothing yet" is a normal answer, not an error.

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::correlation::{EntryKind, Lookup, StatusUpdate};
use crate::error::{ApiError, PollError};
use crate::integration::CallbackIntegration;
use crate::observability::create_poll_span;
use crate::server::IntegrationState;

#[derive(Debug, Default, Deserialize)]
pub struct PollQuery {
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PollData<P> {
    Final(P),
    Status(StatusUpdate),
}

/// `{success, data, type}` when something was found, `{success: false,
/// data: null}` otherwise.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollResponse<P> {
    pub success: bool,
    pub data: Option<PollData<P>>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<EntryKind>,
}

impl<P> PollResponse<P> {
    pub fn not_found() -> Self {
        Self {
            success: false,
            data: None,
            kind: None,
        }
    }

    fn found(data: PollData<P>, kind: EntryKind) -> Self {
        Self {
            success: true,
            data: Some(data),
            kind: Some(kind),
        }
    }
}

impl<P> From<Lookup<P>> for PollResponse<P> {
    fn from(lookup: Lookup<P>) -> Self {
        match lookup {
            Lookup::Final(result) => Self::found(PollData::Final(result.payload), EntryKind::Final),
            Lookup::Status(status) => Self::found(PollData::Status(status), EntryKind::Status),
            Lookup::Absent => Self::not_found(),
        }
    }
}

pub fn poll<I: CallbackIntegration>(
    state: &IntegrationState<I>,
    query: &PollQuery,
) -> Result<PollResponse<I::Payload>, PollError> {
    let session_id = query
        .session_id
        .as_deref()
        .filter(|id| !id.trim().is_empty())
        .ok_or(PollError::MissingSessionId)?;

    let response = PollResponse::from(state.store.lookup(session_id));
    state.metrics.record_poll(response.kind);

    Ok(response)
}

pub async fn handle_poll<I: CallbackIntegration>(
    State(state): State<IntegrationState<I>>,
    query: Result<Query<PollQuery>, QueryRejection>,
) -> Result<Json<PollResponse<I::Payload>>, ApiError> {
    let Query(query) = query.map_err(|rejection| {
        let e = PollError::InvalidQuery(rejection.body_text());
        warn!(integration = %state.integration.name(), "Rejected poll: {}", e);
        e
    })?;

    let span = create_poll_span(state.integration.name(), query.session_id.as_deref());

    span.in_scope(|| match poll(&state, &query) {
        Ok(response) => {
            debug!(kind = ?response.kind, "Answered poll");
            Ok(Json(response))
        }
        Err(e) => {
            warn!("Rejected poll: {}", e);
            Err(e.into())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IntegrationConfig;
    use crate::correlation::{CorrelationStore, Entry};
    use crate::integration::JsonIntegration;
    use serde_json::{json, Value};

    fn state() -> IntegrationState<JsonIntegration> {
        IntegrationState::new(
            JsonIntegration::from_config(&IntegrationConfig::new(
                "assistant",
                "status",
                &["complete"],
            )),
            CorrelationStore::default(),
        )
    }

    fn query(session_id: &str) -> PollQuery {
        PollQuery {
            session_id: Some(session_id.to_string()),
        }
    }

    #[test]
    fn test_missing_session_id_is_rejected() {
        let state = state();
        assert_eq!(poll(&state, &PollQuery::default()), Err(PollError::MissingSessionId));
        assert_eq!(poll(&state, &query("")), Err(PollError::MissingSessionId));
    }

    #[test]
    fn test_final_is_served_once() {
        let state = state();
        state.store.put("abc", Entry::final_result(json!({"reply": "hi"})));

        let first = poll(&state, &query("abc")).unwrap();
        assert_eq!(first.kind, Some(EntryKind::Final));
        assert_eq!(first.data, Some(PollData::Final(json!({"reply": "hi"}))));

        assert_eq!(poll(&state, &query("abc")).unwrap(), PollResponse::not_found());
        let stats = state.metrics.get_stats();
        assert_eq!((stats.final_polls, stats.empty_polls), (1, 1));
    }

    #[test]
    fn test_status_is_served_repeatedly() {
        let state = state();
        state.store.put("abc", Entry::status("thinking", None));

        for _ in 0..2 {
            let response = poll(&state, &query("abc")).unwrap();
            assert_eq!(response.kind, Some(EntryKind::Status));
        }
        assert_eq!(state.metrics.get_stats().status_polls, 2);
    }

    #[test]
    fn test_response_shapes_serialize_to_wire_contract() {
        let missing: PollResponse<Value> = PollResponse::not_found();
        assert_eq!(
            serde_json::to_value(&missing).unwrap(),
            json!({"success": false, "data": null})
        );

        let final_response: PollResponse<Value> = PollResponse::from(Lookup::Final(
            crate::correlation::FinalResult::new(json!({"url": "x.png"})),
        ));
        assert_eq!(
            serde_json::to_value(&final_response).unwrap(),
            json!({"success": true, "data": {"url": "x.png"}, "type": "final"})
        );

        let status_response: PollResponse<Value> =
            PollResponse::from(Lookup::Status(StatusUpdate::new("processing", None)));
        let rendered = serde_json::to_value(&status_response).unwrap();
        assert_eq!(rendered["type"], json!("status"));
        assert_eq!(rendered["data"]["status"], json!("processing"));
        assert_eq!(rendered["data"]["message"], Value::Null);
    }
}
