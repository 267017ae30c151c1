//! Per-integration discriminant contracts.
//!
//! The trigger code and the webhook sender of each integration agree on one
//! field whose value marks a delivery as in-progress or complete. The store
//! never looks at payloads; only the integration knows how to classify them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::IntegrationConfig;
use crate::correlation::{Entry, FinalResult, StatusUpdate};

/// A workflow-callback integration: a route name plus a classification rule
/// turning an untrusted delivery body into a status or final entry.
pub trait CallbackIntegration: Send + Sync + 'static {
    type Payload: Serialize + Send + Sync + 'static;

    fn name(&self) -> &str;

    /// Classify a delivery whose `session_id` has already been extracted.
    /// Absent optional fields must not fail classification.
    fn classify(&self, body: Map<String, Value>, observed_at: DateTime<Utc>)
        -> Entry<Self::Payload>;
}

/// Config-driven integration carrying opaque JSON payloads.
///
/// A delivery is final when the discriminant field is absent or null, or when
/// its value is one of `complete_values`. Anything else is a status update
/// whose phase is the discriminant value.
#[derive(Debug, Clone)]
pub struct JsonIntegration {
    name: String,
    discriminant_field: String,
    complete_values: Vec<String>,
    message_field: String,
    result_field: Option<String>,
}

impl JsonIntegration {
    pub fn from_config(config: &IntegrationConfig) -> Self {
        Self {
            name: config.name.clone(),
            discriminant_field: config.discriminant_field.clone(),
            complete_values: config.complete_values.clone(),
            message_field: config.message_field.clone(),
            result_field: config.result_field.clone(),
        }
    }

    fn is_complete(&self, phase: &str) -> bool {
        self.complete_values.iter().any(|value| value == phase)
    }
}

fn marker_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

impl CallbackIntegration for JsonIntegration {
    type Payload = Value;

    fn name(&self) -> &str {
        &self.name
    }

    fn classify(&self, mut body: Map<String, Value>, observed_at: DateTime<Utc>) -> Entry<Value> {
        let phase = body
            .get(&self.discriminant_field)
            .filter(|value| !value.is_null())
            .map(marker_text);

        if let Some(phase) = phase.filter(|phase| !self.is_complete(phase)) {
            let message = body
                .get(&self.message_field)
                .and_then(Value::as_str)
                .map(str::to_owned);

            return Entry::Status(StatusUpdate {
                phase,
                message,
                observed_at,
            });
        }

        let result = self
            .result_field
            .as_deref()
            .and_then(|field| body.remove(field));
        let payload = match result {
            Some(value) => value,
            None => Value::Object(body),
        };

        Entry::Final(FinalResult {
            payload,
            observed_at,
        })
    }
}
