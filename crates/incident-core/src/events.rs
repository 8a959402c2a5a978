use crate::model::{CanonicalEvent, EventKind, Incident};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

const INCIDENT_RESOURCE_TYPE: &str = "incident";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("malformed webhook payload: {0}")]
    Decode(String),
}

/// The two accepted webhook body shapes.
#[derive(Debug, Clone)]
pub enum WebhookPayload {
    /// v2 deliveries: a batch of `messages`, each naming an event and embedding an incident.
    Legacy(LegacyPayload),
    /// v3 deliveries: one `event` envelope with `event_type`, `resource_type` and `data`.
    Current(CurrentPayload),
}

#[derive(Debug, Clone, Deserialize)]
pub struct LegacyPayload {
    pub messages: Vec<LegacyMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LegacyMessage {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub event: String,
    #[serde(default)]
    pub incident: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CurrentPayload {
    pub event: CurrentEvent,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CurrentEvent {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub event_type: String,
    #[serde(default)]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub occurred_at: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl WebhookPayload {
    pub fn decode(body: &[u8]) -> Result<Self, NormalizeError> {
        let raw: Value = serde_json::from_slice(body)
            .map_err(|error| NormalizeError::Decode(error.to_string()))?;

        let Some(object) = raw.as_object() else {
            return Err(NormalizeError::Decode("payload is not a JSON object".to_string()));
        };

        if object.contains_key("event") {
            let payload = serde_json::from_value::<CurrentPayload>(raw)
                .map_err(|error| NormalizeError::Decode(error.to_string()))?;
            return Ok(WebhookPayload::Current(payload));
        }

        if object.contains_key("messages") {
            let payload = serde_json::from_value::<LegacyPayload>(raw)
                .map_err(|error| NormalizeError::Decode(error.to_string()))?;
            return Ok(WebhookPayload::Legacy(payload));
        }

        Err(NormalizeError::Decode(
            "payload has neither `event` nor `messages`".to_string(),
        ))
    }

    pub fn shape(&self) -> &'static str {
        match self {
            WebhookPayload::Legacy(_) => "legacy",
            WebhookPayload::Current(_) => "current",
        }
    }

    /// Number of deliverable entries before any are dropped.
    pub fn message_count(&self) -> usize {
        match self {
            WebhookPayload::Legacy(payload) => payload.messages.len(),
            WebhookPayload::Current(_) => 1,
        }
    }

    /// Converts the payload into canonical events in arrival order. Unrecognized
    /// event kinds and non-incident resources are dropped, not errors. See
    /// [`WebhookPayload::into_batch`] for how malformed messages are handled.
    pub fn into_events(self) -> Result<Vec<CanonicalEvent>, NormalizeError> {
        self.into_batch().map(|batch| batch.events)
    }

    /// Like [`WebhookPayload::into_events`], but legacy messages are handled
    /// independently: one whose incident does not decode is skipped and counted
    /// instead of failing the batch. A current-shape delivery carries a single
    /// event, so a bad incident there is still an error.
    pub fn into_batch(self) -> Result<NormalizedBatch, NormalizeError> {
        match self {
            WebhookPayload::Legacy(payload) => {
                let mut batch = NormalizedBatch {
                    events: Vec::with_capacity(payload.messages.len()),
                    malformed: 0,
                };
                for message in payload.messages {
                    let message_id = message.id.clone();
                    match message.into_event() {
                        Ok(Some(event)) => batch.events.push(event),
                        Ok(None) => {}
                        Err(error) => {
                            warn!(
                                message_id = %message_id,
                                error = %error,
                                "skipping malformed legacy webhook message"
                            );
                            batch.malformed += 1;
                        }
                    }
                }
                Ok(batch)
            }
            WebhookPayload::Current(payload) => Ok(NormalizedBatch {
                events: payload.event.into_event()?.into_iter().collect(),
                malformed: 0,
            }),
        }
    }
}

/// Events recovered from one delivery plus the number of entries skipped
/// because their incident did not decode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedBatch {
    pub events: Vec<CanonicalEvent>,
    pub malformed: usize,
}

impl LegacyMessage {
    fn into_event(self) -> Result<Option<CanonicalEvent>, NormalizeError> {
        let Some(kind) = legacy_event_kind(&self.event) else {
            info!(event = %self.event, "ignoring unhandled legacy webhook event");
            return Ok(None);
        };

        let incident = decode_incident(self.incident)?;
        Ok(Some(CanonicalEvent {
            id: self.id,
            kind,
            incident,
        }))
    }
}

impl CurrentEvent {
    fn into_event(self) -> Result<Option<CanonicalEvent>, NormalizeError> {
        if let Some(resource_type) = self.resource_type.as_deref() {
            if resource_type != INCIDENT_RESOURCE_TYPE {
                info!(resource_type, event_id = %self.id, "ignoring non-incident webhook event");
                return Ok(None);
            }
        }

        let Some(kind) = event_kind(&self.event_type) else {
            info!(event_type = %self.event_type, event_id = %self.id, "ignoring unhandled webhook event type");
            return Ok(None);
        };

        debug!(
            event_id = %self.id,
            event_type = %self.event_type,
            occurred_at = self.occurred_at.as_deref().unwrap_or_default(),
            "normalized webhook event"
        );

        let incident = decode_incident(self.data)?;
        Ok(Some(CanonicalEvent {
            id: self.id,
            kind,
            incident,
        }))
    }
}

/// Decodes a raw body into zero or more canonical events.
pub fn normalize(body: &[u8]) -> Result<Vec<CanonicalEvent>, NormalizeError> {
    WebhookPayload::decode(body)?.into_events()
}

pub fn event_kind(event_type: &str) -> Option<EventKind> {
    match event_type {
        "incident.triggered" => Some(EventKind::Triggered),
        "incident.acknowledged" => Some(EventKind::Acknowledged),
        "incident.resolved" => Some(EventKind::Resolved),
        "incident.reassigned" => Some(EventKind::Reassigned),
        "incident.status_update_published" => Some(EventKind::StatusUpdated),
        _ => None,
    }
}

/// Legacy deliveries may use either the dotted past-tense names or the older
/// imperative verbs.
pub fn legacy_event_kind(event_name: &str) -> Option<EventKind> {
    event_kind(event_name).or(match event_name {
        "incident.trigger" | "incident.unacknowledge" => Some(EventKind::Triggered),
        "incident.acknowledge" => Some(EventKind::Acknowledged),
        "incident.resolve" => Some(EventKind::Resolved),
        "incident.assign" | "incident.escalate" | "incident.delegate" => {
            Some(EventKind::Reassigned)
        }
        _ => None,
    })
}

fn decode_incident(raw: Value) -> Result<Incident, NormalizeError> {
    serde_json::from_value(raw)
        .map_err(|error| NormalizeError::Decode(format!("invalid incident: {error}")))
}
