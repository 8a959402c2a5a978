//! In-memory collaborators for unit tests.

use crate::chat::ChatPlatform;
use crate::client::IncidentApi;
use crate::error::RelayError;
use crate::render::NotificationContent;
use crate::store::KvStore;
use async_trait::async_trait;
use incident_core::model::{Assignment, Incident, IncidentStatus, User};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub(crate) fn incident(id: &str, status: &str) -> Incident {
    serde_json::from_value(json!({
        "id": id,
        "incident_number": 42,
        "title": "Checkout errors",
        "status": status,
        "urgency": "high",
        "service": {"id": "S1", "name": "Checkout"},
        "html_url": format!("https://acme.pagerduty.com/incidents/{id}")
    }))
    .expect("incident fixture")
}

#[derive(Default)]
struct ChatState {
    messages: HashMap<String, NotificationContent>,
    posted: Vec<(String, NotificationContent)>,
    updates: usize,
    next_id: usize,
}

#[derive(Clone, Default)]
pub(crate) struct RecordingChat {
    state: Arc<Mutex<ChatState>>,
    updates_not_found: Arc<AtomicBool>,
}

impl RecordingChat {
    pub(crate) fn posted_count(&self) -> usize {
        self.state.lock().expect("chat state").posted.len()
    }

    pub(crate) fn update_count(&self) -> usize {
        self.state.lock().expect("chat state").updates
    }

    pub(crate) fn last_posted(&self) -> Option<NotificationContent> {
        let state = self.state.lock().expect("chat state");
        state.posted.last().map(|(_, content)| content.clone())
    }

    pub(crate) fn message(&self, message_id: &str) -> Option<NotificationContent> {
        self.state
            .lock()
            .expect("chat state")
            .messages
            .get(message_id)
            .cloned()
    }

    pub(crate) fn delete(&self, message_id: &str) {
        self.state
            .lock()
            .expect("chat state")
            .messages
            .remove(message_id);
    }

    pub(crate) fn fail_updates_with_not_found(&self) {
        self.updates_not_found.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChatPlatform for RecordingChat {
    async fn post_message(
        &self,
        channel_id: &str,
        content: &NotificationContent,
    ) -> Result<String, RelayError> {
        let mut state = self.state.lock().expect("chat state");
        state.next_id += 1;
        let message_id = format!("post-{}", state.next_id);
        state.messages.insert(message_id.clone(), content.clone());
        state.posted.push((channel_id.to_string(), content.clone()));
        Ok(message_id)
    }

    async fn update_message(
        &self,
        message_id: &str,
        content: &NotificationContent,
    ) -> Result<(), RelayError> {
        if self.updates_not_found.load(Ordering::SeqCst) {
            return Err(RelayError::NotFound(format!("message {message_id}")));
        }
        let mut state = self.state.lock().expect("chat state");
        match state.messages.get_mut(message_id) {
            Some(existing) => {
                *existing = content.clone();
                state.updates += 1;
                Ok(())
            }
            None => Err(RelayError::NotFound(format!("message {message_id}"))),
        }
    }

    async fn message_exists(&self, message_id: &str) -> Result<bool, RelayError> {
        Ok(self
            .state
            .lock()
            .expect("chat state")
            .messages
            .contains_key(message_id))
    }

    async fn user_email(&self, user_id: &str) -> Result<String, RelayError> {
        Ok(format!("{user_id}@example.com"))
    }

    async fn resolve_channel(&self, channel: &str) -> Result<String, RelayError> {
        Ok(channel.to_string())
    }
}

pub(crate) struct FailingKvStore;

impl KvStore for FailingKvStore {
    fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, RelayError> {
        Err(RelayError::Store("disk unavailable".to_string()))
    }

    fn set(&self, _key: &str, _value: &[u8]) -> Result<(), RelayError> {
        Err(RelayError::Store("disk unavailable".to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ApiCall {
    Get(String),
    List(Vec<(String, String)>),
    Update {
        incident_id: String,
        status: IncidentStatus,
        email: String,
        note: String,
    },
    Assign {
        incident_id: String,
        assignee_ids: Vec<String>,
        email: String,
    },
    ListUsers,
}

#[derive(Clone, Default)]
pub(crate) struct FakeIncidentApi {
    calls: Arc<Mutex<Vec<ApiCall>>>,
    users: Vec<User>,
    remote_failure: Option<u16>,
    total: Arc<AtomicUsize>,
}

impl FakeIncidentApi {
    pub(crate) fn with_users(users: Vec<User>) -> Self {
        Self {
            users,
            ..Self::default()
        }
    }

    pub(crate) fn failing(status: u16) -> Self {
        Self {
            remote_failure: Some(status),
            ..Self::default()
        }
    }

    pub(crate) fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().expect("calls").clone()
    }

    pub(crate) fn call_count(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    fn record(&self, call: ApiCall) -> Result<(), RelayError> {
        self.total.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().expect("calls").push(call);
        match self.remote_failure {
            Some(status) => Err(RelayError::Remote {
                status,
                body: "upstream refused".to_string(),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl IncidentApi for FakeIncidentApi {
    async fn get(&self, incident_id: &str) -> Result<Incident, RelayError> {
        self.record(ApiCall::Get(incident_id.to_string()))?;
        Ok(incident(incident_id, "triggered"))
    }

    async fn list(&self, filters: &[(String, String)]) -> Result<Vec<Incident>, RelayError> {
        self.record(ApiCall::List(filters.to_vec()))?;
        Ok(vec![incident("INC1", "triggered"), incident("INC2", "acknowledged")])
    }

    async fn update(
        &self,
        incident_id: &str,
        status: IncidentStatus,
        acting_user_email: &str,
        note: &str,
    ) -> Result<Incident, RelayError> {
        self.record(ApiCall::Update {
            incident_id: incident_id.to_string(),
            status,
            email: acting_user_email.to_string(),
            note: note.to_string(),
        })?;
        Ok(incident(incident_id, status.as_str()))
    }

    async fn assign(
        &self,
        incident_id: &str,
        assignee_ids: &[String],
        acting_user_email: &str,
    ) -> Result<Incident, RelayError> {
        self.record(ApiCall::Assign {
            incident_id: incident_id.to_string(),
            assignee_ids: assignee_ids.to_vec(),
            email: acting_user_email.to_string(),
        })?;
        let mut updated = incident(incident_id, "triggered");
        updated.assignments = assignee_ids
            .iter()
            .map(|id| Assignment {
                assignee: User {
                    id: id.clone(),
                    name: format!("User {id}"),
                    email: None,
                },
                at: None,
            })
            .collect();
        Ok(updated)
    }

    async fn list_users(&self) -> Result<Vec<User>, RelayError> {
        self.record(ApiCall::ListUsers)?;
        Ok(self.users.clone())
    }
}
