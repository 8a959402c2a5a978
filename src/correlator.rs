use crate::chat::ChatPlatform;
use crate::error::RelayError;
use crate::render::render_notification;
use crate::store::NotificationStore;
use incident_core::model::{CanonicalEvent, EventKind, Incident, NotificationRecord};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::OwnedMutexGuard;
use tracing::{info, warn};

/// Where new notifications go and how their controls call back into the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationTarget {
    pub channel_id: String,
    pub public_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorrelationOutcome {
    Created { message_id: String },
    Updated { message_id: String },
    /// The stored message had disappeared and a replacement was posted.
    Recreated { message_id: String },
}

impl CorrelationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorrelationOutcome::Created { .. } => "created",
            CorrelationOutcome::Updated { .. } => "updated",
            CorrelationOutcome::Recreated { .. } => "recreated",
        }
    }

    pub fn message_id(&self) -> &str {
        match self {
            CorrelationOutcome::Created { message_id }
            | CorrelationOutcome::Updated { message_id }
            | CorrelationOutcome::Recreated { message_id } => message_id,
        }
    }
}

type LockMap = HashMap<String, Arc<tokio::sync::Mutex<()>>>;

/// One async mutex per incident id, dropped from the map once unused.
#[derive(Debug, Clone, Default)]
pub struct IncidentLocks {
    locks: Arc<Mutex<LockMap>>,
}

pub struct IncidentGuard {
    incident_id: String,
    entry: Arc<tokio::sync::Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
    locks: IncidentLocks,
}

impl IncidentLocks {
    pub async fn lock(&self, incident_id: &str) -> IncidentGuard {
        let entry = {
            let mut map = self.map();
            map.entry(incident_id.to_string()).or_default().clone()
        };
        // Built before waiting so a cancelled waiter still prunes its entry.
        let mut guard = IncidentGuard {
            incident_id: incident_id.to_string(),
            entry,
            guard: None,
            locks: self.clone(),
        };
        let acquired = guard.entry.clone().lock_owned().await;
        guard.guard = Some(acquired);
        guard
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn map(&self) -> MutexGuard<'_, LockMap> {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for IncidentGuard {
    fn drop(&mut self) {
        self.guard.take();
        let mut map = self.locks.map();
        // Only the map and this guard still reference the entry.
        if Arc::strong_count(&self.entry) == 2 {
            map.remove(&self.incident_id);
        }
    }
}

/// Maps incident events onto exactly one chat message per incident.
#[derive(Clone)]
pub struct Correlator {
    chat: Arc<dyn ChatPlatform>,
    store: NotificationStore,
    locks: IncidentLocks,
}

impl Correlator {
    pub fn new(chat: Arc<dyn ChatPlatform>, store: NotificationStore) -> Self {
        Self {
            chat,
            store,
            locks: IncidentLocks::default(),
        }
    }

    pub fn record(&self, incident_id: &str) -> Result<Option<NotificationRecord>, RelayError> {
        self.store.load(incident_id)
    }

    pub async fn handle(
        &self,
        event: &CanonicalEvent,
        target: &NotificationTarget,
    ) -> Result<CorrelationOutcome, RelayError> {
        let incident = &event.incident;
        let _guard = self.locks.lock(&incident.id).await;

        let existing = match self.store.load(&incident.id) {
            Ok(record) => record,
            Err(error) => {
                warn!(
                    incident_id = %incident.id,
                    error = %error,
                    "failed to read notification record; creating a new notification"
                );
                None
            }
        };

        // Triggered and later events share one path: an existing record is
        // refreshed in place, a missing one is created.
        match existing {
            Some(record) => self.refresh(record, incident, target).await,
            None => {
                if event.kind != EventKind::Triggered {
                    info!(
                        incident_id = %incident.id,
                        event_kind = event.kind.as_str(),
                        "no notification for incident yet; creating one"
                    );
                }
                let message_id = self.create(incident, &target.channel_id, target).await?;
                Ok(CorrelationOutcome::Created { message_id })
            }
        }
    }

    async fn refresh(
        &self,
        mut record: NotificationRecord,
        incident: &Incident,
        target: &NotificationTarget,
    ) -> Result<CorrelationOutcome, RelayError> {
        let alive = match self.chat.message_exists(&record.message_id).await {
            Ok(alive) => alive,
            Err(error) if error.is_not_found() => false,
            Err(error) => return Err(error),
        };

        if alive {
            let content = render_notification(incident, &target.public_url);
            match self.chat.update_message(&record.message_id, &content).await {
                Ok(()) => {
                    record.incident = incident.clone();
                    self.store.save(&record)?;
                    return Ok(CorrelationOutcome::Updated {
                        message_id: record.message_id,
                    });
                }
                Err(error) if error.is_not_found() => {}
                Err(error) => return Err(error),
            }
        }

        info!(
            incident_id = %incident.id,
            message_id = %record.message_id,
            "notification message no longer exists; posting a new one"
        );
        let message_id = self.create(incident, &record.channel_id, target).await?;
        Ok(CorrelationOutcome::Recreated { message_id })
    }

    async fn create(
        &self,
        incident: &Incident,
        channel_id: &str,
        target: &NotificationTarget,
    ) -> Result<String, RelayError> {
        let content = render_notification(incident, &target.public_url);
        let message_id = self.chat.post_message(channel_id, &content).await?;

        info!(
            incident_id = %incident.id,
            message_id = %message_id,
            channel_id,
            "posted incident notification"
        );

        self.store.save(&NotificationRecord {
            incident_id: incident.id.clone(),
            message_id: message_id.clone(),
            channel_id: channel_id.to_string(),
            incident: incident.clone(),
        })?;

        Ok(message_id)
    }
}
