use crate::client::IncidentApi;
use crate::correlator::{Correlator, NotificationTarget};
use crate::error::RelayError;
use incident_core::model::{
    ActionKind, ActionRequest, CanonicalEvent, EventKind, Incident, IncidentStatus, User,
};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The remote incident was mutated; carries the refreshed snapshot.
    Updated(Incident),
    /// Candidate assignees for a reassign selector; nothing was mutated.
    Candidates(Vec<User>),
}

/// Executes chat-initiated actions against the incident service and feeds
/// the result back through the correlator.
#[derive(Clone)]
pub struct ActionDispatcher {
    client: Arc<dyn IncidentApi>,
    correlator: Correlator,
}

impl ActionDispatcher {
    pub fn new(client: Arc<dyn IncidentApi>, correlator: Correlator) -> Self {
        Self { client, correlator }
    }

    /// `acting_email` must already be resolved from the chat user; an empty
    /// value sends the request without attribution.
    pub async fn dispatch(
        &self,
        request: &ActionRequest,
        acting_email: &str,
        target: &NotificationTarget,
    ) -> Result<ActionOutcome, RelayError> {
        let action: ActionKind = request.action.parse().map_err(|_| {
            RelayError::InvalidAction(format!("unsupported action {:?}", request.action))
        })?;

        let incident_id = request.incident_id.trim();
        if incident_id.is_empty() {
            return Err(RelayError::InvalidAction("missing incident id".to_string()));
        }

        let (incident, kind) = match action {
            ActionKind::Acknowledge => (
                self.client
                    .update(incident_id, IncidentStatus::Acknowledged, acting_email, "")
                    .await?,
                EventKind::StatusUpdated,
            ),
            ActionKind::Resolve => (
                self.client
                    .update(incident_id, IncidentStatus::Resolved, acting_email, "")
                    .await?,
                EventKind::StatusUpdated,
            ),
            ActionKind::Reassign => {
                if request.wants_candidate_list() {
                    let users = self.client.list_users().await?;
                    return Ok(ActionOutcome::Candidates(users));
                }

                let assignee = request
                    .assignee_id
                    .as_deref()
                    .map(str::trim)
                    .filter(|assignee| !assignee.is_empty())
                    .ok_or_else(|| {
                        RelayError::InvalidAction("reassign requires an assignee".to_string())
                    })?;

                (
                    self.client
                        .assign(incident_id, &[assignee.to_string()], acting_email)
                        .await?,
                    EventKind::Reassigned,
                )
            }
        };

        info!(
            incident_id,
            action = action.as_str(),
            status = incident.status.as_str(),
            "applied incident action"
        );

        self.refresh(action, kind, &incident, target).await;
        Ok(ActionOutcome::Updated(incident))
    }

    // The remote mutation already happened; a failed refresh is left for the
    // next webhook delivery to repair.
    async fn refresh(
        &self,
        action: ActionKind,
        kind: EventKind,
        incident: &Incident,
        target: &NotificationTarget,
    ) {
        let event = CanonicalEvent {
            id: format!("action:{}:{}", action.as_str(), incident.id),
            kind,
            incident: incident.clone(),
        };

        if let Err(error) = self.correlator.handle(&event, target).await {
            warn!(
                incident_id = %incident.id,
                action = action.as_str(),
                error = %error,
                "incident updated but notification refresh failed"
            );
        }
    }
}
