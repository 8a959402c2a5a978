use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Assignee value that asks for the candidate user list instead of assigning.
pub const FETCH_USERS_SENTINEL: &str = "fetch_users";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Triggered,
    Acknowledged,
    Resolved,
}

impl IncidentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            IncidentStatus::Triggered => "triggered",
            IncidentStatus::Acknowledged => "acknowledged",
            IncidentStatus::Resolved => "resolved",
        }
    }
}

impl fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IncidentStatus {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "triggered" => Ok(IncidentStatus::Triggered),
            "acknowledged" => Ok(IncidentStatus::Acknowledged),
            "resolved" => Ok(IncidentStatus::Resolved),
            _ => Err("unsupported incident status"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    #[default]
    High,
    Low,
}

impl Urgency {
    pub fn as_str(self) -> &'static str {
        match self {
            Urgency::High => "high",
            Urgency::Low => "low",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Urgency::High => "High",
            Urgency::Low => "Low",
        }
    }
}

impl FromStr for Urgency {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Urgency::High),
            "low" => Ok(Urgency::Low),
            _ => Err("unsupported urgency"),
        }
    }
}

// REST objects carry both `name` and `summary`; webhook references carry
// only `summary`. The wire structs below keep them apart and prefer `name`.

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "UserWire")]
pub struct User {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Deserialize)]
struct UserWire {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

impl From<UserWire> for User {
    fn from(wire: UserWire) -> Self {
        Self {
            id: wire.id,
            name: first_present(wire.name, wire.summary),
            email: wire.email,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ServiceWire")]
pub struct Service {
    pub id: String,
    pub name: String,
}

#[derive(Deserialize)]
struct ServiceWire {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    summary: Option<String>,
}

impl From<ServiceWire> for Service {
    fn from(wire: ServiceWire) -> Self {
        Self {
            id: wire.id,
            name: first_present(wire.name, wire.summary),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub assignee: User,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "EscalationPolicyWire")]
pub struct EscalationPolicy {
    pub id: String,
    pub name: String,
    pub html_url: String,
}

#[derive(Deserialize)]
struct EscalationPolicyWire {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    html_url: String,
}

impl From<EscalationPolicyWire> for EscalationPolicy {
    fn from(wire: EscalationPolicyWire) -> Self {
        Self {
            id: wire.id,
            name: first_present(wire.name, wire.summary),
            html_url: wire.html_url,
        }
    }
}

/// Non-empty `preferred`, else non-empty `fallback`, else empty.
fn first_present(preferred: Option<String>, fallback: Option<String>) -> String {
    preferred
        .filter(|value| !value.is_empty())
        .or(fallback)
        .unwrap_or_default()
}

/// Snapshot of a remote incident as returned by the REST API or embedded in a
/// webhook. Deserialization accepts both the REST shape (`incident_number`,
/// `assignments`) and the v3 webhook shape (`number`, `assignees`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "IncidentWire")]
pub struct Incident {
    pub id: String,
    pub incident_number: u64,
    pub title: String,
    pub description: String,
    pub status: IncidentStatus,
    pub urgency: Urgency,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    pub service: Service,
    pub assignments: Vec<Assignment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_status_change_by: Option<User>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_status_change_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalation_policy: Option<EscalationPolicy>,
    pub html_url: String,
}

impl Incident {
    pub fn is_unassigned(&self) -> bool {
        self.assignments.is_empty()
    }

    pub fn assignee_names(&self) -> Vec<&str> {
        self.assignments
            .iter()
            .map(|assignment| assignment.assignee.name.as_str())
            .collect()
    }
}

#[derive(Deserialize)]
struct IncidentWire {
    id: String,
    #[serde(default, alias = "number")]
    incident_number: u64,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    description: Option<String>,
    status: IncidentStatus,
    #[serde(default)]
    urgency: Option<Urgency>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    service: Option<Service>,
    #[serde(default)]
    assignments: Vec<Assignment>,
    #[serde(default)]
    assignees: Vec<User>,
    #[serde(default)]
    last_status_change_by: Option<User>,
    #[serde(default)]
    last_status_change_at: Option<DateTime<Utc>>,
    #[serde(default)]
    escalation_policy: Option<EscalationPolicy>,
    #[serde(default)]
    html_url: String,
}

impl From<IncidentWire> for Incident {
    fn from(wire: IncidentWire) -> Self {
        let urgency = wire.urgency.unwrap_or_else(|| {
            debug!(incident_id = %wire.id, "incident has no urgency; treating as high");
            Urgency::default()
        });
        let assignments = if wire.assignments.is_empty() {
            wire.assignees
                .into_iter()
                .map(|assignee| Assignment { assignee, at: None })
                .collect()
        } else {
            wire.assignments
        };

        Self {
            id: wire.id,
            incident_number: wire.incident_number,
            title: first_present(wire.title, wire.summary),
            description: wire.description.unwrap_or_default(),
            status: wire.status,
            urgency,
            created_at: wire.created_at,
            service: wire.service.unwrap_or_default(),
            assignments,
            last_status_change_by: wire.last_status_change_by,
            last_status_change_at: wire.last_status_change_at,
            escalation_policy: wire.escalation_policy,
            html_url: wire.html_url,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Triggered,
    Acknowledged,
    Resolved,
    Reassigned,
    StatusUpdated,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Triggered => "triggered",
            EventKind::Acknowledged => "acknowledged",
            EventKind::Resolved => "resolved",
            EventKind::Reassigned => "reassigned",
            EventKind::StatusUpdated => "status_updated",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalEvent {
    pub id: String,
    pub kind: EventKind,
    pub incident: Incident,
}

/// Correlation anchor between one incident and the chat message posted for it.
///
/// Field names on the wire stay compatible with records written by earlier
/// deployments (`id`, `post_id`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    #[serde(rename = "id")]
    pub incident_id: String,
    #[serde(rename = "post_id")]
    pub message_id: String,
    pub channel_id: String,
    pub incident: Incident,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Acknowledge,
    Resolve,
    Reassign,
}

impl ActionKind {
    pub const ALL: [ActionKind; 3] = [
        ActionKind::Acknowledge,
        ActionKind::Resolve,
        ActionKind::Reassign,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Acknowledge => "acknowledge",
            ActionKind::Resolve => "resolve",
            ActionKind::Reassign => "reassign",
        }
    }
}

impl FromStr for ActionKind {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "acknowledge" => Ok(ActionKind::Acknowledge),
            "resolve" => Ok(ActionKind::Resolve),
            "reassign" => Ok(ActionKind::Reassign),
            _ => Err("unsupported action"),
        }
    }
}

/// Body posted by the chat platform when a user clicks an incident control.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRequest {
    #[serde(default)]
    pub incident_id: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<String>,
}

impl ActionRequest {
    pub fn wants_candidate_list(&self) -> bool {
        self.assignee_id.as_deref() == Some(FETCH_USERS_SENTINEL)
    }
}
