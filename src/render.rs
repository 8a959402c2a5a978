use incident_core::model::{ActionKind, Incident, IncidentStatus, Urgency};
use serde::Serialize;
use serde_json::{Value, json};

pub const COLOR_TRIGGERED_HIGH: &str = "#FF0000";
pub const COLOR_TRIGGERED_LOW: &str = "#FFA500";
pub const COLOR_ACKNOWLEDGED: &str = "#FFFF00";
pub const COLOR_RESOLVED: &str = "#008000";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationContent {
    pub title: String,
    pub text: String,
    pub color: String,
    pub fields: Vec<NotificationField>,
    pub actions: Vec<NotificationAction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationField {
    pub title: String,
    pub value: String,
    pub short: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlKind {
    Button,
    Select,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationAction {
    pub id: String,
    pub name: String,
    pub kind: ControlKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    pub url: String,
    pub context: Value,
}

impl NotificationContent {
    pub fn action(&self, action: ActionKind) -> Option<&NotificationAction> {
        self.actions
            .iter()
            .find(|candidate| candidate.id == action.as_str())
    }

    pub fn has_action(&self, action: ActionKind) -> bool {
        self.action(action).is_some()
    }
}

pub fn action_url(public_url: &str, incident_id: &str, action: ActionKind) -> String {
    format!(
        "{public_url}/api/v1/incidents/{incident_id}/{}",
        action.as_str()
    )
}

pub fn status_color(status: IncidentStatus, urgency: Urgency) -> &'static str {
    match (status, urgency) {
        (IncidentStatus::Triggered, Urgency::High) => COLOR_TRIGGERED_HIGH,
        (IncidentStatus::Triggered, Urgency::Low) => COLOR_TRIGGERED_LOW,
        (IncidentStatus::Acknowledged, _) => COLOR_ACKNOWLEDGED,
        (IncidentStatus::Resolved, _) => COLOR_RESOLVED,
    }
}

pub fn render_notification(incident: &Incident, public_url: &str) -> NotificationContent {
    let mut fields = vec![
        short_field("Service", incident.service.name.clone()),
        short_field("Urgency", incident.urgency.title().to_string()),
    ];

    if !incident.is_unassigned() {
        fields.push(short_field("Assigned To", incident.assignee_names().join(", ")));
    }

    if let Some(created_at) = incident.created_at {
        fields.push(short_field("Created", created_at.to_rfc3339()));
    }

    fields.push(NotificationField {
        title: "Link".to_string(),
        value: format!("[View in PagerDuty]({})", incident.html_url),
        short: false,
    });

    NotificationContent {
        title: format!("[#{}] {}", incident.incident_number, incident.title),
        text: incident.description.clone(),
        color: status_color(incident.status, incident.urgency).to_string(),
        fields,
        actions: incident_actions(incident, public_url),
    }
}

fn incident_actions(incident: &Incident, public_url: &str) -> Vec<NotificationAction> {
    let mut actions = Vec::with_capacity(3);

    if incident.status == IncidentStatus::Triggered {
        actions.push(control(
            incident,
            public_url,
            ActionKind::Acknowledge,
            "Acknowledge",
            ControlKind::Button,
            Some("primary"),
        ));
    }

    if incident.status != IncidentStatus::Resolved {
        actions.push(control(
            incident,
            public_url,
            ActionKind::Resolve,
            "Resolve",
            ControlKind::Button,
            Some("success"),
        ));
    }

    actions.push(control(
        incident,
        public_url,
        ActionKind::Reassign,
        "Reassign",
        ControlKind::Select,
        None,
    ));

    actions
}

fn control(
    incident: &Incident,
    public_url: &str,
    action: ActionKind,
    name: &str,
    kind: ControlKind,
    style: Option<&str>,
) -> NotificationAction {
    NotificationAction {
        id: action.as_str().to_string(),
        name: name.to_string(),
        kind,
        style: style.map(ToString::to_string),
        url: action_url(public_url, &incident.id, action),
        context: json!({
            "incident_id": incident.id,
            "action": action.as_str(),
        }),
    }
}

fn short_field(title: &str, value: String) -> NotificationField {
    NotificationField {
        title: title.to_string(),
        value,
        short: true,
    }
}
