pub const INCIDENT_RECORD_PREFIX: &str = "incident_attachments:";

pub fn incident_record_key(incident_id: &str) -> String {
    format!("{INCIDENT_RECORD_PREFIX}{incident_id}")
}
