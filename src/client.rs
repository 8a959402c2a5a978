use crate::error::RelayError;
use anyhow::Context;
use async_trait::async_trait;
use incident_core::model::{Incident, IncidentStatus, User};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

const ACCEPT_HEADER: &str = "application/vnd.pagerduty+json;version=2";
const USERS_PAGE_SIZE: usize = 100;
const MAX_USER_PAGES: usize = 10;

/// Remote incident-management operations the relay depends on.
#[async_trait]
pub trait IncidentApi: Send + Sync {
    async fn get(&self, incident_id: &str) -> Result<Incident, RelayError>;

    /// Filters are passed through unchanged as query parameters.
    async fn list(&self, filters: &[(String, String)]) -> Result<Vec<Incident>, RelayError>;

    async fn update(
        &self,
        incident_id: &str,
        status: IncidentStatus,
        acting_user_email: &str,
        note: &str,
    ) -> Result<Incident, RelayError>;

    async fn assign(
        &self,
        incident_id: &str,
        assignee_ids: &[String],
        acting_user_email: &str,
    ) -> Result<Incident, RelayError>;

    async fn list_users(&self) -> Result<Vec<User>, RelayError>;
}

#[derive(Clone)]
pub struct PagerDutyClient {
    base_url: String,
    api_key: String,
    client: Client,
}

#[derive(Deserialize)]
struct IncidentEnvelope {
    incident: Incident,
}

#[derive(Deserialize)]
struct IncidentsEnvelope {
    #[serde(default)]
    incidents: Vec<Incident>,
}

#[derive(Deserialize)]
struct UsersPage {
    #[serde(default)]
    users: Vec<User>,
    #[serde(default)]
    more: bool,
}

impl PagerDutyClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("build reqwest client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client,
        })
    }

    fn request(&self, builder: RequestBuilder, acting_user_email: &str) -> RequestBuilder {
        let builder = builder
            .header("Accept", ACCEPT_HEADER)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Token token={}", self.api_key));

        if acting_user_email.is_empty() {
            builder
        } else {
            builder.header("From", acting_user_email)
        }
    }

    async fn put_incident(
        &self,
        incident_id: &str,
        body: Value,
        acting_user_email: &str,
    ) -> Result<Incident, RelayError> {
        let url = format!("{}/incidents/{incident_id}", self.base_url);
        let response = self
            .request(self.client.put(&url), acting_user_email)
            .json(&body)
            .send()
            .await?;

        let envelope: IncidentEnvelope = decode_success(response).await?;
        Ok(envelope.incident)
    }
}

#[async_trait]
impl IncidentApi for PagerDutyClient {
    async fn get(&self, incident_id: &str) -> Result<Incident, RelayError> {
        let url = format!("{}/incidents/{incident_id}", self.base_url);
        let response = self.request(self.client.get(&url), "").send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(RelayError::NotFound(format!("incident {incident_id}")));
        }

        let envelope: IncidentEnvelope = decode_success(response).await?;
        Ok(envelope.incident)
    }

    async fn list(&self, filters: &[(String, String)]) -> Result<Vec<Incident>, RelayError> {
        let url = format!("{}/incidents", self.base_url);
        let response = self
            .request(self.client.get(&url).query(filters), "")
            .send()
            .await?;

        let envelope: IncidentsEnvelope = decode_success(response).await?;
        Ok(envelope.incidents)
    }

    async fn update(
        &self,
        incident_id: &str,
        status: IncidentStatus,
        acting_user_email: &str,
        note: &str,
    ) -> Result<Incident, RelayError> {
        let mut body = json!({
            "incident": {
                "type": "incident_reference",
                "status": status.as_str(),
            }
        });
        if !note.is_empty() {
            body["note"] = json!({ "content": note });
        }

        self.put_incident(incident_id, body, acting_user_email).await
    }

    async fn assign(
        &self,
        incident_id: &str,
        assignee_ids: &[String],
        acting_user_email: &str,
    ) -> Result<Incident, RelayError> {
        let assignments: Vec<Value> = assignee_ids
            .iter()
            .map(|assignee_id| {
                json!({
                    "assignee": {"id": assignee_id, "type": "user_reference"}
                })
            })
            .collect();
        let body = json!({
            "incident": {
                "type": "incident_reference",
                "assignments": assignments,
            }
        });

        self.put_incident(incident_id, body, acting_user_email).await
    }

    async fn list_users(&self) -> Result<Vec<User>, RelayError> {
        let url = format!("{}/users", self.base_url);
        let mut users = Vec::new();

        for page in 0..MAX_USER_PAGES {
            let offset = page * USERS_PAGE_SIZE;
            let query = [
                ("limit", USERS_PAGE_SIZE.to_string()),
                ("offset", offset.to_string()),
            ];
            let response = self
                .request(self.client.get(&url).query(&query), "")
                .send()
                .await?;

            let body: UsersPage = decode_success(response).await?;
            let fetched = body.users.len();
            users.extend(body.users);

            if !body.more || fetched == 0 {
                break;
            }
            debug!(offset, fetched, "fetching next page of users");
        }

        Ok(users)
    }
}

async fn decode_success<T: DeserializeOwned>(response: Response) -> Result<T, RelayError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(RelayError::Remote {
            status: status.as_u16(),
            body,
        });
    }

    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes)
        .map_err(|error| RelayError::Decode(format!("decode remote response: {error}")))
}
