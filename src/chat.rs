use crate::error::RelayError;
use crate::render::{ControlKind, NotificationContent};
use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

/// Messaging operations the relay needs from the chat platform.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Posts a new message and returns its identifier.
    async fn post_message(
        &self,
        channel_id: &str,
        content: &NotificationContent,
    ) -> Result<String, RelayError>;

    /// Replaces the content of an existing message. Fails with
    /// [`RelayError::NotFound`] when the message no longer exists.
    async fn update_message(
        &self,
        message_id: &str,
        content: &NotificationContent,
    ) -> Result<(), RelayError>;

    async fn message_exists(&self, message_id: &str) -> Result<bool, RelayError>;

    async fn user_email(&self, user_id: &str) -> Result<String, RelayError>;

    /// Resolves a configured channel reference (id or name) to a channel id.
    async fn resolve_channel(&self, channel: &str) -> Result<String, RelayError>;
}

#[derive(Clone)]
pub struct MattermostChat {
    base_url: String,
    token: String,
    client: Client,
}

#[derive(Deserialize)]
struct PostResponse {
    id: String,
}

#[derive(Deserialize)]
struct UserResponse {
    #[serde(default)]
    email: String,
}

#[derive(Deserialize)]
struct ChannelResponse {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    display_name: String,
}

#[derive(Deserialize)]
struct TeamResponse {
    id: String,
    #[serde(default)]
    name: String,
}

impl MattermostChat {
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("build reqwest client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            client,
        })
    }

    fn api(&self, path: &str) -> String {
        format!("{}/api/v4{path}", self.base_url)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header("Authorization", format!("Bearer {}", self.token))
    }

    async fn get_optional<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, RelayError> {
        let response = self
            .authorized(self.client.get(self.api(path)))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        decode_success(response).await.map(Some)
    }

    /// Channel lookups answer 400 for a malformed id and 403 for a channel
    /// the bot cannot see. Both mean "not this one" while resolving.
    async fn lookup_channel(&self, path: &str) -> Result<Option<ChannelResponse>, RelayError> {
        let response = self
            .authorized(self.client.get(self.api(path)))
            .send()
            .await?;

        match response.status() {
            StatusCode::BAD_REQUEST | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
                debug!(path, status = response.status().as_u16(), "channel lookup missed");
                Ok(None)
            }
            _ => decode_success(response).await.map(Some),
        }
    }

    async fn find_channel_in_teams(&self, channel: &str) -> Result<Option<String>, RelayError> {
        let teams: Vec<TeamResponse> = self
            .get_optional("/users/me/teams")
            .await?
            .unwrap_or_default();

        for team in &teams {
            debug!(team = %team.name, channel, "searching team for channel");
            match self
                .lookup_channel(&format!("/teams/{}/channels/name/{channel}", team.id))
                .await
            {
                Ok(Some(found)) => return Ok(Some(found.id)),
                Ok(None) => {}
                Err(error) => {
                    debug!(team = %team.name, error = %error, "channel lookup by name failed");
                }
            }

            let channels: Vec<ChannelResponse> = match self
                .get_optional(&format!("/users/me/teams/{}/channels", team.id))
                .await
            {
                Ok(channels) => channels.unwrap_or_default(),
                Err(error) => {
                    debug!(team = %team.name, error = %error, "listing team channels failed");
                    continue;
                }
            };

            if let Some(found) = channels.into_iter().find(|candidate| {
                candidate.name.eq_ignore_ascii_case(channel)
                    || candidate.display_name.eq_ignore_ascii_case(channel)
            }) {
                return Ok(Some(found.id));
            }
        }

        Ok(None)
    }
}

#[async_trait]
impl ChatPlatform for MattermostChat {
    async fn post_message(
        &self,
        channel_id: &str,
        content: &NotificationContent,
    ) -> Result<String, RelayError> {
        let body = json!({
            "channel_id": channel_id,
            "message": "",
            "props": post_props(content),
        });
        let response = self
            .authorized(self.client.post(self.api("/posts")))
            .json(&body)
            .send()
            .await?;

        let created: PostResponse = decode_success(response).await?;
        Ok(created.id)
    }

    async fn update_message(
        &self,
        message_id: &str,
        content: &NotificationContent,
    ) -> Result<(), RelayError> {
        let body = json!({ "props": post_props(content) });
        let response = self
            .authorized(
                self.client
                    .put(self.api(&format!("/posts/{message_id}/patch"))),
            )
            .json(&body)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(RelayError::NotFound(format!("message {message_id}")));
        }

        let _: Value = decode_success(response).await?;
        Ok(())
    }

    async fn message_exists(&self, message_id: &str) -> Result<bool, RelayError> {
        let post: Option<Value> = self.get_optional(&format!("/posts/{message_id}")).await?;
        Ok(post.is_some())
    }

    async fn user_email(&self, user_id: &str) -> Result<String, RelayError> {
        let user: UserResponse = self
            .get_optional(&format!("/users/{user_id}"))
            .await?
            .ok_or_else(|| RelayError::NotFound(format!("user {user_id}")))?;
        Ok(user.email)
    }

    async fn resolve_channel(&self, channel: &str) -> Result<String, RelayError> {
        if let Some(found) = self.lookup_channel(&format!("/channels/{channel}")).await? {
            return Ok(found.id);
        }

        self.find_channel_in_teams(channel)
            .await?
            .ok_or_else(|| RelayError::NotFound(format!("channel {channel}")))
    }
}

/// Serializes rendered content as a message attachment in post props.
pub fn post_props(content: &NotificationContent) -> Value {
    let actions: Vec<Value> = content
        .actions
        .iter()
        .map(|action| {
            let mut rendered = json!({
                "id": action.id,
                "name": action.name,
                "type": match action.kind {
                    ControlKind::Button => "button",
                    ControlKind::Select => "select",
                },
                "integration": {
                    "url": action.url,
                    "context": action.context,
                },
            });
            if let Some(style) = &action.style {
                rendered["style"] = json!(style);
            }
            if action.kind == ControlKind::Select {
                rendered["data_source"] = json!("custom");
                rendered["options"] = json!([]);
            }
            rendered
        })
        .collect();

    json!({
        "attachments": [{
            "title": content.title,
            "text": content.text,
            "color": content.color,
            "fields": content.fields,
            "actions": actions,
        }],
        "from_webhook": "true",
    })
}

async fn decode_success<T: DeserializeOwned>(response: Response) -> Result<T, RelayError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(RelayError::Chat(format!("{status}: {body}")));
    }

    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes)
        .map_err(|error| RelayError::Decode(format!("decode chat response: {error}")))
}
