use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    ChannelFabric, ChannelInfo, FabricError, FetchedMessage, FileUpload, NewChannel,
    OutboundMessage, OverwriteKind, PermissionOverwrite, SentMessage,
};

const GUILD_TEXT: u8 = 0;

/// REST client for the Discord v10 API. Only the endpoints the ticket
/// subsystem needs are implemented.
pub struct DiscordFabric {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl DiscordFabric {
    pub fn new(token: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            token: token.into(),
        }
    }

    fn auth(&self) -> String {
        format!("Bot {}", self.token)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, FabricError> {
        let status = response.status();

        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok());
            return Err(FabricError::RateLimited { retry_after });
        }
        if status.as_u16() == 403 {
            return Err(FabricError::MissingAccess);
        }
        if status.as_u16() == 404 {
            return Err(FabricError::NotFound);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(FabricError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: String) -> Result<T, FabricError> {
        let response = self
            .client
            .get(url)
            .header("Authorization", self.auth())
            .send()
            .await
            .map_err(|e| FabricError::Network(e.to_string()))?;

        Self::check(response)
            .await?
            .json::<T>()
            .await
            .map_err(|e| FabricError::Network(e.to_string()))
    }

    /// The bot's own user, fetched once at startup so channel overwrites
    /// can grant the service account full control.
    pub async fn current_user(&self) -> Result<String, FabricError> {
        let user: WireUser = self.get_json(format!("{}/users/@me", self.base_url)).await?;
        Ok(user.id)
    }
}

#[async_trait]
impl ChannelFabric for DiscordFabric {
    async fn create_channel(
        &self,
        workspace_id: &str,
        req: &NewChannel,
    ) -> Result<ChannelInfo, FabricError> {
        let body = WireCreateChannel {
            name: &req.name,
            kind: GUILD_TEXT,
            parent_id: req.parent_id.as_deref(),
            topic: req.topic.as_deref(),
            permission_overwrites: req.overwrites.iter().map(WireOverwrite::from).collect(),
        };

        let response = self
            .client
            .post(format!("{}/guilds/{}/channels", self.base_url, workspace_id))
            .header("Authorization", self.auth())
            .json(&body)
            .send()
            .await
            .map_err(|e| FabricError::Network(e.to_string()))?;

        let channel: WireChannel = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| FabricError::Network(e.to_string()))?;

        Ok(channel.into())
    }

    async fn fetch_channel(&self, channel_id: &str) -> Result<ChannelInfo, FabricError> {
        let channel: WireChannel = self
            .get_json(format!("{}/channels/{}", self.base_url, channel_id))
            .await?;
        Ok(channel.into())
    }

    async fn delete_channel(&self, channel_id: &str) -> Result<(), FabricError> {
        let response = self
            .client
            .delete(format!("{}/channels/{}", self.base_url, channel_id))
            .header("Authorization", self.auth())
            .send()
            .await
            .map_err(|e| FabricError::Network(e.to_string()))?;

        Self::check(response).await.map(|_| ())
    }

    async fn edit_overwrite(
        &self,
        channel_id: &str,
        overwrite: &PermissionOverwrite,
    ) -> Result<(), FabricError> {
        let body = WireOverwrite::from(overwrite);
        let response = self
            .client
            .put(format!(
                "{}/channels/{}/permissions/{}",
                self.base_url, channel_id, overwrite.id
            ))
            .header("Authorization", self.auth())
            .json(&body)
            .send()
            .await
            .map_err(|e| FabricError::Network(e.to_string()))?;

        Self::check(response).await.map(|_| ())
    }

    async fn remove_overwrite(
        &self,
        channel_id: &str,
        target_id: &str,
    ) -> Result<(), FabricError> {
        let response = self
            .client
            .delete(format!(
                "{}/channels/{}/permissions/{}",
                self.base_url, channel_id, target_id
            ))
            .header("Authorization", self.auth())
            .send()
            .await
            .map_err(|e| FabricError::Network(e.to_string()))?;

        Self::check(response).await.map(|_| ())
    }

    async fn move_to_category(
        &self,
        channel_id: &str,
        category_id: &str,
    ) -> Result<(), FabricError> {
        let response = self
            .client
            .patch(format!("{}/channels/{}", self.base_url, channel_id))
            .header("Authorization", self.auth())
            .json(&serde_json::json!({ "parent_id": category_id }))
            .send()
            .await
            .map_err(|e| FabricError::Network(e.to_string()))?;

        Self::check(response).await.map(|_| ())
    }

    async fn send_message(
        &self,
        channel_id: &str,
        message: &OutboundMessage,
    ) -> Result<SentMessage, FabricError> {
        let response = self
            .client
            .post(format!("{}/channels/{}/messages", self.base_url, channel_id))
            .header("Authorization", self.auth())
            .json(message)
            .send()
            .await
            .map_err(|e| FabricError::Network(e.to_string()))?;

        let sent: WireMessage = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| FabricError::Network(e.to_string()))?;

        Ok(SentMessage {
            id: sent.id,
            channel_id: sent.channel_id,
        })
    }

    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        message: &OutboundMessage,
    ) -> Result<(), FabricError> {
        let response = self
            .client
            .patch(format!(
                "{}/channels/{}/messages/{}",
                self.base_url, channel_id, message_id
            ))
            .header("Authorization", self.auth())
            .json(message)
            .send()
            .await
            .map_err(|e| FabricError::Network(e.to_string()))?;

        Self::check(response).await.map(|_| ())
    }

    async fn fetch_messages(
        &self,
        channel_id: &str,
        limit: usize,
        before: Option<&str>,
    ) -> Result<Vec<FetchedMessage>, FabricError> {
        let mut url = format!(
            "{}/channels/{}/messages?limit={}",
            self.base_url, channel_id, limit
        );
        if let Some(before) = before {
            url.push_str(&format!("&before={before}"));
        }

        let messages: Vec<WireMessage> = self.get_json(url).await?;
        Ok(messages.into_iter().map(FetchedMessage::from).collect())
    }

    async fn send_message_with_file(
        &self,
        channel_id: &str,
        message: &OutboundMessage,
        file: &FileUpload,
    ) -> Result<SentMessage, FabricError> {
        let payload =
            serde_json::to_string(message).map_err(|e| FabricError::Network(e.to_string()))?;

        let form = reqwest::multipart::Form::new()
            .text("payload_json", payload)
            .part(
                "files[0]",
                reqwest::multipart::Part::bytes(file.data.clone())
                    .file_name(file.name.clone())
                    .mime_str("text/plain")
                    .map_err(|e| FabricError::Network(e.to_string()))?,
            );

        let response = self
            .client
            .post(format!("{}/channels/{}/messages", self.base_url, channel_id))
            .header("Authorization", self.auth())
            .multipart(form)
            .send()
            .await
            .map_err(|e| FabricError::Network(e.to_string()))?;

        let sent: WireMessage = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| FabricError::Network(e.to_string()))?;

        Ok(SentMessage {
            id: sent.id,
            channel_id: sent.channel_id,
        })
    }

    async fn send_dm(
        &self,
        user_id: &str,
        message: &OutboundMessage,
        file: Option<&FileUpload>,
    ) -> Result<SentMessage, FabricError> {
        let response = self
            .client
            .post(format!("{}/users/@me/channels", self.base_url))
            .header("Authorization", self.auth())
            .json(&serde_json::json!({ "recipient_id": user_id }))
            .send()
            .await
            .map_err(|e| FabricError::Network(e.to_string()))?;

        let dm: WireChannel = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| FabricError::Network(e.to_string()))?;

        match file {
            Some(file) => self.send_message_with_file(&dm.id, message, file).await,
            None => self.send_message(&dm.id, message).await,
        }
    }
}

#[derive(Serialize)]
struct WireCreateChannel<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    kind: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    topic: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    permission_overwrites: Vec<WireOverwrite>,
}

// Discord wants allow/deny as decimal strings and role/member as 0/1.
#[derive(Serialize)]
struct WireOverwrite {
    id: String,
    #[serde(rename = "type")]
    kind: u8,
    allow: String,
    deny: String,
}

impl From<&PermissionOverwrite> for WireOverwrite {
    fn from(ow: &PermissionOverwrite) -> Self {
        Self {
            id: ow.id.clone(),
            kind: match ow.kind {
                OverwriteKind::Role => 0,
                OverwriteKind::Member => 1,
            },
            allow: ow.allow.to_string(),
            deny: ow.deny.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct WireChannel {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    parent_id: Option<String>,
}

impl From<WireChannel> for ChannelInfo {
    fn from(ch: WireChannel) -> Self {
        Self {
            id: ch.id,
            name: ch.name.unwrap_or_default(),
            parent_id: ch.parent_id,
        }
    }
}

#[derive(Deserialize)]
struct WireUser {
    id: String,
    #[serde(default)]
    username: String,
}

#[derive(Deserialize)]
struct WireMessage {
    id: String,
    channel_id: String,
    #[serde(default)]
    content: String,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    author: Option<WireUser>,
    #[serde(default)]
    attachments: Vec<serde_json::Value>,
}

impl From<WireMessage> for FetchedMessage {
    fn from(msg: WireMessage) -> Self {
        let (author_id, author_name) = msg
            .author
            .map(|a| (a.id, a.username))
            .unwrap_or_else(|| (String::new(), "unknown".to_string()));

        Self {
            id: msg.id,
            author_id,
            author_name,
            content: msg.content,
            timestamp: msg.timestamp,
            attachment_count: msg.attachments.len(),
        }
    }
}
