use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod discord;
pub mod memory;

/// Discord permission bits this crate cares about. The platform's full
/// bitfield is treated as opaque beyond these.
pub mod permissions {
    pub const MANAGE_CHANNELS: u64 = 1 << 4;
    pub const VIEW_CHANNEL: u64 = 1 << 10;
    pub const SEND_MESSAGES: u64 = 1 << 11;
    pub const MANAGE_MESSAGES: u64 = 1 << 13;
    pub const ATTACH_FILES: u64 = 1 << 15;
    pub const READ_MESSAGE_HISTORY: u64 = 1 << 16;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverwriteKind {
    Role,
    Member,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionOverwrite {
    pub id: String,
    pub kind: OverwriteKind,
    pub allow: u64,
    pub deny: u64,
}

impl PermissionOverwrite {
    pub fn allow_role(id: impl Into<String>, allow: u64) -> Self {
        Self {
            id: id.into(),
            kind: OverwriteKind::Role,
            allow,
            deny: 0,
        }
    }

    pub fn allow_member(id: impl Into<String>, allow: u64) -> Self {
        Self {
            id: id.into(),
            kind: OverwriteKind::Member,
            allow,
            deny: 0,
        }
    }

    pub fn deny_role(id: impl Into<String>, deny: u64) -> Self {
        Self {
            id: id.into(),
            kind: OverwriteKind::Role,
            allow: 0,
            deny,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewChannel {
    pub name: String,
    pub parent_id: Option<String>,
    pub topic: Option<String>,
    pub overwrites: Vec<PermissionOverwrite>,
}

#[derive(Debug, Clone)]
pub struct ChannelInfo {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedFooter {
    pub text: String,
}

/// Button styles per the platform's component model.
pub mod button_style {
    pub const PRIMARY: u8 = 1;
    pub const SECONDARY: u8 = 2;
    pub const SUCCESS: u8 = 3;
    pub const DANGER: u8 = 4;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Button {
    #[serde(rename = "type")]
    pub kind: u8,
    pub style: u8,
    pub label: String,
    pub custom_id: String,
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub disabled: bool,
}

impl Button {
    pub fn new(style: u8, label: impl Into<String>, custom_id: impl Into<String>) -> Self {
        Self {
            kind: 2,
            style,
            label: label.into(),
            custom_id: custom_id.into(),
            disabled: false,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentRow {
    #[serde(rename = "type")]
    pub kind: u8,
    pub components: Vec<Button>,
}

impl ComponentRow {
    pub fn of(buttons: Vec<Button>) -> Self {
        Self {
            kind: 1,
            components: buttons,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OutboundMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub embeds: Vec<Embed>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub components: Vec<ComponentRow>,
}

impl OutboundMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn embed(embed: Embed) -> Self {
        Self {
            embeds: vec![embed],
            ..Self::default()
        }
    }

    pub fn with_components(mut self, rows: Vec<ComponentRow>) -> Self {
        self.components = rows;
        self
    }
}

#[derive(Debug, Clone)]
pub struct SentMessage {
    pub id: String,
    pub channel_id: String,
}

#[derive(Debug, Clone)]
pub struct FetchedMessage {
    pub id: String,
    pub author_id: String,
    pub author_name: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub attachment_count: usize,
}

#[derive(Debug, Clone)]
pub struct FileUpload {
    pub name: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum FabricError {
    #[error("network error: {0}")]
    Network(String),
    #[error("API error [{status}]: {message}")]
    Api { status: u16, message: String },
    #[error("rate limited")]
    RateLimited { retry_after: Option<u64> },
    #[error("missing access")]
    MissingAccess,
    #[error("not found")]
    NotFound,
    #[error("timed out")]
    Timeout,
}

/// Chat-platform channel/message/permission primitives. One
/// implementation speaks the real REST API; the in-memory one backs the
/// test suite.
#[async_trait]
pub trait ChannelFabric: Send + Sync {
    async fn create_channel(
        &self,
        workspace_id: &str,
        req: &NewChannel,
    ) -> Result<ChannelInfo, FabricError>;

    async fn fetch_channel(&self, channel_id: &str) -> Result<ChannelInfo, FabricError>;

    async fn delete_channel(&self, channel_id: &str) -> Result<(), FabricError>;

    async fn edit_overwrite(
        &self,
        channel_id: &str,
        overwrite: &PermissionOverwrite,
    ) -> Result<(), FabricError>;

    async fn remove_overwrite(&self, channel_id: &str, target_id: &str)
        -> Result<(), FabricError>;

    async fn move_to_category(
        &self,
        channel_id: &str,
        category_id: &str,
    ) -> Result<(), FabricError>;

    async fn send_message(
        &self,
        channel_id: &str,
        message: &OutboundMessage,
    ) -> Result<SentMessage, FabricError>;

    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        message: &OutboundMessage,
    ) -> Result<(), FabricError>;

    /// Newest-first page of up to `limit` messages strictly older than
    /// `before` (all messages when `before` is `None`).
    async fn fetch_messages(
        &self,
        channel_id: &str,
        limit: usize,
        before: Option<&str>,
    ) -> Result<Vec<FetchedMessage>, FabricError>;

    async fn send_message_with_file(
        &self,
        channel_id: &str,
        message: &OutboundMessage,
        file: &FileUpload,
    ) -> Result<SentMessage, FabricError>;

    async fn send_dm(
        &self,
        user_id: &str,
        message: &OutboundMessage,
        file: Option<&FileUpload>,
    ) -> Result<SentMessage, FabricError>;
}
