use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use super::{
    ChannelFabric, ChannelInfo, FabricError, FetchedMessage, FileUpload, NewChannel,
    OutboundMessage, PermissionOverwrite, SentMessage,
};

#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub id: String,
    pub author_id: String,
    pub author_name: String,
    pub content: String,
    pub components: usize,
    pub timestamp: DateTime<Utc>,
    pub attachment_count: usize,
}

#[derive(Debug, Clone)]
pub struct StoredDm {
    pub user_id: String,
    pub content: String,
    pub file: Option<FileUpload>,
}

#[derive(Default)]
struct Inner {
    channels: HashMap<String, FakeChannel>,
    deleted: HashSet<String>,
    dms: Vec<StoredDm>,
    seq: u64,
    fail_create: bool,
    fail_dm: bool,
    /// `Some(n)`: the nth subsequent `fetch_messages` call fails.
    fail_fetch_at: Option<u64>,
    fetch_calls: u64,
}

#[derive(Default)]
struct FakeChannel {
    name: String,
    parent_id: Option<String>,
    overwrites: Vec<PermissionOverwrite>,
    messages: Vec<StoredMessage>,
}

/// In-memory stand-in for the chat platform. Channels referenced only as
/// message targets (audit/log channels) spring into existence on first
/// send; explicitly deleted channels stay dead.
pub struct MemoryFabric {
    inner: Mutex<Inner>,
    epoch: DateTime<Utc>,
}

impl Default for MemoryFabric {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFabric {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            epoch: Utc::now(),
        }
    }

    pub fn fail_next_create(&self) {
        self.inner.lock().unwrap().fail_create = true;
    }

    pub fn fail_dms(&self) {
        self.inner.lock().unwrap().fail_dm = true;
    }

    pub fn fail_fetch_call(&self, nth: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_fetch_at = Some(nth);
        inner.fetch_calls = 0;
    }

    pub fn channel_exists(&self, channel_id: &str) -> bool {
        self.inner.lock().unwrap().channels.contains_key(channel_id)
    }

    pub fn channel_parent(&self, channel_id: &str) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner.channels.get(channel_id)?.parent_id.clone()
    }

    pub fn overwrites(&self, channel_id: &str) -> Vec<PermissionOverwrite> {
        let inner = self.inner.lock().unwrap();
        inner
            .channels
            .get(channel_id)
            .map(|c| c.overwrites.clone())
            .unwrap_or_default()
    }

    pub fn messages(&self, channel_id: &str) -> Vec<StoredMessage> {
        let inner = self.inner.lock().unwrap();
        inner
            .channels
            .get(channel_id)
            .map(|c| c.messages.clone())
            .unwrap_or_default()
    }

    pub fn dms(&self) -> Vec<StoredDm> {
        self.inner.lock().unwrap().dms.clone()
    }

    fn store_message(
        inner: &mut Inner,
        epoch: DateTime<Utc>,
        channel_id: &str,
        message: &OutboundMessage,
    ) -> Result<SentMessage, FabricError> {
        if inner.deleted.contains(channel_id) {
            return Err(FabricError::NotFound);
        }

        inner.seq += 1;
        let id = format!("m{}", inner.seq);
        let timestamp = epoch + Duration::seconds(inner.seq as i64);

        let channel = inner.channels.entry(channel_id.to_string()).or_default();
        channel.messages.push(StoredMessage {
            id: id.clone(),
            author_id: "bot".to_string(),
            author_name: "modbot".to_string(),
            content: message.content.clone().unwrap_or_default(),
            components: message.components.len(),
            timestamp,
            attachment_count: 0,
        });

        Ok(SentMessage {
            id,
            channel_id: channel_id.to_string(),
        })
    }
}

/// Test-only authoring hook: record a message as if a user had typed it.
impl MemoryFabric {
    pub fn user_message(&self, channel_id: &str, author_id: &str, author_name: &str, content: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.seq += 1;
        let id = format!("m{}", inner.seq);
        let timestamp = self.epoch + Duration::seconds(inner.seq as i64);
        let channel = inner.channels.entry(channel_id.to_string()).or_default();
        channel.messages.push(StoredMessage {
            id,
            author_id: author_id.to_string(),
            author_name: author_name.to_string(),
            content: content.to_string(),
            components: 0,
            timestamp,
            attachment_count: 0,
        });
    }
}

#[async_trait]
impl ChannelFabric for MemoryFabric {
    async fn create_channel(
        &self,
        _workspace_id: &str,
        req: &NewChannel,
    ) -> Result<ChannelInfo, FabricError> {
        let mut inner = self.inner.lock().unwrap();

        if inner.fail_create {
            inner.fail_create = false;
            return Err(FabricError::Api {
                status: 500,
                message: "injected create failure".to_string(),
            });
        }

        inner.seq += 1;
        let id = format!("c{}", inner.seq);
        inner.channels.insert(
            id.clone(),
            FakeChannel {
                name: req.name.clone(),
                parent_id: req.parent_id.clone(),
                overwrites: req.overwrites.clone(),
                messages: Vec::new(),
            },
        );

        Ok(ChannelInfo {
            id,
            name: req.name.clone(),
            parent_id: req.parent_id.clone(),
        })
    }

    async fn fetch_channel(&self, channel_id: &str) -> Result<ChannelInfo, FabricError> {
        let inner = self.inner.lock().unwrap();
        let channel = inner.channels.get(channel_id).ok_or(FabricError::NotFound)?;
        Ok(ChannelInfo {
            id: channel_id.to_string(),
            name: channel.name.clone(),
            parent_id: channel.parent_id.clone(),
        })
    }

    async fn delete_channel(&self, channel_id: &str) -> Result<(), FabricError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.channels.remove(channel_id).is_none() {
            return Err(FabricError::NotFound);
        }
        inner.deleted.insert(channel_id.to_string());
        Ok(())
    }

    async fn edit_overwrite(
        &self,
        channel_id: &str,
        overwrite: &PermissionOverwrite,
    ) -> Result<(), FabricError> {
        let mut inner = self.inner.lock().unwrap();
        let channel = inner
            .channels
            .get_mut(channel_id)
            .ok_or(FabricError::NotFound)?;
        channel.overwrites.retain(|ow| ow.id != overwrite.id);
        channel.overwrites.push(overwrite.clone());
        Ok(())
    }

    async fn remove_overwrite(
        &self,
        channel_id: &str,
        target_id: &str,
    ) -> Result<(), FabricError> {
        let mut inner = self.inner.lock().unwrap();
        let channel = inner
            .channels
            .get_mut(channel_id)
            .ok_or(FabricError::NotFound)?;
        channel.overwrites.retain(|ow| ow.id != target_id);
        Ok(())
    }

    async fn move_to_category(
        &self,
        channel_id: &str,
        category_id: &str,
    ) -> Result<(), FabricError> {
        let mut inner = self.inner.lock().unwrap();
        let channel = inner
            .channels
            .get_mut(channel_id)
            .ok_or(FabricError::NotFound)?;
        channel.parent_id = Some(category_id.to_string());
        Ok(())
    }

    async fn send_message(
        &self,
        channel_id: &str,
        message: &OutboundMessage,
    ) -> Result<SentMessage, FabricError> {
        let mut inner = self.inner.lock().unwrap();
        Self::store_message(&mut inner, self.epoch, channel_id, message)
    }

    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        message: &OutboundMessage,
    ) -> Result<(), FabricError> {
        let mut inner = self.inner.lock().unwrap();
        let channel = inner
            .channels
            .get_mut(channel_id)
            .ok_or(FabricError::NotFound)?;
        let stored = channel
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or(FabricError::NotFound)?;
        stored.content = message.content.clone().unwrap_or_default();
        stored.components = message.components.len();
        Ok(())
    }

    async fn fetch_messages(
        &self,
        channel_id: &str,
        limit: usize,
        before: Option<&str>,
    ) -> Result<Vec<FetchedMessage>, FabricError> {
        let mut inner = self.inner.lock().unwrap();

        inner.fetch_calls += 1;
        if inner.fail_fetch_at == Some(inner.fetch_calls) {
            return Err(FabricError::Network("injected fetch failure".to_string()));
        }

        let channel = inner.channels.get(channel_id).ok_or(FabricError::NotFound)?;

        // Messages are stored oldest-first; serve newest-first pages.
        let upper = match before {
            Some(before) => channel
                .messages
                .iter()
                .position(|m| m.id == before)
                .unwrap_or(0),
            None => channel.messages.len(),
        };

        let lower = upper.saturating_sub(limit);
        let mut page: Vec<FetchedMessage> = channel.messages[lower..upper]
            .iter()
            .map(|m| FetchedMessage {
                id: m.id.clone(),
                author_id: m.author_id.clone(),
                author_name: m.author_name.clone(),
                content: m.content.clone(),
                timestamp: m.timestamp,
                attachment_count: m.attachment_count,
            })
            .collect();
        page.reverse();
        Ok(page)
    }

    async fn send_message_with_file(
        &self,
        channel_id: &str,
        message: &OutboundMessage,
        _file: &FileUpload,
    ) -> Result<SentMessage, FabricError> {
        let mut inner = self.inner.lock().unwrap();
        let sent = Self::store_message(&mut inner, self.epoch, channel_id, message)?;
        if let Some(channel) = inner.channels.get_mut(channel_id) {
            if let Some(last) = channel.messages.last_mut() {
                last.attachment_count = 1;
            }
        }
        Ok(sent)
    }

    async fn send_dm(
        &self,
        user_id: &str,
        message: &OutboundMessage,
        file: Option<&FileUpload>,
    ) -> Result<SentMessage, FabricError> {
        let mut inner = self.inner.lock().unwrap();

        if inner.fail_dm {
            return Err(FabricError::Api {
                status: 403,
                message: "cannot send messages to this user".to_string(),
            });
        }

        inner.seq += 1;
        let id = format!("dm{}", inner.seq);
        inner.dms.push(StoredDm {
            user_id: user_id.to_string(),
            content: message.content.clone().unwrap_or_default(),
            file: file.cloned(),
        });

        Ok(SentMessage {
            id,
            channel_id: format!("dm-{user_id}"),
        })
    }
}
