use log::warn;
use std::sync::Arc;

use crate::fabric::{ChannelFabric, FileUpload, OutboundMessage};

/// Best-effort private message delivery. A user may block DMs, share no
/// context with the bot, or the platform may time out; none of that is
/// allowed to fail the transition that triggered the notification.
pub struct NotificationDispatcher {
    fabric: Arc<dyn ChannelFabric>,
}

impl NotificationDispatcher {
    pub fn new(fabric: Arc<dyn ChannelFabric>) -> Self {
        Self { fabric }
    }

    pub async fn dm(&self, user_id: &str, text: &str, file: Option<&FileUpload>) {
        let message = OutboundMessage::text(text);
        if let Err(e) = self.fabric.send_dm(user_id, &message, file).await {
            warn!("could not deliver notification to {user_id}: {e}");
        }
    }
}
