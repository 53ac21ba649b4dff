use chrono::Utc;
use log::warn;
use std::sync::Arc;

use crate::fabric::{ChannelFabric, Embed, EmbedField, OutboundMessage};

const AUDIT_COLOR: u32 = 0x2B2D31;

/// Append-only audit trail: one structured entry per lifecycle
/// transition, posted to the workspace's log channel. Send failures are
/// logged and swallowed so the transition itself still succeeds.
pub struct AuditLog {
    fabric: Arc<dyn ChannelFabric>,
}

impl AuditLog {
    pub fn new(fabric: Arc<dyn ChannelFabric>) -> Self {
        Self { fabric }
    }

    pub async fn record(
        &self,
        log_channel_id: &str,
        action: &str,
        actor_id: &str,
        ticket_channel_id: &str,
        details: &[(&str, String)],
    ) {
        let mut fields = vec![
            EmbedField {
                name: "Actor".to_string(),
                value: format!("<@{actor_id}>"),
                inline: Some(true),
            },
            EmbedField {
                name: "Ticket".to_string(),
                value: format!("<#{ticket_channel_id}>"),
                inline: Some(true),
            },
        ];
        for (name, value) in details {
            fields.push(EmbedField {
                name: (*name).to_string(),
                value: value.clone(),
                inline: Some(false),
            });
        }

        let embed = Embed {
            title: Some(format!("Ticket {action}")),
            color: Some(AUDIT_COLOR),
            fields,
            timestamp: Some(Utc::now().to_rfc3339()),
            ..Embed::default()
        };

        if let Err(e) = self
            .fabric
            .send_message(log_channel_id, &OutboundMessage::embed(embed))
            .await
        {
            warn!("audit entry '{action}' for {ticket_channel_id} not delivered: {e}");
        }
    }
}
