pub mod audit;
pub mod controls;
pub mod error;
pub mod locks;
pub mod manager;
pub mod notify;
pub mod perms;
pub mod transcript;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

pub use error::TicketError;
pub use manager::{CloseOptions, CreatedTicket, TicketManager};
pub use perms::ActorContext;

const MAX_CHANNEL_NAME: usize = 90;

/// How new ticket channels are named when the opener supplies no name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamingMode {
    #[default]
    Sequential,
    Requester,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EscalationMode {
    /// Escalating moves the channel and flips permissions immediately.
    #[default]
    Automatic,
    /// Escalating only records the request; a manager must accept before
    /// the channel moves.
    Manual,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EscalationConfig {
    pub enabled: bool,
    pub mode: EscalationMode,
    pub manager_role_id: Option<String>,
    pub escalated_category_id: Option<String>,
}

/// Per-workspace ticket settings plus the live ticket records, persisted
/// as the `tickets` sub-object of the workspace config blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TicketConfig {
    pub enabled: bool,
    pub category_id: Option<String>,
    pub staff_role_id: Option<String>,
    pub log_channel_id: Option<String>,
    pub naming_mode: NamingMode,
    pub allow_multiple_per_opener: bool,
    pub next_number: u32,
    pub escalation: EscalationConfig,
    pub panel_channel_id: Option<String>,
    pub panel_message_id: Option<String>,
    pub by_user: HashMap<String, OpenerIndexEntry>,
    pub by_channel: HashMap<String, Ticket>,
}

impl Default for TicketConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            category_id: None,
            staff_role_id: None,
            log_channel_id: None,
            naming_mode: NamingMode::default(),
            allow_multiple_per_opener: false,
            next_number: 1,
            escalation: EscalationConfig::default(),
            panel_channel_id: None,
            panel_message_id: None,
            by_user: HashMap::new(),
            by_channel: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenerIndexEntry {
    pub channel_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Ticket {
    pub opener_id: String,
    pub created_at: DateTime<Utc>,
    pub name: String,
    pub claimed_by: Option<String>,
    /// Every staff member who ever touched the ticket: claimer,
    /// escalator, accepter, closer.
    pub support_participant_ids: BTreeSet<String>,
    pub close_requested_by: Option<String>,
    pub escalation: Option<EscalationState>,
    pub control_message_id: Option<String>,
}

impl Default for Ticket {
    fn default() -> Self {
        Self {
            opener_id: String::new(),
            created_at: Utc::now(),
            name: String::new(),
            claimed_by: None,
            support_participant_ids: BTreeSet::new(),
            close_requested_by: None,
            escalation: None,
            control_message_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EscalationState {
    pub requested_by: String,
    pub requested_at: DateTime<Utc>,
    pub accepted_by: Option<String>,
    /// Audit-channel accept button, disabled once acceptance lands.
    pub accept_message_id: Option<String>,
}

impl Default for EscalationState {
    fn default() -> Self {
        Self {
            requested_by: String::new(),
            requested_at: Utc::now(),
            accepted_by: None,
            accept_message_id: None,
        }
    }
}

impl TicketConfig {
    /// Fully configured for ticket creation.
    pub fn ready(&self) -> bool {
        self.enabled
            && self.category_id.is_some()
            && self.staff_role_id.is_some()
            && self.log_channel_id.is_some()
    }

    pub fn escalation_ready(&self) -> bool {
        self.escalation.enabled
            && self.escalation.manager_role_id.is_some()
            && self.escalation.escalated_category_id.is_some()
    }

    /// Live ticket channel for `opener_id`, pruning a stale index entry
    /// (one pointing at a channel with no record) as a side effect.
    /// Returns whether anything was pruned so the caller knows to
    /// persist.
    pub fn live_ticket_for(&mut self, opener_id: &str) -> (Option<String>, bool) {
        match self.by_user.get(opener_id) {
            Some(entry) if self.by_channel.contains_key(&entry.channel_id) => {
                (Some(entry.channel_id.clone()), false)
            }
            Some(_) => {
                self.by_user.remove(opener_id);
                (None, true)
            }
            None => (None, false),
        }
    }

    /// Derive the channel name for a new ticket. The sequential counter
    /// advances only when it is actually consumed.
    pub fn derive_name(&mut self, custom: Option<&str>, opener_name: &str) -> String {
        if let Some(custom) = custom {
            return slugify(custom);
        }
        match self.naming_mode {
            NamingMode::Sequential => {
                let number = self.next_number.max(1);
                self.next_number = number + 1;
                format!("ticket-{number:04}")
            }
            NamingMode::Requester => slugify(opener_name),
        }
    }

    /// Drop a ticket record and whatever index entry points at it.
    pub fn remove_ticket(&mut self, channel_id: &str) -> Option<Ticket> {
        let ticket = self.by_channel.remove(channel_id)?;
        self.by_user
            .retain(|_, entry| entry.channel_id != channel_id);
        Some(ticket)
    }
}

/// Lowercased alphanumeric runs joined by dashes, in the shape the
/// platform accepts for channel names.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut pending_dash = false;

    for c in input.chars() {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            for lower in c.to_lowercase() {
                slug.push(lower);
            }
        } else {
            pending_dash = true;
        }
    }

    if slug.chars().count() > MAX_CHANNEL_NAME {
        slug = slug.chars().take(MAX_CHANNEL_NAME).collect();
    }
    while slug.ends_with('-') {
        slug.pop();
    }

    if slug.is_empty() {
        "ticket".to_string()
    } else {
        slug
    }
}
