use thiserror::Error;

use crate::store::StoreError;

/// Every way a ticket transition can be refused or fail. Guard rejections
/// are expected outcomes shown to the acting user; transient kinds
/// suggest a retry. Notification and transcript problems never appear
/// here: they are logged and swallowed.
#[derive(Debug, Error)]
pub enum TicketError {
    #[error("ticketing is not fully configured; ask an administrator to finish setup")]
    ConfigIncomplete,

    #[error("you already have an open ticket: <#{channel_id}>")]
    DuplicateTicket { channel_id: String },

    #[error("this ticket is already claimed")]
    AlreadyClaimed,

    #[error("this ticket is not claimed")]
    NotClaimed,

    #[error("an escalation is already in progress for this ticket")]
    DuplicateEscalation,

    #[error("this escalation has already been accepted")]
    AlreadyAccepted,

    #[error("escalation is not configured for this workspace")]
    EscalationNotConfigured,

    #[error("you are not allowed to do that")]
    PermissionDenied,

    #[error("the bot is missing the permissions it needs for that")]
    BotPermissionDenied,

    #[error("could not create the ticket channel: {0}")]
    ChannelCreateFailed(String),

    #[error("could not reach the ticket channel: {0}")]
    ChannelFetchFailed(String),

    #[error("no ticket exists for this channel")]
    TicketNotFound,

    #[error("another update for this ticket is in progress; try again shortly")]
    Busy,

    #[error("workspace configuration storage failed: {0}")]
    Store(#[from] StoreError),
}

impl TicketError {
    /// Transient failures where retrying shortly is reasonable advice.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ChannelCreateFailed(_) | Self::ChannelFetchFailed(_) | Self::Busy
        )
    }

    /// Expected guard rejections, as opposed to infrastructure failures.
    pub fn is_guard(&self) -> bool {
        matches!(
            self,
            Self::ConfigIncomplete
                | Self::DuplicateTicket { .. }
                | Self::AlreadyClaimed
                | Self::NotClaimed
                | Self::DuplicateEscalation
                | Self::AlreadyAccepted
                | Self::EscalationNotConfigured
                | Self::PermissionDenied
                | Self::TicketNotFound
        )
    }
}
