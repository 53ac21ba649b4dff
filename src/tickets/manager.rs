use chrono::Utc;
use log::{error, info, warn};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::fabric::{
    permissions, ChannelFabric, FabricError, FileUpload, NewChannel, OutboundMessage,
    PermissionOverwrite,
};
use crate::store::ConfigStore;

use super::audit::AuditLog;
use super::controls;
use super::locks::TicketLocks;
use super::notify::NotificationDispatcher;
use super::perms::{self, ActorContext};
use super::transcript::{Transcript, TranscriptArchiver};
use super::{
    EscalationMode, EscalationState, OpenerIndexEntry, Ticket, TicketConfig, TicketError,
};

const FABRIC_TIMEOUT: Duration = Duration::from_secs(20);
const LOCK_WAIT: Duration = Duration::from_secs(10);

/// Every external call is a suspension point where another transition
/// could start; bound each one so a hung platform call can never pin a
/// ticket lock forever.
async fn bounded<T, F>(fut: F) -> Result<T, FabricError>
where
    F: Future<Output = Result<T, FabricError>>,
{
    match tokio::time::timeout(FABRIC_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(FabricError::Timeout),
    }
}

fn create_failure(e: FabricError) -> TicketError {
    match e {
        FabricError::MissingAccess => TicketError::BotPermissionDenied,
        other => TicketError::ChannelCreateFailed(other.to_string()),
    }
}

fn fetch_failure(e: FabricError) -> TicketError {
    match e {
        FabricError::MissingAccess => TicketError::BotPermissionDenied,
        other => TicketError::ChannelFetchFailed(other.to_string()),
    }
}

#[derive(Debug, Clone)]
pub struct CreatedTicket {
    pub channel_id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CloseOptions {
    /// Skip the opener DM.
    pub silent: bool,
    /// Admin override: bypasses the support-staff check. The elevated
    /// capability gate lives in the caller.
    pub force: bool,
}

/// Orchestrates every ticket transition: validates the actor, serializes
/// on the per-ticket lock, mutates and persists the workspace blob, then
/// drives the channel side effects.
pub struct TicketManager {
    store: Arc<dyn ConfigStore>,
    fabric: Arc<dyn ChannelFabric>,
    locks: TicketLocks,
    archiver: TranscriptArchiver,
    notifier: NotificationDispatcher,
    audit: AuditLog,
    bot_user_id: String,
}

impl TicketManager {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        fabric: Arc<dyn ChannelFabric>,
        bot_user_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            archiver: TranscriptArchiver::new(fabric.clone()),
            notifier: NotificationDispatcher::new(fabric.clone()),
            audit: AuditLog::new(fabric.clone()),
            fabric,
            locks: TicketLocks::new(),
            bot_user_id: bot_user_id.into(),
        }
    }

    async fn lock(
        &self,
        workspace_id: &str,
        key: &str,
    ) -> Result<tokio::sync::OwnedMutexGuard<()>, TicketError> {
        self.locks
            .acquire_timeout(workspace_id, key, LOCK_WAIT)
            .await
            .ok_or(TicketError::Busy)
    }

    async fn tickets(&self, workspace_id: &str) -> Result<TicketConfig, TicketError> {
        Ok(self.store.get(workspace_id).await?.tickets)
    }

    async fn persist(
        &self,
        workspace_id: &str,
        tickets: &TicketConfig,
    ) -> Result<(), TicketError> {
        self.store
            .patch(workspace_id, json!({ "tickets": tickets }))
            .await?;
        Ok(())
    }

    async fn rerender_controls(&self, channel_id: &str, ticket: &Ticket, cfg: &TicketConfig) {
        let Some(message_id) = &ticket.control_message_id else {
            return;
        };
        let message = controls::render_controls(ticket, cfg);
        if let Err(e) = bounded(self.fabric.edit_message(channel_id, message_id, &message)).await {
            warn!("controls for {channel_id} not re-rendered: {e}");
        }
    }

    async fn notice(&self, channel_id: &str, text: String) {
        if let Err(e) =
            bounded(self.fabric.send_message(channel_id, &OutboundMessage::text(text))).await
        {
            warn!("notice in {channel_id} not posted: {e}");
        }
    }

    async fn record_audit(
        &self,
        cfg: &TicketConfig,
        action: &str,
        actor_id: &str,
        channel_id: &str,
        details: &[(&str, String)],
    ) {
        if let Some(log_channel) = &cfg.log_channel_id {
            self.audit
                .record(log_channel, action, actor_id, channel_id, details)
                .await;
        }
    }

    /// Move the channel under the escalated category and flip overwrites:
    /// the staff role loses sight of the ticket, the manager role gains
    /// it. Runs after the state is already persisted; failures leave the
    /// channel where it is and are logged for manual recovery.
    async fn move_and_flip(&self, channel_id: &str, cfg: &TicketConfig) {
        let (Some(category), Some(manager_role)) = (
            cfg.escalation.escalated_category_id.as_deref(),
            cfg.escalation.manager_role_id.as_deref(),
        ) else {
            return;
        };

        if let Err(e) = bounded(self.fabric.move_to_category(channel_id, category)).await {
            warn!("escalated channel {channel_id} not moved: {e}");
        }
        if let Some(staff_role) = cfg.staff_role_id.as_deref() {
            if let Err(e) = bounded(self.fabric.remove_overwrite(channel_id, staff_role)).await {
                warn!("staff overwrite on {channel_id} not removed: {e}");
            }
        }
        let grant = PermissionOverwrite::allow_role(
            manager_role,
            permissions::VIEW_CHANNEL
                | permissions::SEND_MESSAGES
                | permissions::READ_MESSAGE_HISTORY,
        );
        if let Err(e) = bounded(self.fabric.edit_overwrite(channel_id, &grant)).await {
            warn!("manager overwrite on {channel_id} not granted: {e}");
        }
    }

    /// Open a new ticket: allocate the private channel, record it, post
    /// the control message. Nothing is persisted if the channel cannot
    /// be created.
    pub async fn create(
        &self,
        workspace_id: &str,
        opener: &ActorContext,
        custom_name: Option<&str>,
    ) -> Result<CreatedTicket, TicketError> {
        // No channel id exists yet; serialize per opener instead so a
        // double-clicked create button cannot race itself.
        let create_key = format!("create:{}", opener.user_id);
        let _guard = self.lock(workspace_id, &create_key).await?;

        let mut tickets = self.tickets(workspace_id).await?;
        if !tickets.ready() {
            return Err(TicketError::ConfigIncomplete);
        }
        let category_id = tickets.category_id.clone().ok_or(TicketError::ConfigIncomplete)?;
        let staff_role = tickets.staff_role_id.clone().ok_or(TicketError::ConfigIncomplete)?;

        if !tickets.allow_multiple_per_opener {
            let (live, pruned) = tickets.live_ticket_for(&opener.user_id);
            if let Some(channel_id) = live {
                return Err(TicketError::DuplicateTicket { channel_id });
            }
            if pruned {
                self.persist(workspace_id, &tickets).await?;
            }
        }

        let name = tickets.derive_name(custom_name, &opener.display_name);

        let member_bits = permissions::VIEW_CHANNEL
            | permissions::SEND_MESSAGES
            | permissions::READ_MESSAGE_HISTORY
            | permissions::ATTACH_FILES;
        let request = NewChannel {
            name: name.clone(),
            parent_id: Some(category_id),
            topic: Some(format!("Support ticket for {}", opener.display_name)),
            overwrites: vec![
                // @everyone carries the workspace id.
                PermissionOverwrite::deny_role(workspace_id, permissions::VIEW_CHANNEL),
                PermissionOverwrite::allow_member(&opener.user_id, member_bits),
                PermissionOverwrite::allow_role(
                    &staff_role,
                    member_bits | permissions::MANAGE_MESSAGES,
                ),
                PermissionOverwrite::allow_member(
                    &self.bot_user_id,
                    member_bits | permissions::MANAGE_MESSAGES | permissions::MANAGE_CHANNELS,
                ),
            ],
        };

        let channel = bounded(self.fabric.create_channel(workspace_id, &request))
            .await
            .map_err(create_failure)?;

        let ticket = Ticket {
            opener_id: opener.user_id.clone(),
            created_at: Utc::now(),
            name: name.clone(),
            ..Ticket::default()
        };
        tickets.by_channel.insert(channel.id.clone(), ticket.clone());
        if !tickets.allow_multiple_per_opener {
            tickets.by_user.insert(
                opener.user_id.clone(),
                OpenerIndexEntry {
                    channel_id: channel.id.clone(),
                },
            );
        }

        if let Err(e) = self.persist(workspace_id, &tickets).await {
            // Channel and record are created/destroyed together: a
            // failed persist rolls the channel back.
            if let Err(rollback) = bounded(self.fabric.delete_channel(&channel.id)).await {
                error!(
                    "channel {} leaked after store failure ({rollback}); remove it manually",
                    channel.id
                );
            }
            return Err(e);
        }

        let intro = controls::render_controls(&ticket, &tickets);
        match bounded(self.fabric.send_message(&channel.id, &intro)).await {
            Ok(sent) => {
                if let Some(stored) = tickets.by_channel.get_mut(&channel.id) {
                    stored.control_message_id = Some(sent.id);
                }
                if let Err(e) = self.persist(workspace_id, &tickets).await {
                    warn!("control message id for {} not persisted: {e}", channel.id);
                }
            }
            Err(e) => warn!("intro message for {} not posted: {e}", channel.id),
        }

        self.record_audit(
            &tickets,
            "created",
            &opener.user_id,
            &channel.id,
            &[("Name", name.clone())],
        )
        .await;

        info!("ticket {name} ({}) opened by {}", channel.id, opener.user_id);
        Ok(CreatedTicket {
            channel_id: channel.id,
            name,
        })
    }

    pub async fn claim(
        &self,
        workspace_id: &str,
        channel_id: &str,
        actor: &ActorContext,
    ) -> Result<(), TicketError> {
        let _guard = self.lock(workspace_id, channel_id).await?;

        let mut tickets = self.tickets(workspace_id).await?;
        let mut ticket = tickets
            .by_channel
            .get(channel_id)
            .cloned()
            .ok_or(TicketError::TicketNotFound)?;

        if !perms::is_support_staff(actor, &tickets) {
            return Err(TicketError::PermissionDenied);
        }
        if ticket.claimed_by.is_some() {
            return Err(TicketError::AlreadyClaimed);
        }

        ticket.claimed_by = Some(actor.user_id.clone());
        ticket.support_participant_ids.insert(actor.user_id.clone());
        tickets.by_channel.insert(channel_id.to_string(), ticket.clone());
        self.persist(workspace_id, &tickets).await?;

        self.rerender_controls(channel_id, &ticket, &tickets).await;
        self.notice(
            channel_id,
            format!("<@{}> is handling this ticket.", actor.user_id),
        )
        .await;
        self.record_audit(&tickets, "claimed", &actor.user_id, channel_id, &[])
            .await;
        Ok(())
    }

    pub async fn unclaim(
        &self,
        workspace_id: &str,
        channel_id: &str,
        actor: &ActorContext,
    ) -> Result<(), TicketError> {
        let _guard = self.lock(workspace_id, channel_id).await?;

        let mut tickets = self.tickets(workspace_id).await?;
        let mut ticket = tickets
            .by_channel
            .get(channel_id)
            .cloned()
            .ok_or(TicketError::TicketNotFound)?;

        if !perms::is_support_staff(actor, &tickets) {
            return Err(TicketError::PermissionDenied);
        }
        let Some(claimer) = ticket.claimed_by.clone() else {
            return Err(TicketError::NotClaimed);
        };
        if claimer != actor.user_id && !perms::is_ticket_admin(actor) {
            return Err(TicketError::PermissionDenied);
        }

        ticket.claimed_by = None;
        tickets.by_channel.insert(channel_id.to_string(), ticket.clone());
        self.persist(workspace_id, &tickets).await?;

        self.rerender_controls(channel_id, &ticket, &tickets).await;
        self.notice(
            channel_id,
            format!("<@{}> released this ticket.", actor.user_id),
        )
        .await;
        self.record_audit(&tickets, "unclaimed", &actor.user_id, channel_id, &[])
            .await;
        Ok(())
    }

    /// Opener asks for the ticket to be closed; staff still decide. Sets
    /// the flag and pings the staff role, nothing else.
    pub async fn request_close(
        &self,
        workspace_id: &str,
        channel_id: &str,
        actor: &ActorContext,
        reason: Option<&str>,
    ) -> Result<(), TicketError> {
        let _guard = self.lock(workspace_id, channel_id).await?;

        let mut tickets = self.tickets(workspace_id).await?;
        let mut ticket = tickets
            .by_channel
            .get(channel_id)
            .cloned()
            .ok_or(TicketError::TicketNotFound)?;

        if ticket.opener_id != actor.user_id {
            return Err(TicketError::PermissionDenied);
        }

        ticket.close_requested_by = Some(actor.user_id.clone());
        tickets.by_channel.insert(channel_id.to_string(), ticket.clone());
        self.persist(workspace_id, &tickets).await?;

        let mut text = match &tickets.staff_role_id {
            Some(role) => format!(
                "<@&{role}> <@{}> asked to close this ticket.",
                actor.user_id
            ),
            None => format!("<@{}> asked to close this ticket.", actor.user_id),
        };
        if let Some(reason) = reason {
            text.push_str(&format!(" Reason: {reason}"));
        }

        self.rerender_controls(channel_id, &ticket, &tickets).await;
        self.notice(channel_id, text).await;
        self.record_audit(
            &tickets,
            "close requested",
            &actor.user_id,
            channel_id,
            &[("Reason", reason.unwrap_or("none given").to_string())],
        )
        .await;
        Ok(())
    }

    pub async fn escalate(
        &self,
        workspace_id: &str,
        channel_id: &str,
        actor: &ActorContext,
    ) -> Result<(), TicketError> {
        let _guard = self.lock(workspace_id, channel_id).await?;

        let mut tickets = self.tickets(workspace_id).await?;
        let mut ticket = tickets
            .by_channel
            .get(channel_id)
            .cloned()
            .ok_or(TicketError::TicketNotFound)?;

        if !perms::is_support_staff(actor, &tickets) {
            return Err(TicketError::PermissionDenied);
        }
        if !tickets.escalation_ready() {
            return Err(TicketError::EscalationNotConfigured);
        }
        if ticket.escalation.is_some() {
            return Err(TicketError::DuplicateEscalation);
        }

        let mut escalation = EscalationState {
            requested_by: actor.user_id.clone(),
            requested_at: Utc::now(),
            accepted_by: None,
            accept_message_id: None,
        };
        ticket.support_participant_ids.insert(actor.user_id.clone());

        match tickets.escalation.mode {
            EscalationMode::Automatic => {
                ticket.escalation = Some(escalation);
                tickets.by_channel.insert(channel_id.to_string(), ticket.clone());
                self.persist(workspace_id, &tickets).await?;

                self.move_and_flip(channel_id, &tickets).await;
                self.rerender_controls(channel_id, &ticket, &tickets).await;
                self.record_audit(&tickets, "escalated", &actor.user_id, channel_id, &[])
                    .await;
            }
            EscalationMode::Manual => {
                // Post the accept control first so its id can be stored
                // with the escalation state.
                if let (Some(log_channel), Some(manager_role)) = (
                    tickets.log_channel_id.as_deref(),
                    tickets.escalation.manager_role_id.as_deref(),
                ) {
                    let control = controls::render_accept_control(
                        channel_id,
                        manager_role,
                        &actor.user_id,
                        false,
                    );
                    match bounded(self.fabric.send_message(log_channel, &control)).await {
                        Ok(sent) => escalation.accept_message_id = Some(sent.id),
                        Err(e) => warn!("accept control for {channel_id} not posted: {e}"),
                    }
                }

                ticket.escalation = Some(escalation);
                tickets.by_channel.insert(channel_id.to_string(), ticket.clone());
                self.persist(workspace_id, &tickets).await?;

                self.rerender_controls(channel_id, &ticket, &tickets).await;
                self.record_audit(
                    &tickets,
                    "escalation requested",
                    &actor.user_id,
                    channel_id,
                    &[("Mode", "manual accept".to_string())],
                )
                .await;
            }
        }

        Ok(())
    }

    pub async fn accept_escalation(
        &self,
        workspace_id: &str,
        channel_id: &str,
        manager: &ActorContext,
    ) -> Result<(), TicketError> {
        let _guard = self.lock(workspace_id, channel_id).await?;

        let mut tickets = self.tickets(workspace_id).await?;
        let mut ticket = tickets
            .by_channel
            .get(channel_id)
            .cloned()
            .ok_or(TicketError::TicketNotFound)?;

        if !perms::is_escalation_manager(manager, &tickets) {
            return Err(TicketError::PermissionDenied);
        }
        let Some(mut escalation) = ticket.escalation.clone() else {
            return Err(TicketError::EscalationNotConfigured);
        };
        if escalation.accepted_by.is_some() {
            return Err(TicketError::AlreadyAccepted);
        }

        escalation.accepted_by = Some(manager.user_id.clone());
        ticket.escalation = Some(escalation.clone());
        ticket.support_participant_ids.insert(manager.user_id.clone());
        tickets.by_channel.insert(channel_id.to_string(), ticket.clone());
        self.persist(workspace_id, &tickets).await?;

        self.move_and_flip(channel_id, &tickets).await;

        // Disable the accept button now that acceptance landed.
        if let (Some(log_channel), Some(accept_id), Some(manager_role)) = (
            tickets.log_channel_id.as_deref(),
            escalation.accept_message_id.as_deref(),
            tickets.escalation.manager_role_id.as_deref(),
        ) {
            let disabled = controls::render_accept_control(
                channel_id,
                manager_role,
                &escalation.requested_by,
                true,
            );
            if let Err(e) =
                bounded(self.fabric.edit_message(log_channel, accept_id, &disabled)).await
            {
                warn!("accept control for {channel_id} not disabled: {e}");
            }
        }

        self.rerender_controls(channel_id, &ticket, &tickets).await;
        self.notice(
            channel_id,
            format!("<@{}> accepted the escalation.", manager.user_id),
        )
        .await;
        self.record_audit(
            &tickets,
            "escalation accepted",
            &manager.user_id,
            channel_id,
            &[],
        )
        .await;
        Ok(())
    }

    /// Close a ticket. Side effects are strictly ordered: persist the
    /// record removal, then deliver the audit entry and opener DM, and
    /// delete the channel last, so a crash partway leaves the channel
    /// intact for manual recovery instead of orphaning data.
    pub async fn close(
        &self,
        workspace_id: &str,
        channel_id: &str,
        actor: &ActorContext,
        reason: &str,
        opts: CloseOptions,
    ) -> Result<(), TicketError> {
        let _guard = self.lock(workspace_id, channel_id).await?;

        let mut tickets = self.tickets(workspace_id).await?;
        let mut ticket = tickets
            .by_channel
            .get(channel_id)
            .cloned()
            .ok_or(TicketError::TicketNotFound)?;

        if !opts.force && !perms::is_support_staff(actor, &tickets) {
            return Err(TicketError::PermissionDenied);
        }

        if let Some(claimer) = &ticket.claimed_by {
            ticket.support_participant_ids.insert(claimer.clone());
        }
        if let Some(accepter) = ticket
            .escalation
            .as_ref()
            .and_then(|esc| esc.accepted_by.clone())
        {
            ticket.support_participant_ids.insert(accepter);
        }
        ticket.support_participant_ids.insert(actor.user_id.clone());

        let transcript = self.archiver.archive(channel_id).await;
        if transcript.partial {
            warn!("closing {channel_id} with a partial transcript");
        }

        tickets.remove_ticket(channel_id);
        self.persist(workspace_id, &tickets).await?;

        let label = if opts.force { "force closed" } else { "closed" };
        let summary = format!(
            "Ticket {} {label} by <@{}>. Reason: {reason}",
            ticket.name, actor.user_id
        );
        let file = FileUpload {
            name: Transcript::file_name(&ticket.name),
            data: transcript.text.clone().into_bytes(),
        };

        if let Some(log_channel) = tickets.log_channel_id.as_deref() {
            let participants = ticket
                .support_participant_ids
                .iter()
                .map(|id| format!("<@{id}>"))
                .collect::<Vec<_>>()
                .join(", ");
            let mut message = OutboundMessage::text(format!(
                "{summary}\nParticipants: {participants}"
            ));
            message.content = message.content.map(|c| {
                if transcript.partial {
                    format!("{c}\n(transcript is partial)")
                } else {
                    c
                }
            });
            if let Err(e) =
                bounded(self.fabric.send_message_with_file(log_channel, &message, &file)).await
            {
                warn!("closure summary for {channel_id} not delivered: {e}");
            }
        }

        if !opts.silent {
            self.notifier
                .dm(
                    &ticket.opener_id,
                    &format!("Your support ticket was {label}. Reason: {reason}"),
                    Some(&file),
                )
                .await;
        }

        if let Err(e) = bounded(self.fabric.delete_channel(channel_id)).await {
            error!("ticket channel {channel_id} not deleted after close: {e}");
        }
        self.locks.forget(workspace_id, channel_id);

        info!(
            "ticket {} ({channel_id}) {label} by {}",
            ticket.name, actor.user_id
        );
        Ok(())
    }

    /// Admin-only close: silent and unconditional. Callers gate this on
    /// the elevated ticket-admin capability, not `is_support_staff`.
    pub async fn force_close(
        &self,
        workspace_id: &str,
        channel_id: &str,
        actor: &ActorContext,
        reason: &str,
    ) -> Result<(), TicketError> {
        self.close(
            workspace_id,
            channel_id,
            actor,
            reason,
            CloseOptions {
                silent: true,
                force: true,
            },
        )
        .await
    }

    /// Publish (or republish) the public "open a ticket" panel.
    pub async fn publish_panel(
        &self,
        workspace_id: &str,
        panel_channel_id: &str,
    ) -> Result<(), TicketError> {
        let _guard = self.lock(workspace_id, "panel").await?;

        let mut tickets = self.tickets(workspace_id).await?;
        if !tickets.ready() {
            return Err(TicketError::ConfigIncomplete);
        }

        let sent = bounded(self.fabric.send_message(panel_channel_id, &controls::render_panel()))
            .await
            .map_err(fetch_failure)?;

        tickets.panel_channel_id = Some(panel_channel_id.to_string());
        tickets.panel_message_id = Some(sent.id);
        self.persist(workspace_id, &tickets).await?;
        Ok(())
    }
}
