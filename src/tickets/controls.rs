use crate::fabric::{
    button_style, Button, ComponentRow, Embed, EmbedField, EmbedFooter, OutboundMessage,
};

use super::{Ticket, TicketConfig};

// Component custom ids: the wire contract between the control messages
// and the interaction dispatcher.
pub const ACTION_CREATE: &str = "ticket_create";
pub const ACTION_CLAIM: &str = "ticket_claim";
pub const ACTION_UNCLAIM: &str = "ticket_unclaim";
pub const ACTION_REQUEST_CLOSE: &str = "ticket_request_close";
pub const ACTION_CLOSE: &str = "ticket_close";
pub const ACTION_ESCALATE: &str = "ticket_escalate";
pub const ACTION_ACCEPT_ESCALATION: &str = "ticket_accept_escalation";
pub const ACTION_FORCE_CLOSE: &str = "ticket_force_close";

const EMBED_COLOR: u32 = 0x5865F2;

fn state_label(ticket: &Ticket) -> String {
    let mut state = match (&ticket.escalation, &ticket.claimed_by) {
        (Some(esc), _) if esc.accepted_by.is_some() => "escalated".to_string(),
        (Some(_), _) => "escalation requested".to_string(),
        (None, Some(_)) => "claimed".to_string(),
        (None, None) => "open".to_string(),
    };
    if ticket.close_requested_by.is_some() {
        state.push_str(" · close requested");
    }
    state
}

/// The single message bearing a ticket's action buttons, re-rendered on
/// every state change.
pub fn render_controls(ticket: &Ticket, cfg: &TicketConfig) -> OutboundMessage {
    let mut fields = vec![
        EmbedField {
            name: "Opened by".to_string(),
            value: format!("<@{}>", ticket.opener_id),
            inline: Some(true),
        },
        EmbedField {
            name: "Status".to_string(),
            value: state_label(ticket),
            inline: Some(true),
        },
    ];
    if let Some(claimer) = &ticket.claimed_by {
        fields.push(EmbedField {
            name: "Claimed by".to_string(),
            value: format!("<@{claimer}>"),
            inline: Some(true),
        });
    }
    if let Some(esc) = &ticket.escalation {
        let value = match &esc.accepted_by {
            Some(accepter) => format!("accepted by <@{accepter}>"),
            None => format!("requested by <@{}>", esc.requested_by),
        };
        fields.push(EmbedField {
            name: "Escalation".to_string(),
            value,
            inline: Some(true),
        });
    }

    let embed = Embed {
        title: Some(format!("Support ticket: {}", ticket.name)),
        description: Some(
            "A member of the support team will be with you shortly. \
             Use the buttons below to manage this ticket."
                .to_string(),
        ),
        color: Some(EMBED_COLOR),
        fields,
        footer: Some(EmbedFooter {
            text: "modbot support".to_string(),
        }),
        timestamp: Some(ticket.created_at.to_rfc3339()),
    };

    let mut buttons = Vec::new();
    if ticket.claimed_by.is_some() {
        buttons.push(Button::new(button_style::SECONDARY, "Unclaim", ACTION_UNCLAIM));
    } else {
        buttons.push(Button::new(button_style::PRIMARY, "Claim", ACTION_CLAIM));
    }
    buttons.push(Button::new(
        button_style::SECONDARY,
        "Request close",
        ACTION_REQUEST_CLOSE,
    ));
    buttons.push(Button::new(button_style::DANGER, "Close", ACTION_CLOSE));
    if cfg.escalation_ready() {
        let escalate = Button::new(button_style::PRIMARY, "Escalate", ACTION_ESCALATE);
        buttons.push(if ticket.escalation.is_some() {
            escalate.disabled()
        } else {
            escalate
        });
    }

    OutboundMessage::embed(embed).with_components(vec![ComponentRow::of(buttons)])
}

/// The public "open a ticket" panel message.
pub fn render_panel() -> OutboundMessage {
    let embed = Embed {
        title: Some("Need help?".to_string()),
        description: Some(
            "Open a private support ticket and the team will get back to you.".to_string(),
        ),
        color: Some(EMBED_COLOR),
        ..Embed::default()
    };
    OutboundMessage::embed(embed).with_components(vec![ComponentRow::of(vec![Button::new(
        button_style::PRIMARY,
        "Open a ticket",
        ACTION_CREATE,
    )])])
}

/// Manual-mode accept control, posted to the audit channel and addressed
/// to the manager role.
pub fn render_accept_control(
    ticket_channel_id: &str,
    manager_role_id: &str,
    requested_by: &str,
    disabled: bool,
) -> OutboundMessage {
    let accept = Button::new(
        button_style::SUCCESS,
        "Accept escalation",
        format!("{ACTION_ACCEPT_ESCALATION}:{ticket_channel_id}"),
    );
    let accept = if disabled { accept.disabled() } else { accept };

    let mut message = OutboundMessage::text(format!(
        "<@&{manager_role_id}> escalation requested by <@{requested_by}> in <#{ticket_channel_id}>"
    ));
    message.components = vec![ComponentRow::of(vec![accept])];
    message
}
