use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{post, put};
use axum::{Json, Router};
use log::error;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::shared::state::AppState;
use crate::store::ConfigStore;
use crate::tickets::controls::{
    ACTION_ACCEPT_ESCALATION, ACTION_CLAIM, ACTION_CLOSE, ACTION_CREATE, ACTION_ESCALATE,
    ACTION_FORCE_CLOSE, ACTION_REQUEST_CLOSE, ACTION_UNCLAIM,
};
use crate::tickets::{perms, ActorContext, CloseOptions, TicketError, TicketManager};

/// Component/modal action forwarded by the gateway: who pressed what,
/// where, with which form values.
#[derive(Debug, Deserialize)]
pub struct ActionPayload {
    pub workspace_id: String,
    pub channel_id: String,
    /// Component custom id, e.g. `ticket_claim`.
    pub action: String,
    pub actor: ActorPayload,
    #[serde(default)]
    pub values: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct ActorPayload {
    pub user_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub is_workspace_manager: bool,
    #[serde(default)]
    pub role_ids: Vec<String>,
}

impl From<ActorPayload> for ActorContext {
    fn from(p: ActorPayload) -> Self {
        let display_name = if p.display_name.is_empty() {
            p.user_id.clone()
        } else {
            p.display_name
        };
        Self {
            user_id: p.user_id,
            display_name,
            is_admin: p.is_admin,
            is_workspace_manager: p.is_workspace_manager,
            role_ids: p.role_ids,
        }
    }
}

/// Ephemeral reply shown to the acting user.
#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub ok: bool,
    pub message: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub retryable: bool,
}

impl ActionResponse {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
            retryable: false,
        }
    }

    fn rejected(err: &TicketError) -> Self {
        Self {
            ok: false,
            message: err.to_string(),
            retryable: err.is_transient(),
        }
    }
}

pub fn configure_interaction_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/interactions", post(handle_action))
        .route("/api/workspaces/:id/tickets/config", put(update_ticket_config))
        .route("/api/workspaces/:id/tickets/panel", post(publish_panel))
}

async fn handle_action(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ActionPayload>,
) -> Result<Json<ActionResponse>, (StatusCode, String)> {
    let response = dispatch_action(&state.manager, payload).await?;
    Ok(Json(response))
}

/// Map an inbound action onto the lifecycle manager. Guard rejections
/// come back as ordinary (ok=false) replies for the acting user;
/// infrastructure failures become a 500.
pub async fn dispatch_action(
    manager: &TicketManager,
    payload: ActionPayload,
) -> Result<ActionResponse, (StatusCode, String)> {
    let workspace = payload.workspace_id;
    let channel = payload.channel_id;
    let actor: ActorContext = payload.actor.into();

    // The accept control carries its ticket channel in the custom id
    // because it lives in the audit channel, not the ticket itself.
    let (action, action_arg) = match payload.action.split_once(':') {
        Some((action, arg)) => (action, Some(arg.to_string())),
        None => (payload.action.as_str(), None),
    };

    let result = match action {
        ACTION_CREATE => {
            let custom_name = payload.values.get("name").map(String::as_str);
            return match manager.create(&workspace, &actor, custom_name).await {
                Ok(created) => Ok(ActionResponse::ok(format!(
                    "Your ticket is ready: <#{}>",
                    created.channel_id
                ))),
                Err(e) => reply_or_fail(e),
            };
        }
        ACTION_CLAIM => manager.claim(&workspace, &channel, &actor).await,
        ACTION_UNCLAIM => manager.unclaim(&workspace, &channel, &actor).await,
        ACTION_REQUEST_CLOSE => {
            let reason = payload.values.get("reason").map(String::as_str);
            manager.request_close(&workspace, &channel, &actor, reason).await
        }
        ACTION_CLOSE => {
            let Some(reason) = payload.values.get("reason").filter(|r| !r.is_empty()) else {
                return Ok(ActionResponse {
                    ok: false,
                    message: "a close reason is required".to_string(),
                    retryable: false,
                });
            };
            manager
                .close(&workspace, &channel, &actor, reason, CloseOptions::default())
                .await
        }
        ACTION_ESCALATE => manager.escalate(&workspace, &channel, &actor).await,
        ACTION_ACCEPT_ESCALATION => {
            let ticket_channel = action_arg.unwrap_or_else(|| channel.clone());
            manager
                .accept_escalation(&workspace, &ticket_channel, &actor)
                .await
        }
        ACTION_FORCE_CLOSE => {
            // Elevated capability, deliberately not the staff-role check.
            if !perms::is_ticket_admin(&actor) {
                return Ok(ActionResponse::rejected(&TicketError::PermissionDenied));
            }
            let reason = payload
                .values
                .get("reason")
                .cloned()
                .unwrap_or_else(|| "closed by an administrator".to_string());
            manager.force_close(&workspace, &channel, &actor, &reason).await
        }
        other => {
            return Err((
                StatusCode::BAD_REQUEST,
                format!("unknown action: {other}"),
            ));
        }
    };

    match result {
        Ok(()) => Ok(ActionResponse::ok("Done.")),
        Err(e) => reply_or_fail(e),
    }
}

fn reply_or_fail(err: TicketError) -> Result<ActionResponse, (StatusCode, String)> {
    match err {
        TicketError::Store(e) => {
            error!("ticket transition failed on storage: {e}");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error".to_string(),
            ))
        }
        other => Ok(ActionResponse::rejected(&other)),
    }
}

#[derive(Debug, Deserialize)]
struct AdminRequest {
    actor: ActorPayload,
    #[serde(default)]
    tickets: Value,
    #[serde(default)]
    channel_id: Option<String>,
}

/// Admin endpoint: merge the given fields into the workspace's ticket
/// configuration (records and counters cannot be overwritten here).
async fn update_ticket_config(
    State(state): State<Arc<AppState>>,
    Path(workspace_id): Path<String>,
    Json(request): Json<AdminRequest>,
) -> Result<Json<ActionResponse>, (StatusCode, String)> {
    let actor: ActorContext = request.actor.into();
    if !perms::is_ticket_admin(&actor) {
        return Ok(Json(ActionResponse::rejected(&TicketError::PermissionDenied)));
    }
    let Value::Object(fields) = request.tickets else {
        return Err((
            StatusCode::BAD_REQUEST,
            "tickets must be an object".to_string(),
        ));
    };

    let current = state
        .store
        .get(&workspace_id)
        .await
        .map_err(internal_error)?;
    let mut tickets = serde_json::to_value(&current.tickets)
        .map_err(|e| internal_error(crate::store::StoreError::Corrupt(e)))?;
    if let Value::Object(target) = &mut tickets {
        for (key, value) in fields {
            // Live state stays manager-owned.
            if matches!(key.as_str(), "byUser" | "byChannel" | "nextNumber") {
                continue;
            }
            target.insert(key, value);
        }
    }

    state
        .store
        .patch(&workspace_id, serde_json::json!({ "tickets": tickets }))
        .await
        .map_err(internal_error)?;

    Ok(Json(ActionResponse::ok("Ticket configuration updated.")))
}

async fn publish_panel(
    State(state): State<Arc<AppState>>,
    Path(workspace_id): Path<String>,
    Json(request): Json<AdminRequest>,
) -> Result<Json<ActionResponse>, (StatusCode, String)> {
    let actor: ActorContext = request.actor.into();
    if !perms::is_ticket_admin(&actor) {
        return Ok(Json(ActionResponse::rejected(&TicketError::PermissionDenied)));
    }
    let Some(channel_id) = request.channel_id else {
        return Err((StatusCode::BAD_REQUEST, "channel_id is required".to_string()));
    };

    match state.manager.publish_panel(&workspace_id, &channel_id).await {
        Ok(()) => Ok(Json(ActionResponse::ok("Panel published."))),
        Err(e) => reply_or_fail(e).map(Json),
    }
}

fn internal_error(e: crate::store::StoreError) -> (StatusCode, String) {
    error!("config store failure: {e}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal error".to_string(),
    )
}
