use std::sync::Arc;

use serde_json::json;

use modbot::fabric::memory::MemoryFabric;
use modbot::fabric::permissions;
use modbot::store::{ConfigStore, MemoryStore};
use modbot::tickets::{ActorContext, CloseOptions, TicketError, TicketManager};

const WS: &str = "g1";

fn member(id: &str) -> ActorContext {
    ActorContext {
        user_id: id.to_string(),
        display_name: id.to_string(),
        ..ActorContext::default()
    }
}

fn staff(id: &str) -> ActorContext {
    ActorContext {
        role_ids: vec!["staff".to_string()],
        ..member(id)
    }
}

fn escalation_manager(id: &str) -> ActorContext {
    ActorContext {
        role_ids: vec!["mgr".to_string()],
        ..member(id)
    }
}

async fn setup(extra: serde_json::Value) -> (Arc<TicketManager>, Arc<MemoryStore>, Arc<MemoryFabric>) {
    let store = Arc::new(MemoryStore::new());
    let fabric = Arc::new(MemoryFabric::new());

    let mut tickets = json!({
        "enabled": true,
        "categoryId": "cat",
        "staffRoleId": "staff",
        "logChannelId": "log",
    });
    if let (Some(base), Some(extra)) = (tickets.as_object_mut(), extra.as_object()) {
        for (k, v) in extra {
            base.insert(k.clone(), v.clone());
        }
    }
    store.patch(WS, json!({ "tickets": tickets })).await.unwrap();

    let manager = Arc::new(TicketManager::new(store.clone(), fabric.clone(), "bot"));
    (manager, store, fabric)
}

#[tokio::test]
async fn create_allocates_channel_record_and_index() {
    let (manager, store, fabric) = setup(json!({})).await;

    let created = manager.create(WS, &member("u1"), None).await.unwrap();
    assert_eq!(created.name, "ticket-0001");
    assert!(fabric.channel_exists(&created.channel_id));
    assert_eq!(fabric.channel_parent(&created.channel_id).as_deref(), Some("cat"));

    let tickets = store.get(WS).await.unwrap().tickets;
    let ticket = &tickets.by_channel[&created.channel_id];
    assert_eq!(ticket.opener_id, "u1");
    assert!(ticket.claimed_by.is_none());
    assert!(ticket.control_message_id.is_some());
    assert_eq!(tickets.by_user["u1"].channel_id, created.channel_id);
    assert_eq!(tickets.next_number, 2);

    // Overwrites: @everyone denied, opener/staff/bot granted.
    let overwrites = fabric.overwrites(&created.channel_id);
    let everyone = overwrites.iter().find(|ow| ow.id == WS).unwrap();
    assert_eq!(everyone.deny & permissions::VIEW_CHANNEL, permissions::VIEW_CHANNEL);
    assert!(overwrites.iter().any(|ow| ow.id == "u1" && ow.allow & permissions::SEND_MESSAGES != 0));
    assert!(overwrites.iter().any(|ow| ow.id == "staff" && ow.allow & permissions::MANAGE_MESSAGES != 0));
    assert!(overwrites.iter().any(|ow| ow.id == "bot" && ow.allow & permissions::MANAGE_CHANNELS != 0));

    // Intro control message landed in the ticket channel with buttons.
    let messages = fabric.messages(&created.channel_id);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].components, 1);
}

#[tokio::test]
async fn single_ticket_policy_rejects_a_second_create() {
    let (manager, _store, _fabric) = setup(json!({})).await;

    let first = manager.create(WS, &member("u1"), None).await.unwrap();
    let err = manager.create(WS, &member("u1"), None).await.unwrap_err();
    match err {
        TicketError::DuplicateTicket { channel_id } => assert_eq!(channel_id, first.channel_id),
        other => panic!("expected DuplicateTicket, got {other:?}"),
    }

    // A different opener is unaffected.
    manager.create(WS, &member("u2"), None).await.unwrap();
}

#[tokio::test]
async fn multiple_tickets_allowed_when_policy_permits() {
    let (manager, store, _fabric) = setup(json!({"allowMultiplePerOpener": true})).await;

    manager.create(WS, &member("u1"), None).await.unwrap();
    manager.create(WS, &member("u1"), None).await.unwrap();

    let tickets = store.get(WS).await.unwrap().tickets;
    assert_eq!(tickets.by_channel.len(), 2);
}

#[tokio::test]
async fn stale_opener_index_is_pruned_on_next_create() {
    let (manager, store, _fabric) = setup(json!({})).await;

    let created = manager.create(WS, &member("u1"), None).await.unwrap();

    // Simulate a crash that lost the record but kept the index entry.
    let mut tickets = store.get(WS).await.unwrap().tickets;
    tickets.by_channel.remove(&created.channel_id);
    store.patch(WS, json!({ "tickets": tickets })).await.unwrap();

    let again = manager.create(WS, &member("u1"), None).await.unwrap();
    let tickets = store.get(WS).await.unwrap().tickets;
    assert_eq!(tickets.by_user["u1"].channel_id, again.channel_id);
    assert_eq!(tickets.by_user.len(), 1);
}

#[tokio::test]
async fn sequential_numbers_skip_custom_names() {
    let (manager, store, _fabric) = setup(json!({"allowMultiplePerOpener": true})).await;

    let a = manager.create(WS, &member("u1"), None).await.unwrap();
    let b = manager.create(WS, &member("u2"), Some("Billing Problem")).await.unwrap();
    let c = manager.create(WS, &member("u3"), None).await.unwrap();

    assert_eq!(a.name, "ticket-0001");
    assert_eq!(b.name, "billing-problem");
    assert_eq!(c.name, "ticket-0002");

    let tickets = store.get(WS).await.unwrap().tickets;
    assert_eq!(tickets.next_number, 3);
}

#[tokio::test]
async fn requester_naming_mode_slugs_the_opener() {
    let (manager, _store, _fabric) = setup(json!({"namingMode": "requester"})).await;

    let opener = ActorContext {
        display_name: "Alice Wonder".to_string(),
        ..member("u1")
    };
    let created = manager.create(WS, &opener, None).await.unwrap();
    assert_eq!(created.name, "alice-wonder");
}

#[tokio::test]
async fn concurrent_claims_yield_one_winner() {
    let (manager, store, _fabric) = setup(json!({})).await;
    let created = manager.create(WS, &member("u1"), None).await.unwrap();

    let s1 = staff("s1");
    let s2 = staff("s2");
    let (a, b) = tokio::join!(
        manager.claim(WS, &created.channel_id, &s1),
        manager.claim(WS, &created.channel_id, &s2),
    );

    let a_ok = a.is_ok();
    let b_ok = b.is_ok();
    let wins = [a_ok, b_ok].iter().filter(|w| **w).count();
    assert_eq!(wins, 1, "exactly one claim must win");
    let loser = if a_ok { b } else { a };
    assert!(matches!(loser.unwrap_err(), TicketError::AlreadyClaimed));

    let tickets = store.get(WS).await.unwrap().tickets;
    let claimer = tickets.by_channel[&created.channel_id]
        .claimed_by
        .clone()
        .unwrap();
    let expected = if a_ok { "s1" } else { "s2" };
    assert_eq!(claimer, expected);
}

#[tokio::test]
async fn claim_then_unclaim_round_trip() {
    let (manager, store, _fabric) = setup(json!({})).await;
    let created = manager.create(WS, &member("u1"), None).await.unwrap();

    manager.claim(WS, &created.channel_id, &staff("s1")).await.unwrap();
    let err = manager.claim(WS, &created.channel_id, &staff("s2")).await.unwrap_err();
    assert!(matches!(err, TicketError::AlreadyClaimed));

    manager.unclaim(WS, &created.channel_id, &staff("s1")).await.unwrap();
    let err = manager
        .unclaim(WS, &created.channel_id, &staff("s1"))
        .await
        .unwrap_err();
    assert!(matches!(err, TicketError::NotClaimed));

    let tickets = store.get(WS).await.unwrap().tickets;
    let ticket = &tickets.by_channel[&created.channel_id];
    assert!(ticket.claimed_by.is_none());
    // The claimer stays a participant even after unclaiming.
    assert!(ticket.support_participant_ids.contains("s1"));
}

#[tokio::test]
async fn close_removes_state_notifies_and_deletes_last() {
    let (manager, store, fabric) = setup(json!({})).await;
    let created = manager.create(WS, &member("u1"), None).await.unwrap();

    fabric.user_message(&created.channel_id, "u1", "u1", "my app is broken");
    fabric.user_message(&created.channel_id, "s1", "s1", "restart it");

    manager
        .close(WS, &created.channel_id, &staff("s1"), "resolved", CloseOptions::default())
        .await
        .unwrap();

    // Record and index are gone, channel deleted.
    let tickets = store.get(WS).await.unwrap().tickets;
    assert!(tickets.by_channel.is_empty());
    assert!(tickets.by_user.is_empty());
    assert!(!fabric.channel_exists(&created.channel_id));

    // Opener got a DM with the reason and the transcript attached.
    let dms = fabric.dms();
    assert_eq!(dms.len(), 1);
    assert_eq!(dms[0].user_id, "u1");
    assert!(dms[0].content.contains("resolved"));
    let transcript = dms[0].file.as_ref().unwrap();
    let text = String::from_utf8(transcript.data.clone()).unwrap();
    assert!(text.lines().any(|l| l.contains("u1: my app is broken")));
    assert!(text.lines().any(|l| l.contains("s1: restart it")));

    // The audit channel received the closure summary with the transcript.
    let audit = fabric.messages("log");
    let summary = audit
        .iter()
        .find(|m| m.attachment_count > 0)
        .expect("closure summary with transcript");
    assert!(summary.content.contains("resolved"));
    assert!(summary.content.contains("<@s1>"));
}

#[tokio::test]
async fn closed_tickets_reject_further_transitions() {
    let (manager, _store, _fabric) = setup(json!({})).await;
    let created = manager.create(WS, &member("u1"), None).await.unwrap();
    manager
        .close(WS, &created.channel_id, &staff("s1"), "done", CloseOptions::default())
        .await
        .unwrap();

    let err = manager.claim(WS, &created.channel_id, &staff("s1")).await.unwrap_err();
    assert!(matches!(err, TicketError::TicketNotFound));
    let err = manager
        .close(WS, &created.channel_id, &staff("s1"), "again", CloseOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, TicketError::TicketNotFound));
}

#[tokio::test]
async fn close_requires_staff_unless_forced() {
    let (manager, _store, fabric) = setup(json!({})).await;
    let created = manager.create(WS, &member("u1"), None).await.unwrap();

    let err = manager
        .close(WS, &created.channel_id, &member("u1"), "nope", CloseOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, TicketError::PermissionDenied));

    // Force close bypasses the staff check and stays silent.
    manager
        .force_close(WS, &created.channel_id, &member("admin"), "spam")
        .await
        .unwrap();
    assert!(!fabric.channel_exists(&created.channel_id));
    assert!(fabric.dms().is_empty());

    let audit = fabric.messages("log");
    let summary = audit.iter().find(|m| m.attachment_count > 0).unwrap();
    assert!(summary.content.contains("force closed"));
}

#[tokio::test]
async fn close_succeeds_even_when_the_opener_blocks_dms() {
    let (manager, store, fabric) = setup(json!({})).await;
    let created = manager.create(WS, &member("u1"), None).await.unwrap();
    fabric.fail_dms();

    manager
        .close(WS, &created.channel_id, &staff("s1"), "done", CloseOptions::default())
        .await
        .unwrap();

    let tickets = store.get(WS).await.unwrap().tickets;
    assert!(tickets.by_channel.is_empty());
    assert!(!fabric.channel_exists(&created.channel_id));
}

#[tokio::test]
async fn automatic_escalation_moves_immediately() {
    let (manager, store, fabric) = setup(json!({
        "escalation": {
            "enabled": true,
            "mode": "automatic",
            "managerRoleId": "mgr",
            "escalatedCategoryId": "esc-cat",
        }
    }))
    .await;
    let created = manager.create(WS, &member("u1"), None).await.unwrap();

    manager.escalate(WS, &created.channel_id, &staff("s1")).await.unwrap();

    assert_eq!(fabric.channel_parent(&created.channel_id).as_deref(), Some("esc-cat"));
    let overwrites = fabric.overwrites(&created.channel_id);
    assert!(!overwrites.iter().any(|ow| ow.id == "staff"));
    assert!(overwrites
        .iter()
        .any(|ow| ow.id == "mgr" && ow.allow & permissions::VIEW_CHANNEL != 0));

    let tickets = store.get(WS).await.unwrap().tickets;
    let escalation = tickets.by_channel[&created.channel_id]
        .escalation
        .clone()
        .unwrap();
    assert_eq!(escalation.requested_by, "s1");
    assert!(escalation.accepted_by.is_none());

    let err = manager
        .escalate(WS, &created.channel_id, &staff("s2"))
        .await
        .unwrap_err();
    assert!(matches!(err, TicketError::DuplicateEscalation));
}

#[tokio::test]
async fn manual_escalation_waits_for_acceptance() {
    let (manager, store, fabric) = setup(json!({
        "escalation": {
            "enabled": true,
            "mode": "manual",
            "managerRoleId": "mgr",
            "escalatedCategoryId": "esc-cat",
        }
    }))
    .await;
    let created = manager.create(WS, &member("u1"), None).await.unwrap();

    manager.escalate(WS, &created.channel_id, &staff("s1")).await.unwrap();

    // No move yet; the accept control went to the audit channel instead.
    assert_eq!(fabric.channel_parent(&created.channel_id).as_deref(), Some("cat"));
    let accept = fabric
        .messages("log")
        .into_iter()
        .find(|m| m.content.contains("<@&mgr>"))
        .expect("accept control addressed to the manager role");
    assert!(accept.content.contains(&created.channel_id));

    // Plain staff cannot accept.
    let err = manager
        .accept_escalation(WS, &created.channel_id, &staff("s2"))
        .await
        .unwrap_err();
    assert!(matches!(err, TicketError::PermissionDenied));

    manager
        .accept_escalation(WS, &created.channel_id, &escalation_manager("m1"))
        .await
        .unwrap();

    assert_eq!(fabric.channel_parent(&created.channel_id).as_deref(), Some("esc-cat"));
    let tickets = store.get(WS).await.unwrap().tickets;
    let ticket = &tickets.by_channel[&created.channel_id];
    assert_eq!(
        ticket.escalation.as_ref().unwrap().accepted_by.as_deref(),
        Some("m1")
    );
    assert!(ticket.support_participant_ids.contains("m1"));

    let err = manager
        .accept_escalation(WS, &created.channel_id, &escalation_manager("m2"))
        .await
        .unwrap_err();
    assert!(matches!(err, TicketError::AlreadyAccepted));
}

#[tokio::test]
async fn escalation_disabled_always_rejects() {
    let (manager, _store, _fabric) = setup(json!({})).await;
    let created = manager.create(WS, &member("u1"), None).await.unwrap();

    for actor in [staff("s1"), ActorContext { is_admin: true, ..member("a1") }] {
        let err = manager
            .escalate(WS, &created.channel_id, &actor)
            .await
            .unwrap_err();
        assert!(matches!(err, TicketError::EscalationNotConfigured));
    }
}

#[tokio::test]
async fn participants_union_reaches_the_closure_summary() {
    let (manager, _store, fabric) = setup(json!({
        "escalation": {
            "enabled": true,
            "mode": "manual",
            "managerRoleId": "mgr",
            "escalatedCategoryId": "esc-cat",
        }
    }))
    .await;
    let created = manager.create(WS, &member("u1"), None).await.unwrap();

    manager.claim(WS, &created.channel_id, &staff("s1")).await.unwrap();
    manager.escalate(WS, &created.channel_id, &staff("s2")).await.unwrap();
    manager
        .accept_escalation(WS, &created.channel_id, &escalation_manager("m1"))
        .await
        .unwrap();
    manager
        .close(WS, &created.channel_id, &staff("s3"), "done", CloseOptions::default())
        .await
        .unwrap();

    let audit = fabric.messages("log");
    let summary = audit.iter().find(|m| m.attachment_count > 0).unwrap();
    for participant in ["<@s1>", "<@s2>", "<@m1>", "<@s3>"] {
        assert!(
            summary.content.contains(participant),
            "summary missing {participant}: {}",
            summary.content
        );
    }
}

#[tokio::test]
async fn request_close_pings_staff_without_closing() {
    let (manager, store, fabric) = setup(json!({})).await;
    let created = manager.create(WS, &member("u1"), None).await.unwrap();

    manager
        .request_close(WS, &created.channel_id, &member("u1"), Some("fixed it myself"))
        .await
        .unwrap();

    // Still open.
    let tickets = store.get(WS).await.unwrap().tickets;
    assert!(tickets.by_channel.contains_key(&created.channel_id));
    assert!(fabric.channel_exists(&created.channel_id));

    let notice = fabric
        .messages(&created.channel_id)
        .into_iter()
        .find(|m| m.content.contains("<@&staff>"))
        .expect("staff ping notice");
    assert!(notice.content.contains("fixed it myself"));
}
