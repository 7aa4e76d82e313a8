//! Command surface flows: authentication, settings, whitelist, status.

mod common;

use common::{at, harness, test_tokens};

use slotguard::bot;
use slotguard::db;
use slotguard::models::{ReviewStatus, UserStatus};
use slotguard::services::reconciler::run_tick_at;
use slotguard::services::telegram::{ChatRef, IncomingMessage, Sender, Update};

fn text_update(chat_id: i64, text: &str) -> Update {
    Update {
        update_id: 1,
        message: Some(IncomingMessage {
            message_id: 10,
            from: Some(Sender { id: chat_id }),
            chat: ChatRef { id: chat_id },
            text: Some(text.to_string()),
        }),
        callback_query: None,
    }
}

async fn send(h: &common::Harness, chat_id: i64, text: &str) {
    bot::handle_update(&h.services, &text_update(chat_id, text))
        .await
        .unwrap();
}

#[tokio::test]
async fn start_prompts_for_credentials() {
    let h = harness().await;

    send(&h, 100, "/start").await;

    let reply = h.chat.last_plain_text();
    assert!(reply.contains("login:password"));
}

#[tokio::test]
async fn credential_exchange_registers_the_reviewer() {
    let h = harness().await;
    h.school.state.lock().unwrap().auth_result = Some(test_tokens());

    send(&h, 100, "alice:secret").await;

    assert!(h.chat.last_plain_text().contains("Successfully authenticated as alice"));

    let user = db::users::get_user_by_chat_id(&h.services.pool, 100)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user.reviewer_login, "alice");
    assert!(user.is_active());

    let settings = db::settings::get_settings(&h.services.pool, "alice")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(settings.response_deadline_shift_minutes, 20);

    let document = h.store.document();
    assert_eq!(document.users.get("alice"), Some(&test_tokens()));
    assert_eq!(document.version, 1);
}

#[tokio::test]
async fn bad_credentials_are_rejected() {
    let h = harness().await;
    // auth_result stays None: the stub rejects every login.

    send(&h, 100, "alice:wrong").await;

    assert!(h.chat.last_plain_text().contains("Authentication failed"));
    assert!(db::users::get_user_by_chat_id(&h.services.pool, 100)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn active_reviewer_cannot_reauthenticate_without_logout() {
    let h = harness().await;
    h.seed_reviewer("alice", 100).await;

    send(&h, 100, "alice:secret").await;

    assert!(h.chat.last_plain_text().contains("already authenticated as alice"));
}

#[tokio::test]
async fn start_welcomes_back_an_active_reviewer() {
    let h = harness().await;
    h.seed_reviewer("alice", 100).await;

    send(&h, 100, "/start").await;

    assert!(h.chat.last_plain_text().contains("Welcome back, alice"));
}

#[tokio::test]
async fn logout_drops_tokens_and_deactivates() {
    let h = harness().await;
    h.seed_reviewer("alice", 100).await;

    send(&h, 100, "/logout").await;

    let user = db::users::get_user_by_login(&h.services.pool, "alice")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user.status, UserStatus::Inactive.as_str());
    assert!(h.store.document().users.is_empty());

    // The reconciler no longer visits the reviewer.
    let summary = run_tick_at(&h.services, at(12, 0)).await.unwrap();
    assert_eq!(summary.reviewers, 0);
}

#[tokio::test]
async fn commands_require_authentication() {
    let h = harness().await;

    for command in ["/status", "/settings", "/whitelist", "/set_cancel_delay 5"] {
        send(&h, 100, command).await;
        assert!(
            h.chat.last_plain_text().contains("/start"),
            "{} should ask for authentication",
            command
        );
    }
}

#[tokio::test]
async fn settings_are_rendered_and_updated() {
    let h = harness().await;
    h.seed_reviewer("alice", 100).await;

    send(&h, 100, "/settings").await;
    let rendered = h.chat.last_plain_text();
    assert!(rendered.contains("Response Deadline Shift: 20 minutes"));
    assert!(rendered.contains("Cleanup Duration: 15 minutes"));
    assert!(rendered.contains("Notify Whitelist Timeout: Yes"));

    send(&h, 100, "/set_cancel_delay 7").await;
    assert!(h.chat.last_plain_text().contains("updated to 7"));

    send(&h, 100, "/set_cleanup_duration 45").await;
    send(&h, 100, "/set_notify_whitelist_timeout false").await;

    let settings = db::settings::get_settings(&h.services.pool, "alice")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(settings.non_whitelist_cancel_delay_minutes, 7);
    assert_eq!(settings.cleanup_durations_minutes, 45);
    assert!(!settings.notify_whitelist_timeout);
}

#[tokio::test]
async fn out_of_range_settings_report_the_allowed_set() {
    let h = harness().await;
    h.seed_reviewer("alice", 100).await;

    send(&h, 100, "/set_cancel_delay 11").await;
    assert!(h.chat.last_plain_text().contains("1 - 10"));

    send(&h, 100, "/set_cleanup_duration 20").await;
    assert!(h.chat.last_plain_text().contains("15, 30, 45, 60"));

    send(&h, 100, "/set_slot_shift_threshold 27").await;
    assert!(h.chat.last_plain_text().contains("5 - 60 (step 5)"));

    send(&h, 100, "/set_deadline_shift soon").await;
    assert!(h.chat.last_plain_text().contains("1 - 60"));

    // Nothing was written.
    let settings = db::settings::get_settings(&h.services.pool, "alice")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(settings.non_whitelist_cancel_delay_minutes, 5);
    assert_eq!(settings.cleanup_durations_minutes, 15);
    assert_eq!(settings.slot_shift_threshold_minutes, 25);
}

#[tokio::test]
async fn whitelist_lifecycle() {
    let h = harness().await;
    h.seed_reviewer("alice", 100).await;

    send(&h, 100, "/whitelist").await;
    assert!(h.chat.last_plain_text().contains("empty"));

    send(&h, 100, "/whitelist_add family C - I").await;
    assert!(h.chat.last_plain_text().contains("Added C - I"));

    send(&h, 100, "/whitelist_add project go-concurrency").await;
    send(&h, 100, "/whitelist").await;
    let listing = h.chat.last_plain_text();
    assert!(listing.contains("Families"));
    assert!(listing.contains("C - I"));
    assert!(listing.contains("Projects"));
    assert!(listing.contains("go-concurrency"));

    send(&h, 100, "/whitelist_remove C - I").await;
    assert!(h.chat.last_plain_text().contains("Removed C - I"));

    send(&h, 100, "/whitelist_remove C - I").await;
    assert!(h.chat.last_plain_text().contains("not in your whitelist"));

    send(&h, 100, "/whitelist_add group something").await;
    assert!(h.chat.last_plain_text().contains("'family' or 'project'"));
}

#[tokio::test]
async fn status_lists_open_reviews() {
    let h = harness().await;
    h.seed_reviewer("alice", 100).await;

    h.school.add_booking("s1", "n1", at(14, 0), at(16, 0));
    h.school.add_notification("n1", "Review booked for `libft`");
    h.school.set_graph(&[("C - I", "libft")]);

    run_tick_at(&h.services, at(9, 0)).await.unwrap();
    run_tick_at(&h.services, at(9, 5)).await.unwrap();

    send(&h, 100, "/status").await;
    let status = h.chat.last_plain_text();
    assert!(status.contains("User: alice"));
    assert!(status.contains("Active Reviews: 1"));
    assert!(status.contains("libft"));

    // Terminal reviews drop out of the count.
    let (review_id, _) = h.review_status("s1").await;
    db::reviews::transition_status(
        &h.services.pool,
        &review_id,
        ReviewStatus::KnownProjectReview,
        ReviewStatus::AutoCancelled,
        Some(slotguard::timeutil::to_unix_seconds(at(10, 0))),
    )
    .await
    .unwrap();

    send(&h, 100, "/status").await;
    assert!(h.chat.last_plain_text().contains("Active Reviews: 0"));
}

#[tokio::test]
async fn unknown_command_points_to_help() {
    let h = harness().await;
    h.seed_reviewer("alice", 100).await;

    send(&h, 100, "/frobnicate").await;
    assert!(h.chat.last_plain_text().contains("Unknown command: frobnicate"));
    assert!(h.chat.last_plain_text().contains("/help"));

    send(&h, 100, "/help").await;
    let help = h.chat.last_plain_text();
    assert!(help.contains("/logout"));
    assert!(help.contains("whitelist"));
}
