//! Reconciliation driver.
//!
//! One tick loads every active reviewer, advances each of their in-flight
//! reviews through the state machine, and ingests newly observed bookings.
//! The intent interpreter lives here too and is shared with the callback
//! handler: it executes side effects and commits transitions through
//! conditional updates, so a concurrent tick and callback cannot both
//! settle the same review.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::db::pool::DbPool;
use crate::db::{families, reviews, settings as settings_db, users, whitelist};
use crate::error::AppError;
use crate::models::{ReviewRequest, ReviewStatus, User, UserSettings, INTERMEDIATE_STATUSES};
use crate::services::school::SchoolApi;
use crate::services::state_machine::{
    step, FieldWrites, Intent, ResolvedProject, SlotWindow, Step, StepInputs,
};
use crate::services::telegram::ChatApi;
use crate::services::vault::{SecretStore, TokenBundle, TokenVault};
use crate::timeutil;

/// How far back the calendar query reaches, to catch slots already underway.
const CALENDAR_LOOKBACK_HOURS: i64 = 2;

/// How far ahead the calendar query reaches.
const CALENDAR_LOOKAHEAD_HOURS: i64 = 24;

/// Notification page requested when resolving a project name.
const NOTIFICATION_FETCH_LIMIT: u32 = 100;

/// Everything a driver or handler needs to act: store, adapters, vault.
///
/// Tests inject stubs for the adapter type parameters.
pub struct Services<S, C, V> {
    pub pool: DbPool,
    pub school: S,
    pub chat: C,
    pub vault: TokenVault<V>,
}

impl<S: Clone, C: Clone, V: Clone> Clone for Services<S, C, V> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            school: self.school.clone(),
            chat: self.chat.clone(),
            vault: self.vault.clone(),
        }
    }
}

/// Counters reported after one tick.
#[derive(Debug, Default)]
pub struct TickSummary {
    /// Active reviewers visited.
    pub reviewers: usize,

    /// Reviews that were stepped (whether or not they transitioned).
    pub reviews_stepped: usize,

    /// New bookings turned into review requests.
    pub bookings_ingested: usize,

    /// Failures logged and left for the next tick.
    pub errors: usize,
}

/// Run one reconciliation pass over all active reviewers.
///
/// A failing reviewer never affects the others; the tick itself only fails
/// when the reviewer list cannot be loaded at all.
pub async fn run_tick<S, C, V>(services: &Services<S, C, V>) -> Result<TickSummary, AppError>
where
    S: SchoolApi,
    C: ChatApi,
    V: SecretStore,
{
    run_tick_at(services, timeutil::now_utc()).await
}

/// Run one reconciliation pass against an explicit clock reading.
///
/// Exists so tests can pin the tick time; production always goes through
/// [`run_tick`].
pub async fn run_tick_at<S, C, V>(
    services: &Services<S, C, V>,
    now: DateTime<Utc>,
) -> Result<TickSummary, AppError>
where
    S: SchoolApi,
    C: ChatApi,
    V: SecretStore,
{
    let mut summary = TickSummary::default();

    let active = users::get_active_users(&services.pool).await?;
    tracing::info!(reviewers = active.len(), "tick started");

    for user in &active {
        summary.reviewers += 1;
        if let Err(error) = process_reviewer(services, user, now, &mut summary).await {
            summary.errors += 1;
            tracing::warn!(
                login = %user.reviewer_login,
                %error,
                "reviewer skipped this tick"
            );
        }
    }

    tracing::info!(
        reviewers = summary.reviewers,
        stepped = summary.reviews_stepped,
        ingested = summary.bookings_ingested,
        errors = summary.errors,
        "tick finished"
    );

    Ok(summary)
}

/// All per-reviewer work: existing reviews first, then new bookings.
async fn process_reviewer<S, C, V>(
    services: &Services<S, C, V>,
    user: &User,
    now: DateTime<Utc>,
    summary: &mut TickSummary,
) -> Result<(), AppError>
where
    S: SchoolApi,
    C: ChatApi,
    V: SecretStore,
{
    let login = &user.reviewer_login;

    let settings = settings_db::get_settings(&services.pool, login)
        .await?
        .ok_or_else(|| AppError::state(format!("settings missing for reviewer {}", login)))?;

    let tokens = services.vault.get_user_tokens(login).await?;

    let open = reviews::list_by_login_and_status(&services.pool, login, &INTERMEDIATE_STATUSES)
        .await?;
    tracing::debug!(login = %login, open = open.len(), "processing reviews");

    for review in &open {
        summary.reviews_stepped += 1;
        if let Err(error) = process_review(services, user, &settings, &tokens, review, now).await {
            summary.errors += 1;
            if error.is_transient() {
                tracing::debug!(review_id = %review.id, %error, "review left for next tick");
            } else {
                tracing::warn!(review_id = %review.id, %error, "review failed");
            }
        }
    }

    match ingest_bookings(services, user, &tokens, now).await {
        Ok(created) => summary.bookings_ingested += created,
        Err(error) => {
            summary.errors += 1;
            tracing::warn!(login = %login, %error, "booking ingest failed");
        }
    }

    Ok(())
}

/// Resolve the facts the review's current state needs, step the machine,
/// and apply the result.
async fn process_review<S, C, V>(
    services: &Services<S, C, V>,
    user: &User,
    settings: &UserSettings,
    tokens: &TokenBundle,
    review: &ReviewRequest,
    now: DateTime<Utc>,
) -> Result<(), AppError>
where
    S: SchoolApi,
    C: ChatApi,
    V: SecretStore,
{
    let mut inputs = resolve_inputs(services, settings, tokens, review, now).await?;
    let mut plan = step(review, settings, &inputs)?;

    if plan
        .intents
        .iter()
        .any(|intent| matches!(intent, Intent::RefreshFamilyIndex { .. }))
    {
        // Lazy family index load: refetch the whole graph, then retry the
        // lookup and the step within the same tick.
        refresh_family_index(services, tokens, &user.reviewer_login).await?;

        let project_name = inputs
            .project
            .as_ref()
            .map(|p| p.project_name.clone())
            .unwrap_or_default();
        let family = families::family_for_project(&services.pool, &project_name).await?;
        let Some(family_label) = family else {
            return Err(AppError::ProjectUnknown { project_name });
        };

        inputs.project = Some(ResolvedProject {
            project_name,
            family_label: Some(family_label),
        });
        plan = step(review, settings, &inputs)?;
    }

    let committed = apply_step(services, user, tokens, review, &plan, now, None).await?;
    if committed {
        if let Some(next) = plan.next {
            tracing::info!(
                review_id = %review.id,
                from = %review.status,
                to = %next,
                "review transitioned"
            );
        }
    }

    Ok(())
}

/// Gather state-specific inputs for one step.
async fn resolve_inputs<S, C, V>(
    services: &Services<S, C, V>,
    settings: &UserSettings,
    tokens: &TokenBundle,
    review: &ReviewRequest,
    now: DateTime<Utc>,
) -> Result<StepInputs, AppError>
where
    S: SchoolApi,
    C: ChatApi,
    V: SecretStore,
{
    let mut inputs = StepInputs {
        now,
        ..Default::default()
    };

    match review.status_enum()? {
        ReviewStatus::UnknownProjectReview => {
            inputs.project = Some(resolve_project(services, tokens, review).await?);
        }
        ReviewStatus::KnownProjectReview => {
            let project_name = review.project_name.as_deref().ok_or_else(|| {
                AppError::state(format!("project_name missing for review {}", review.id))
            })?;
            let family_label = review.family_label.as_deref().unwrap_or_default();

            inputs.whitelisted = Some(
                whitelist::is_whitelisted(
                    &services.pool,
                    &review.reviewer_login,
                    project_name,
                    family_label,
                )
                .await?,
            );
        }
        ReviewStatus::Whitelisted => {
            let review_start = timeutil::from_unix_seconds(review.review_start_time);
            if timeutil::within_shift_threshold(
                review_start,
                now,
                settings.slot_shift_threshold_minutes,
            ) {
                inputs.slot = find_slot(services, tokens, &review.calendar_slot_id, now).await?;
            }
        }
        _ => {}
    }

    Ok(inputs)
}

/// Resolve the project a review's notification announced.
async fn resolve_project<S, C, V>(
    services: &Services<S, C, V>,
    tokens: &TokenBundle,
    review: &ReviewRequest,
) -> Result<ResolvedProject, AppError>
where
    S: SchoolApi,
    C: ChatApi,
    V: SecretStore,
{
    let notification_id = review.notification_id.as_deref().ok_or_else(|| {
        AppError::state(format!("notification_id missing for review {}", review.id))
    })?;

    let notifications = services
        .school
        .get_notifications(tokens, 0, NOTIFICATION_FETCH_LIMIT)
        .await?;

    let notification = notifications
        .iter()
        .find(|n| n.id == notification_id)
        .ok_or_else(|| AppError::NotificationMissing {
            notification_id: notification_id.to_string(),
        })?;

    let project_name = crate::services::school::extract_project_name(&notification.message)
        .ok_or_else(|| AppError::ProjectUnknown {
            project_name: notification.message.clone(),
        })?;

    let family_label = families::family_for_project(&services.pool, &project_name).await?;

    Ok(ResolvedProject {
        project_name,
        family_label,
    })
}

/// Refetch the whole project graph and write it through.
async fn refresh_family_index<S, C, V>(
    services: &Services<S, C, V>,
    tokens: &TokenBundle,
    login: &str,
) -> Result<(), AppError>
where
    S: SchoolApi,
    C: ChatApi,
    V: SecretStore,
{
    let graph = services.school.get_project_graph(tokens, login).await?;
    let pairs: Vec<(String, String)> = graph
        .into_iter()
        .map(|edge| (edge.family_label, edge.project_name))
        .collect();

    tracing::debug!(login = %login, projects = pairs.len(), "family index refreshed");
    families::upsert_families(&services.pool, &pairs).await
}

/// Current calendar window of one slot, if the calendar still carries it.
async fn find_slot<S, C, V>(
    services: &Services<S, C, V>,
    tokens: &TokenBundle,
    slot_id: &str,
    now: DateTime<Utc>,
) -> Result<Option<SlotWindow>, AppError>
where
    S: SchoolApi,
    C: ChatApi,
    V: SecretStore,
{
    let from = now - Duration::hours(CALENDAR_LOOKBACK_HOURS);
    let to = now + Duration::hours(CALENDAR_LOOKAHEAD_HOURS);

    let bookings = services.school.get_calendar_events(tokens, from, to).await?;

    Ok(bookings
        .iter()
        .find(|booking| booking.slot_id == slot_id)
        .map(|booking| SlotWindow {
            start: booking.start,
            end: booking.end,
        }))
}

/// Turn unseen calendar bookings into fresh review requests.
async fn ingest_bookings<S, C, V>(
    services: &Services<S, C, V>,
    user: &User,
    tokens: &TokenBundle,
    now: DateTime<Utc>,
) -> Result<usize, AppError>
where
    S: SchoolApi,
    C: ChatApi,
    V: SecretStore,
{
    let from = now - Duration::hours(CALENDAR_LOOKBACK_HOURS);
    let to = now + Duration::hours(CALENDAR_LOOKAHEAD_HOURS);

    let bookings = services.school.get_calendar_events(tokens, from, to).await?;
    let mut created = 0;

    for booking in &bookings {
        if reviews::get_by_slot_id(&services.pool, &booking.slot_id)
            .await?
            .is_some()
        {
            continue;
        }

        let review = ReviewRequest {
            id: Uuid::new_v4().to_string(),
            reviewer_login: user.reviewer_login.clone(),
            notification_id: Some(booking.booking_id.clone()),
            project_name: None,
            family_label: None,
            review_start_time: timeutil::to_unix_seconds(booking.start),
            calendar_slot_id: booking.slot_id.clone(),
            decision_deadline: None,
            non_whitelist_cancel_at: None,
            telegram_message_id: None,
            status: ReviewStatus::UnknownProjectReview.as_str().to_string(),
            created_at: timeutil::to_unix_seconds(now),
            decided_at: None,
        };

        match reviews::create_review(&services.pool, &review).await {
            Ok(()) => {
                created += 1;
                tracing::info!(
                    review_id = %review.id,
                    slot_id = %booking.slot_id,
                    "new booking ingested"
                );
            }
            Err(error) => {
                tracing::warn!(slot_id = %booking.slot_id, %error, "failed to ingest booking");
            }
        }
    }

    Ok(created)
}

/// Execute a step's intents and commit its transition.
///
/// Returns whether the transition committed. Two ordering regimes:
///
/// * Callback-driven terminal transitions commit **first**; a repeated
///   button press finds the review settled and only gets an acknowledgement,
///   never a second slot mutation or message edit.
/// * Everything else runs effects first. `SendPrompt` gates its transition
///   on success; a failed `ChangeSlot` downgrades the outcome to cancel and
///   `AUTO_CANCELLED`; cancel, edit, ack and notify failures are logged and
///   do not block.
pub async fn apply_step<S, C, V>(
    services: &Services<S, C, V>,
    user: &User,
    tokens: &TokenBundle,
    review: &ReviewRequest,
    plan: &Step,
    now: DateTime<Utc>,
    callback_id: Option<&str>,
) -> Result<bool, AppError>
where
    S: SchoolApi,
    C: ChatApi,
    V: SecretStore,
{
    let current = review.status_enum()?;

    let decision_terminal = match (callback_id, plan.next) {
        (Some(_), Some(next)) if next.is_terminal() => Some(next),
        _ => None,
    };

    if let Some(next) = decision_terminal {
        let committed = reviews::transition_status(
            &services.pool,
            &review.id,
            current,
            next,
            Some(timeutil::to_unix_seconds(now)),
        )
        .await?;

        if !committed {
            // Lost the race against a tick or a double click.
            if let Some(callback_id) = callback_id {
                if let Err(error) = services
                    .chat
                    .answer_callback(callback_id, "Review already decided", false)
                    .await
                {
                    tracing::warn!(review_id = %review.id, %error, "callback answer failed");
                }
            }
            return Ok(false);
        }

        run_intents(services, user, tokens, review, &plan.intents, callback_id).await;
        return Ok(true);
    }

    let mut message_id = None;
    let mut effective_next = plan.next;

    for intent in &plan.intents {
        match intent {
            Intent::SendPrompt {
                text,
                approve_payload,
                decline_payload,
            } => {
                match services
                    .chat
                    .send_two_button_keyboard(
                        user.telegram_chat_id,
                        text,
                        "✅ Approve",
                        approve_payload,
                        "❌ Decline",
                        decline_payload,
                    )
                    .await
                {
                    Ok(id) => message_id = Some(id),
                    Err(error) => {
                        // Stay in NEED_TO_APPROVE; the next tick retries.
                        tracing::warn!(review_id = %review.id, %error, "prompt send failed");
                        return Ok(false);
                    }
                }
            }
            Intent::ChangeSlot {
                slot_id,
                new_start,
                new_end,
            } => {
                if let Err(error) = services
                    .school
                    .change_slot(tokens, slot_id, *new_start, *new_end)
                    .await
                {
                    tracing::warn!(review_id = %review.id, %error, "slot shift failed, cancelling");
                    if let Err(error) = services.school.cancel_slot(tokens, slot_id).await {
                        tracing::warn!(review_id = %review.id, %error, "slot cancel failed");
                    }
                    effective_next = Some(ReviewStatus::AutoCancelled);
                } else {
                    tracing::info!(
                        review_id = %review.id,
                        new_start = %timeutil::format_short(*new_start),
                        "slot shifted"
                    );
                }
            }
            other => {
                run_intent(services, user, tokens, review, other, callback_id).await;
            }
        }
    }

    commit(services, review, current, effective_next, &plan.intents, message_id, now).await
}

/// Execute the non-gating intents of a committed plan.
async fn run_intents<S, C, V>(
    services: &Services<S, C, V>,
    user: &User,
    tokens: &TokenBundle,
    review: &ReviewRequest,
    intents: &[Intent],
    callback_id: Option<&str>,
) where
    S: SchoolApi,
    C: ChatApi,
    V: SecretStore,
{
    for intent in intents {
        run_intent(services, user, tokens, review, intent, callback_id).await;
    }
}

/// Execute one non-gating intent; failures are logged, never propagated.
async fn run_intent<S, C, V>(
    services: &Services<S, C, V>,
    user: &User,
    tokens: &TokenBundle,
    review: &ReviewRequest,
    intent: &Intent,
    callback_id: Option<&str>,
) where
    S: SchoolApi,
    C: ChatApi,
    V: SecretStore,
{
    match intent {
        Intent::CancelSlot { slot_id } => {
            if let Err(error) = services.school.cancel_slot(tokens, slot_id).await {
                tracing::warn!(review_id = %review.id, %error, "slot cancel failed");
            }
        }
        Intent::EditPrompt { text } => {
            let Some(message_id) = review
                .telegram_message_id
                .as_deref()
                .and_then(|id| id.parse::<i64>().ok())
            else {
                tracing::warn!(review_id = %review.id, "no prompt message to edit");
                return;
            };
            if let Err(error) = services
                .chat
                .edit_message(user.telegram_chat_id, message_id, text)
                .await
            {
                tracing::warn!(review_id = %review.id, %error, "prompt edit failed");
            }
        }
        Intent::AckCallback { text } => {
            if let Some(callback_id) = callback_id {
                if let Err(error) = services.chat.answer_callback(callback_id, text, false).await {
                    tracing::warn!(review_id = %review.id, %error, "callback answer failed");
                }
            }
        }
        Intent::NotifyTimeout { text } | Intent::NotifyNonWhitelistCancel { text } => {
            if let Err(error) = services
                .chat
                .send_plain_message(user.telegram_chat_id, text)
                .await
            {
                tracing::warn!(review_id = %review.id, %error, "notification send failed");
            }
        }
        Intent::StoreFields(_) => {
            // Persisted by the commit below, not here.
        }
        Intent::RefreshFamilyIndex { .. } => {
            // Handled by the driver before the step is applied.
            tracing::warn!(review_id = %review.id, "unexpected RefreshFamilyIndex at apply time");
        }
        Intent::SendPrompt { .. } | Intent::ChangeSlot { .. } => {
            tracing::warn!(review_id = %review.id, "gating intent reached non-gating executor");
        }
    }
}

/// Commit the transition with the conditional update matching its shape.
async fn commit<S, C, V>(
    services: &Services<S, C, V>,
    review: &ReviewRequest,
    current: ReviewStatus,
    next: Option<ReviewStatus>,
    intents: &[Intent],
    message_id: Option<i64>,
    now: DateTime<Utc>,
) -> Result<bool, AppError>
where
    S: SchoolApi,
    C: ChatApi,
    V: SecretStore,
{
    let Some(next) = next else {
        return Ok(false);
    };

    let writes: Vec<&FieldWrites> = intents
        .iter()
        .filter_map(|intent| match intent {
            Intent::StoreFields(writes) => Some(writes),
            _ => None,
        })
        .collect();

    let committed = match next {
        ReviewStatus::KnownProjectReview => {
            let Some(FieldWrites::ProjectInfo {
                project_name,
                family_label,
            }) = writes.first()
            else {
                return Err(AppError::state(format!(
                    "project info missing when committing review {}",
                    review.id
                )));
            };
            reviews::set_project_info(&services.pool, &review.id, project_name, family_label)
                .await?
        }
        ReviewStatus::NotWhitelisted => {
            let Some(FieldWrites::NonWhitelistCancelAt(cancel_at)) = writes.first() else {
                return Err(AppError::state(format!(
                    "cancel time missing when committing review {}",
                    review.id
                )));
            };
            reviews::transition_to_not_whitelisted(
                &services.pool,
                &review.id,
                timeutil::to_unix_seconds(*cancel_at),
            )
            .await?
        }
        ReviewStatus::WaitingForApprove => {
            let Some(FieldWrites::DecisionDeadline(deadline)) = writes.first() else {
                return Err(AppError::state(format!(
                    "deadline missing when committing review {}",
                    review.id
                )));
            };
            let message_id = message_id.ok_or_else(|| {
                AppError::state(format!(
                    "prompt message id missing when committing review {}",
                    review.id
                ))
            })?;
            reviews::transition_to_waiting(
                &services.pool,
                &review.id,
                timeutil::to_unix_seconds(*deadline),
                &message_id.to_string(),
            )
            .await?
        }
        next => {
            let decided_at = next
                .is_terminal()
                .then(|| timeutil::to_unix_seconds(now));
            reviews::transition_status(&services.pool, &review.id, current, next, decided_at)
                .await?
        }
    };

    if !committed {
        tracing::debug!(
            review_id = %review.id,
            from = %current,
            to = %next,
            "transition lost a concurrent race"
        );
    }

    Ok(committed)
}
