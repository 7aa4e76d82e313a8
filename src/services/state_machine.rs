//! Review state machine.
//!
//! `step` is a pure transition function: given a review record, the
//! reviewer's settings, and the facts the driver resolved for the current
//! state, it returns the next status and an ordered list of side-effect
//! intents. It performs no I/O; the reconciler and the callback handler
//! interpret the intents and commit the transition.

use chrono::{DateTime, Utc};

use crate::error::AppError;
use crate::models::{Decision, ReviewRequest, ReviewStatus, UserSettings};
use crate::services::telegram::format_callback_data;
use crate::timeutil;

/// Project identity resolved from the notification feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedProject {
    pub project_name: String,

    /// `None` when the family index does not know the project yet.
    pub family_label: Option<String>,
}

/// Current calendar window of the slot a review occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Facts the driver feeds into one step.
///
/// Each field is only read by the state that needs it; the driver resolves
/// exactly what the review's current state requires.
#[derive(Debug, Clone, Default)]
pub struct StepInputs {
    pub now: DateTime<Utc>,

    /// Reviewer decision, present only on callback-driven invocations.
    pub decision: Option<Decision>,

    /// For `UNKNOWN_PROJECT_REVIEW`.
    pub project: Option<ResolvedProject>,

    /// For `KNOWN_PROJECT_REVIEW`.
    pub whitelisted: Option<bool>,

    /// For `WHITELISTED` once the slot is close enough to act on.
    pub slot: Option<SlotWindow>,
}

/// Field writes that ride along with a status transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldWrites {
    ProjectInfo {
        project_name: String,
        family_label: String,
    },
    NonWhitelistCancelAt(DateTime<Utc>),
    DecisionDeadline(DateTime<Utc>),
}

/// Side-effect intents, interpreted by the drivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    CancelSlot {
        slot_id: String,
    },
    ChangeSlot {
        slot_id: String,
        new_start: DateTime<Utc>,
        new_end: DateTime<Utc>,
    },
    SendPrompt {
        text: String,
        approve_payload: String,
        decline_payload: String,
    },
    EditPrompt {
        text: String,
    },
    AckCallback {
        text: String,
    },
    NotifyTimeout {
        text: String,
    },
    NotifyNonWhitelistCancel {
        text: String,
    },
    RefreshFamilyIndex {
        login: String,
    },
    StoreFields(FieldWrites),
}

/// Outcome of one step: intents to run and, possibly, a status to commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Step {
    pub intents: Vec<Intent>,

    /// `None` means stay in the current state and retry next tick.
    pub next: Option<ReviewStatus>,
}

impl Step {
    fn stay() -> Self {
        Self::default()
    }
}

/// Advance a review by one step.
pub fn step(
    review: &ReviewRequest,
    settings: &UserSettings,
    inputs: &StepInputs,
) -> Result<Step, AppError> {
    let status = review.status_enum()?;

    if status.is_terminal() {
        // Sinks: a late callback just gets told the review is settled.
        if inputs.decision.is_some() {
            return Ok(Step {
                intents: vec![Intent::AckCallback {
                    text: "Review already decided".to_string(),
                }],
                next: None,
            });
        }
        return Ok(Step::stay());
    }

    match status {
        ReviewStatus::UnknownProjectReview => step_unknown_project(review, inputs),
        ReviewStatus::KnownProjectReview => step_known_project(review, settings, inputs),
        ReviewStatus::Whitelisted => step_whitelisted(review, settings, inputs),
        ReviewStatus::NotWhitelisted => step_not_whitelisted(review, settings, inputs),
        ReviewStatus::NeedToApprove => step_need_to_approve(review, settings),
        ReviewStatus::WaitingForApprove => step_waiting_for_approve(review, settings, inputs),
        _ => unreachable!("terminal states handled above"),
    }
}

fn step_unknown_project(review: &ReviewRequest, inputs: &StepInputs) -> Result<Step, AppError> {
    let Some(project) = &inputs.project else {
        // Notification not resolved yet; retried next tick.
        return Ok(Step::stay());
    };

    match &project.family_label {
        Some(family_label) => Ok(Step {
            intents: vec![Intent::StoreFields(FieldWrites::ProjectInfo {
                project_name: project.project_name.clone(),
                family_label: family_label.clone(),
            })],
            next: Some(ReviewStatus::KnownProjectReview),
        }),
        None => Ok(Step {
            intents: vec![Intent::RefreshFamilyIndex {
                login: review.reviewer_login.clone(),
            }],
            next: None,
        }),
    }
}

fn step_known_project(
    review: &ReviewRequest,
    settings: &UserSettings,
    inputs: &StepInputs,
) -> Result<Step, AppError> {
    let whitelisted = inputs.whitelisted.ok_or_else(|| {
        AppError::state(format!("whitelist fact missing for review {}", review.id))
    })?;

    let review_start = timeutil::from_unix_seconds(review.review_start_time);
    let deadline =
        timeutil::decision_deadline(review_start, settings.response_deadline_shift_minutes);

    // Deadline wins over the whitelist: when the slot is already close, the
    // reviewer is asked instead of silently approved.
    let must_ask_now = inputs.now >= deadline
        || timeutil::within_shift_threshold(
            review_start,
            inputs.now,
            settings.slot_shift_threshold_minutes,
        );

    if must_ask_now {
        return Ok(Step {
            intents: Vec::new(),
            next: Some(ReviewStatus::NeedToApprove),
        });
    }

    if whitelisted {
        Ok(Step {
            intents: Vec::new(),
            next: Some(ReviewStatus::Whitelisted),
        })
    } else {
        let cancel_at = timeutil::non_whitelist_cancel_at(
            inputs.now,
            settings.non_whitelist_cancel_delay_minutes,
        );
        Ok(Step {
            intents: vec![Intent::StoreFields(FieldWrites::NonWhitelistCancelAt(
                cancel_at,
            ))],
            next: Some(ReviewStatus::NotWhitelisted),
        })
    }
}

fn step_whitelisted(
    review: &ReviewRequest,
    settings: &UserSettings,
    inputs: &StepInputs,
) -> Result<Step, AppError> {
    let review_start = timeutil::from_unix_seconds(review.review_start_time);

    if !timeutil::within_shift_threshold(
        review_start,
        inputs.now,
        settings.slot_shift_threshold_minutes,
    ) {
        return Ok(Step::stay());
    }

    let slot = inputs.slot.ok_or_else(|| AppError::BookingStale {
        slot_id: review.calendar_slot_id.clone(),
    })?;

    let length = timeutil::slot_duration_minutes(slot.start, slot.end);

    if length <= settings.cleanup_durations_minutes {
        // Too short to be worth keeping once shifted.
        return Ok(Step {
            intents: vec![Intent::CancelSlot {
                slot_id: review.calendar_slot_id.clone(),
            }],
            next: Some(ReviewStatus::AutoCancelled),
        });
    }

    let new_start = timeutil::subtract_minutes(review_start, settings.slot_shift_duration_minutes);
    if slot.start == new_start {
        // Already shifted on an earlier tick.
        return Ok(Step::stay());
    }

    Ok(Step {
        intents: vec![Intent::ChangeSlot {
            slot_id: review.calendar_slot_id.clone(),
            new_start,
            new_end: timeutil::add_minutes(new_start, length),
        }],
        next: None,
    })
}

fn step_not_whitelisted(
    review: &ReviewRequest,
    settings: &UserSettings,
    inputs: &StepInputs,
) -> Result<Step, AppError> {
    let cancel_at = review.non_whitelist_cancel_at.ok_or_else(|| {
        AppError::state(format!(
            "non_whitelist_cancel_at missing for NOT_WHITELISTED review {}",
            review.id
        ))
    })?;

    if inputs.now < timeutil::from_unix_seconds(cancel_at) {
        return Ok(Step::stay());
    }

    let mut intents = Vec::new();
    if settings.notify_non_whitelist_cancel {
        intents.push(Intent::NotifyNonWhitelistCancel {
            text: format_non_whitelist_cancel_message(review),
        });
    }
    intents.push(Intent::CancelSlot {
        slot_id: review.calendar_slot_id.clone(),
    });

    Ok(Step {
        intents,
        next: Some(ReviewStatus::AutoCancelledNotWhitelisted),
    })
}

fn step_need_to_approve(review: &ReviewRequest, settings: &UserSettings) -> Result<Step, AppError> {
    let review_start = timeutil::from_unix_seconds(review.review_start_time);
    let deadline =
        timeutil::decision_deadline(review_start, settings.response_deadline_shift_minutes);

    Ok(Step {
        intents: vec![
            Intent::SendPrompt {
                text: format_review_prompt(review, deadline),
                approve_payload: format_callback_data(Decision::Approve, &review.id),
                decline_payload: format_callback_data(Decision::Decline, &review.id),
            },
            Intent::StoreFields(FieldWrites::DecisionDeadline(deadline)),
        ],
        next: Some(ReviewStatus::WaitingForApprove),
    })
}

fn step_waiting_for_approve(
    review: &ReviewRequest,
    settings: &UserSettings,
    inputs: &StepInputs,
) -> Result<Step, AppError> {
    match inputs.decision {
        Some(Decision::Approve) => Ok(Step {
            intents: vec![
                Intent::EditPrompt {
                    text: format_approved_message(review),
                },
                Intent::AckCallback {
                    text: "Review approved!".to_string(),
                },
            ],
            next: Some(ReviewStatus::Approved),
        }),
        Some(Decision::Decline) => Ok(Step {
            intents: vec![
                Intent::CancelSlot {
                    slot_id: review.calendar_slot_id.clone(),
                },
                Intent::EditPrompt {
                    text: format_cancelled_message(review),
                },
                Intent::AckCallback {
                    text: "Review cancelled".to_string(),
                },
            ],
            next: Some(ReviewStatus::Cancelled),
        }),
        None => {
            let deadline = review.decision_deadline.ok_or_else(|| {
                AppError::state(format!(
                    "decision_deadline missing for WAITING_FOR_APPROVE review {}",
                    review.id
                ))
            })?;

            if inputs.now < timeutil::from_unix_seconds(deadline) {
                return Ok(Step::stay());
            }

            let mut intents = Vec::new();
            if settings.notify_whitelist_timeout {
                intents.push(Intent::NotifyTimeout {
                    text: format_timeout_message(review),
                });
            }
            intents.push(Intent::CancelSlot {
                slot_id: review.calendar_slot_id.clone(),
            });

            Ok(Step {
                intents,
                next: Some(ReviewStatus::AutoCancelled),
            })
        }
    }
}

// Message texts. Markdown, kept short enough to read on a phone.

fn format_review_prompt(review: &ReviewRequest, deadline: DateTime<Utc>) -> String {
    format!(
        "*Review Request*\n\nProject: {}\nTime: {}\n\nPlease respond by {}.\n\n\
         Use the buttons below to approve or decline.",
        review.project_name_or_unknown(),
        timeutil::format_short(timeutil::from_unix_seconds(review.review_start_time)),
        timeutil::format_short(deadline),
    )
}

fn format_approved_message(review: &ReviewRequest) -> String {
    format!(
        "✅ *Review Approved*\n\nProject: {}\nTime: {}",
        review.project_name_or_unknown(),
        timeutil::format_short(timeutil::from_unix_seconds(review.review_start_time)),
    )
}

fn format_cancelled_message(review: &ReviewRequest) -> String {
    format!(
        "❌ *Review Cancelled*\n\nProject: {}\nTime: {}",
        review.project_name_or_unknown(),
        timeutil::format_short(timeutil::from_unix_seconds(review.review_start_time)),
    )
}

fn format_timeout_message(review: &ReviewRequest) -> String {
    format!(
        "⏰ *Review Timeout*\n\nProject: {}\nTime: {}\n\n\
         You did not respond in time and this review was automatically cancelled.",
        review.project_name_or_unknown(),
        timeutil::format_short(timeutil::from_unix_seconds(review.review_start_time)),
    )
}

fn format_non_whitelist_cancel_message(review: &ReviewRequest) -> String {
    format!(
        "❌ *Review Auto-Cancelled*\n\nProject: {}\nTime: {}\n\n\
         This project is not in your whitelist and was automatically cancelled.",
        review.project_name_or_unknown(),
        timeutil::format_short(timeutil::from_unix_seconds(review.review_start_time)),
    )
}
