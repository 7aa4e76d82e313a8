//! Review request model and its status alphabet.

use sqlx::FromRow;

use crate::error::AppError;

/// The ten review states.
///
/// The first six are intermediate and re-examined every tick; the last four
/// are terminal sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewStatus {
    /// Booking ingested; project name not yet resolved from the notification.
    UnknownProjectReview,
    /// Project and family resolved; classification pending.
    KnownProjectReview,
    /// Matches the whitelist; awaiting an optional slot shift.
    Whitelisted,
    /// No whitelist match; auto-cancel armed.
    NotWhitelisted,
    /// Must ask the reviewer now.
    NeedToApprove,
    /// Prompt delivered; awaiting the reviewer or the deadline.
    WaitingForApprove,
    Approved,
    Cancelled,
    AutoCancelled,
    AutoCancelledNotWhitelisted,
}

/// Intermediate statuses, in the order the driver re-examines them.
pub const INTERMEDIATE_STATUSES: [ReviewStatus; 6] = [
    ReviewStatus::UnknownProjectReview,
    ReviewStatus::KnownProjectReview,
    ReviewStatus::Whitelisted,
    ReviewStatus::NotWhitelisted,
    ReviewStatus::NeedToApprove,
    ReviewStatus::WaitingForApprove,
];

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownProjectReview => "UNKNOWN_PROJECT_REVIEW",
            Self::KnownProjectReview => "KNOWN_PROJECT_REVIEW",
            Self::Whitelisted => "WHITELISTED",
            Self::NotWhitelisted => "NOT_WHITELISTED",
            Self::NeedToApprove => "NEED_TO_APPROVE",
            Self::WaitingForApprove => "WAITING_FOR_APPROVE",
            Self::Approved => "APPROVED",
            Self::Cancelled => "CANCELLED",
            Self::AutoCancelled => "AUTO_CANCELLED",
            Self::AutoCancelledNotWhitelisted => "AUTO_CANCELLED_NOT_WHITELISTED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "UNKNOWN_PROJECT_REVIEW" => Some(Self::UnknownProjectReview),
            "KNOWN_PROJECT_REVIEW" => Some(Self::KnownProjectReview),
            "WHITELISTED" => Some(Self::Whitelisted),
            "NOT_WHITELISTED" => Some(Self::NotWhitelisted),
            "NEED_TO_APPROVE" => Some(Self::NeedToApprove),
            "WAITING_FOR_APPROVE" => Some(Self::WaitingForApprove),
            "APPROVED" => Some(Self::Approved),
            "CANCELLED" => Some(Self::Cancelled),
            "AUTO_CANCELLED" => Some(Self::AutoCancelled),
            "AUTO_CANCELLED_NOT_WHITELISTED" => Some(Self::AutoCancelledNotWhitelisted),
            _ => None,
        }
    }

    /// Terminal states are sinks: no transition leaves them.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Approved
                | Self::Cancelled
                | Self::AutoCancelled
                | Self::AutoCancelledNotWhitelisted
        )
    }
}

impl std::fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reviewer decision carried by a callback button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Decline,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "APPROVE",
            Self::Decline => "DECLINE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "APPROVE" => Some(Self::Approve),
            "DECLINE" => Some(Self::Decline),
            _ => None,
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A guarded calendar booking working its way through the state machine.
#[derive(Debug, Clone, FromRow)]
pub struct ReviewRequest {
    /// UUID assigned at ingest.
    pub id: String,

    pub reviewer_login: String,

    /// School notification the booking was announced by; used to resolve
    /// the project name.
    pub notification_id: Option<String>,

    /// Set on leaving `UNKNOWN_PROJECT_REVIEW`.
    pub project_name: Option<String>,

    /// Set on leaving `UNKNOWN_PROJECT_REVIEW`.
    pub family_label: Option<String>,

    /// Unix seconds, UTC wall time the review starts at.
    pub review_start_time: i64,

    /// External calendar slot the review occupies.
    pub calendar_slot_id: String,

    /// Unix seconds; set iff status is `WAITING_FOR_APPROVE`.
    pub decision_deadline: Option<i64>,

    /// Unix seconds; set iff status is `NOT_WHITELISTED`.
    pub non_whitelist_cancel_at: Option<i64>,

    /// Chat message carrying the approve/decline buttons; set once the
    /// review has passed through `WAITING_FOR_APPROVE`.
    pub telegram_message_id: Option<String>,

    pub status: String,

    /// Unix seconds.
    pub created_at: i64,

    /// Unix seconds; set iff status is terminal.
    pub decided_at: Option<i64>,
}

impl ReviewRequest {
    pub fn status_enum(&self) -> Result<ReviewStatus, AppError> {
        ReviewStatus::parse(&self.status)
            .ok_or_else(|| AppError::state(format!("unknown review status: {}", self.status)))
    }

    /// Project name for user-facing messages, with a placeholder before
    /// resolution.
    pub fn project_name_or_unknown(&self) -> &str {
        self.project_name.as_deref().unwrap_or("Unknown Project")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trip() {
        for status in [
            ReviewStatus::UnknownProjectReview,
            ReviewStatus::KnownProjectReview,
            ReviewStatus::Whitelisted,
            ReviewStatus::NotWhitelisted,
            ReviewStatus::NeedToApprove,
            ReviewStatus::WaitingForApprove,
            ReviewStatus::Approved,
            ReviewStatus::Cancelled,
            ReviewStatus::AutoCancelled,
            ReviewStatus::AutoCancelledNotWhitelisted,
        ] {
            assert_eq!(ReviewStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ReviewStatus::parse("DONE"), None);
    }

    #[test]
    fn terminal_partition() {
        for status in INTERMEDIATE_STATUSES {
            assert!(!status.is_terminal());
        }
        assert!(ReviewStatus::Approved.is_terminal());
        assert!(ReviewStatus::Cancelled.is_terminal());
        assert!(ReviewStatus::AutoCancelled.is_terminal());
        assert!(ReviewStatus::AutoCancelledNotWhitelisted.is_terminal());
    }

    #[test]
    fn decision_codec() {
        assert_eq!(Decision::parse("APPROVE"), Some(Decision::Approve));
        assert_eq!(Decision::parse("DECLINE"), Some(Decision::Decline));
        assert_eq!(Decision::parse("approve"), None);
        assert_eq!(Decision::Approve.to_string(), "APPROVE");
    }
}
