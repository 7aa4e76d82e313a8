//! Reviewer account model.

use sqlx::FromRow;

use crate::error::AppError;

/// Reviewer account status.
///
/// A reviewer is `Active` iff a token bundle exists in the vault; `logout`
/// flips the row to `Inactive` instead of deleting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserStatus {
    Active,
    Inactive,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Inactive => "INACTIVE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(Self::Active),
            "INACTIVE" => Some(Self::Inactive),
            _ => None,
        }
    }
}

impl std::fmt::Display for UserStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reviewer registered with the bot.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    /// School login, the primary identity.
    pub reviewer_login: String,

    /// `ACTIVE` or `INACTIVE`.
    pub status: String,

    /// Telegram chat the reviewer talks to the bot from. Unique among
    /// active reviewers.
    pub telegram_chat_id: i64,

    /// Unix seconds.
    pub created_at: i64,

    /// Unix seconds of the last successful credential exchange.
    pub last_auth_success_at: i64,

    /// Unix seconds of the last failed credential exchange, if any.
    pub last_auth_failure_at: Option<i64>,
}

impl User {
    pub fn status_enum(&self) -> Result<UserStatus, AppError> {
        UserStatus::parse(&self.status)
            .ok_or_else(|| AppError::state(format!("unknown user status: {}", self.status)))
    }

    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active.as_str()
    }
}
