//! Application error types.
//!
//! Every fallible layer converts into `AppError`. Handlers turn the
//! user-visible variants into chat replies; the reconciler logs transient
//! variants and leaves the affected review for the next tick.

use thiserror::Error;

/// Application-wide error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Table store operation failed.
    #[error("Database error: {message}")]
    Database {
        message: String,
        operation: Option<String>,
    },

    /// School API request failed.
    #[error("School API error: {message}")]
    SchoolApi {
        message: String,
        status_code: Option<u16>,
        endpoint: Option<String>,
    },

    /// Telegram Bot API request failed.
    #[error("Telegram error: {message}")]
    Telegram { message: String },

    /// Secret store (token vault) operation failed.
    #[error("Vault error: {message}")]
    Vault { message: String },

    /// Network request failed before a response was received.
    #[error("Network error: {message}")]
    Network { message: String },

    /// No reviewer is registered for the chat that sent the event.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// School credentials were rejected.
    #[error("Bad credentials")]
    BadCredentials,

    /// Reviewer exists but the vault holds no token bundle.
    #[error("No tokens stored for {login}")]
    TokensMissing { login: String },

    /// Notification referenced by a review is gone from the school feed.
    #[error("Notification not found: {notification_id}")]
    NotificationMissing { notification_id: String },

    /// Project name could not be resolved to a family.
    #[error("Unknown project: {project_name}")]
    ProjectUnknown { project_name: String },

    /// Calendar no longer carries the slot a review refers to.
    #[error("Stale booking for slot {slot_id}")]
    BookingStale { slot_id: String },

    /// Command argument out of range or malformed.
    #[error("Invalid input: {message}")]
    InvalidInput {
        message: String,
        field: Option<String>,
    },

    /// Callback targets a review owned by someone else.
    #[error("Access denied")]
    AccessDenied,

    /// A review record violates a state-machine invariant.
    #[error("Invalid review state: {message}")]
    State { message: String },

    /// Internal application error.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl AppError {
    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            operation: None,
        }
    }

    /// Create a database error with operation context.
    pub fn database_with_op(message: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            operation: Some(operation.into()),
        }
    }

    /// Create a school API error.
    pub fn school_api(message: impl Into<String>) -> Self {
        Self::SchoolApi {
            message: message.into(),
            status_code: None,
            endpoint: None,
        }
    }

    /// Create a school API error with status code and endpoint.
    pub fn school_api_full(
        message: impl Into<String>,
        status_code: u16,
        endpoint: impl Into<String>,
    ) -> Self {
        Self::SchoolApi {
            message: message.into(),
            status_code: Some(status_code),
            endpoint: Some(endpoint.into()),
        }
    }

    /// Create a Telegram error.
    pub fn telegram(message: impl Into<String>) -> Self {
        Self::Telegram {
            message: message.into(),
        }
    }

    /// Create a vault error.
    pub fn vault(message: impl Into<String>) -> Self {
        Self::Vault {
            message: message.into(),
        }
    }

    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a tokens-missing error.
    pub fn tokens_missing(login: impl Into<String>) -> Self {
        Self::TokensMissing {
            login: login.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
            field: None,
        }
    }

    /// Create an invalid input error with field context.
    pub fn invalid_input_for(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a state invariant error.
    pub fn state(message: impl Into<String>) -> Self {
        Self::State {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether retrying on a later tick may succeed without operator action.
    ///
    /// Covers timeouts, 5xx responses, and store hiccups. 4xx school API
    /// responses are not transient: they indicate bad state or bad tokens.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network { .. }
            | Self::Telegram { .. }
            | Self::Vault { .. }
            | Self::Database { .. }
            | Self::NotificationMissing { .. }
            | Self::ProjectUnknown { .. }
            | Self::BookingStale { .. } => true,
            Self::SchoolApi { status_code, .. } => {
                status_code.is_none_or(|code| code >= 500)
            }
            _ => false,
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::database(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        Self::network(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal(format!("JSON error: {}", err))
    }
}
