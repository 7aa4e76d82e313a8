//! Data models for the entities kept in the table store.
//!
//! Status-like fields are stored as strings and exposed through closed enums
//! with explicit codecs; rows deserialize via SQLx `FromRow`.

pub mod review;
pub mod settings;
pub mod user;
pub mod whitelist;

pub use review::{Decision, ReviewRequest, ReviewStatus, INTERMEDIATE_STATUSES};
pub use settings::{SettingKey, UserSettings};
pub use user::{User, UserStatus};
pub use whitelist::{EntryKind, WhitelistEntry};
