//! Business logic services.
//!
//! The adapters (school, telegram, vault) expose traits so the drivers can
//! be exercised against stubs; the state machine is pure and the reconciler
//! ties everything together once per tick.

pub mod reconciler;
pub mod school;
pub mod state_machine;
pub mod telegram;
pub mod vault;

pub use reconciler::Services;
pub use school::{SchoolApi, SchoolClient, SchoolClientConfig};
pub use telegram::{BotClient, BotClientConfig, ChatApi};
pub use vault::{HttpSecretStore, SecretStore, TokenVault};
