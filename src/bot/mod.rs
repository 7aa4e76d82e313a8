//! Chat dispatcher.
//!
//! One webhook update at a time: button callbacks go to the callback
//! handler, `/commands` to the command surface, and any other text to the
//! credential handler (only meaningful right after `/start`).

pub mod callbacks;
pub mod commands;

use crate::error::AppError;
use crate::services::reconciler::Services;
use crate::services::school::SchoolApi;
use crate::services::telegram::{ChatApi, Update};
use crate::services::vault::SecretStore;

/// Classify and route one incoming update.
///
/// Errors are returned for the caller to log; the webhook always tells the
/// chat transport "processed" so it does not redeliver.
pub async fn handle_update<S, C, V>(
    services: &Services<S, C, V>,
    update: &Update,
) -> Result<(), AppError>
where
    S: SchoolApi,
    C: ChatApi,
    V: SecretStore,
{
    if let Some(query) = &update.callback_query {
        return callbacks::handle_callback(services, query).await;
    }

    if let Some(message) = &update.message {
        let Some(text) = message.text.as_deref() else {
            // Stickers, photos, etc: nothing for this bot.
            return Ok(());
        };

        let chat_id = message
            .from
            .as_ref()
            .map(|sender| sender.id)
            .unwrap_or(message.chat.id);

        if text.trim_start().starts_with('/') {
            return commands::handle_command(services, chat_id, text).await;
        }

        return commands::handle_credentials(services, chat_id, text).await;
    }

    Ok(())
}
