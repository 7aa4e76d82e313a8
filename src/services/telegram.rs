//! Telegram Bot API client.
//!
//! Covers the four calls the bot needs: plain message, two-button inline
//! keyboard, message edit, callback answer. Incoming webhook DTOs and the
//! callback payload codec live here as well.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::AppError;
use crate::models::Decision;

/// Telegram caps callback payloads at 64 bytes.
pub const MAX_CALLBACK_PAYLOAD_BYTES: usize = 64;

/// Bot client configuration.
#[derive(Debug, Clone)]
pub struct BotClientConfig {
    /// Bot token issued by BotFather.
    pub token: String,

    /// API base, overridable for tests. Default `https://api.telegram.org`.
    pub api_base: String,

    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl BotClientConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            api_base: "https://api.telegram.org".to_string(),
            timeout_secs: 10,
        }
    }
}

/// Chat transport operations, implemented by [`BotClient`] and by test stubs.
pub trait ChatApi {
    fn send_plain_message(
        &self,
        chat_id: i64,
        text: &str,
    ) -> impl std::future::Future<Output = Result<(), AppError>> + Send;

    /// Send a message with two inline buttons; returns the message id.
    #[allow(clippy::too_many_arguments)]
    fn send_two_button_keyboard(
        &self,
        chat_id: i64,
        text: &str,
        button_a_label: &str,
        button_a_payload: &str,
        button_b_label: &str,
        button_b_payload: &str,
    ) -> impl std::future::Future<Output = Result<i64, AppError>> + Send;

    fn edit_message(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
    ) -> impl std::future::Future<Output = Result<(), AppError>> + Send;

    fn answer_callback(
        &self,
        callback_id: &str,
        text: &str,
        show_alert: bool,
    ) -> impl std::future::Future<Output = Result<(), AppError>> + Send;
}

/// Telegram Bot API client.
#[derive(Debug, Clone)]
pub struct BotClient {
    client: Client,
    config: BotClientConfig,
}

impl BotClient {
    pub fn new(config: BotClientConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::telegram(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.config.api_base, self.config.token, method)
    }

    async fn call(&self, method: &str, body: serde_json::Value) -> Result<serde_json::Value, AppError> {
        let response = self
            .client
            .post(self.method_url(method))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let envelope: ApiEnvelope = response
            .json()
            .await
            .map_err(|e| AppError::telegram(format!("{} returned malformed body: {}", method, e)))?;

        if !status.is_success() || !envelope.ok {
            let description = envelope
                .description
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            return Err(AppError::telegram(format!("{} failed: {}", method, description)));
        }

        Ok(envelope.result.unwrap_or(serde_json::Value::Null))
    }
}

impl ChatApi for BotClient {
    async fn send_plain_message(&self, chat_id: i64, text: &str) -> Result<(), AppError> {
        self.call(
            "sendMessage",
            json!({
                "chat_id": chat_id,
                "text": text,
                "parse_mode": "Markdown",
            }),
        )
        .await?;

        Ok(())
    }

    async fn send_two_button_keyboard(
        &self,
        chat_id: i64,
        text: &str,
        button_a_label: &str,
        button_a_payload: &str,
        button_b_label: &str,
        button_b_payload: &str,
    ) -> Result<i64, AppError> {
        for payload in [button_a_payload, button_b_payload] {
            if payload.len() > MAX_CALLBACK_PAYLOAD_BYTES {
                return Err(AppError::telegram(format!(
                    "callback payload exceeds {} bytes: {}",
                    MAX_CALLBACK_PAYLOAD_BYTES, payload
                )));
            }
        }

        let result = self
            .call(
                "sendMessage",
                json!({
                    "chat_id": chat_id,
                    "text": text,
                    "parse_mode": "Markdown",
                    "reply_markup": {
                        "inline_keyboard": [[
                            { "text": button_a_label, "callback_data": button_a_payload },
                            { "text": button_b_label, "callback_data": button_b_payload },
                        ]],
                    },
                }),
            )
            .await?;

        let sent: SentMessage = serde_json::from_value(result)
            .map_err(|e| AppError::telegram(format!("sendMessage result missing id: {}", e)))?;

        Ok(sent.message_id)
    }

    async fn edit_message(&self, chat_id: i64, message_id: i64, text: &str) -> Result<(), AppError> {
        self.call(
            "editMessageText",
            json!({
                "chat_id": chat_id,
                "message_id": message_id,
                "text": text,
                "parse_mode": "Markdown",
            }),
        )
        .await?;

        Ok(())
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: &str,
        show_alert: bool,
    ) -> Result<(), AppError> {
        self.call(
            "answerCallbackQuery",
            json!({
                "callback_query_id": callback_id,
                "text": text,
                "show_alert": show_alert,
            }),
        )
        .await?;

        Ok(())
    }
}

/// Build the wire payload for an approve/decline button.
pub fn format_callback_data(decision: Decision, review_id: &str) -> String {
    format!("{}:{}", decision.as_str(), review_id)
}

/// Parse a callback payload back into `(decision, review_id)`.
///
/// Splits on the first `:`; anything after it, including further colons, is
/// the review id. Unknown actions and empty ids are rejected.
pub fn parse_callback_data(data: &str) -> Result<(Decision, &str), AppError> {
    let (action, review_id) = data
        .split_once(':')
        .ok_or_else(|| AppError::invalid_input(format!("malformed callback data: {}", data)))?;

    let decision = Decision::parse(action)
        .ok_or_else(|| AppError::invalid_input(format!("unknown callback action: {}", action)))?;

    if review_id.is_empty() {
        return Err(AppError::invalid_input("callback data has empty review id"));
    }

    Ok((decision, review_id))
}

/// Envelope every Bot API method responds with.
#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    ok: bool,
    description: Option<String>,
    result: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

// Incoming webhook DTOs. Only the fields the dispatcher reads.

/// One webhook update.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<IncomingMessage>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IncomingMessage {
    pub message_id: i64,
    #[serde(default)]
    pub from: Option<Sender>,
    pub chat: ChatRef,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: Sender,
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Sender {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatRef {
    pub id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_data_round_trip() {
        let id = "550e8400-e29b-41d4-a716-446655440000";
        let data = format_callback_data(Decision::Approve, id);
        assert_eq!(data, format!("APPROVE:{}", id));

        let (decision, parsed_id) = parse_callback_data(&data).unwrap();
        assert_eq!(decision, Decision::Approve);
        assert_eq!(parsed_id, id);
    }

    #[test]
    fn callback_id_keeps_embedded_colons() {
        let (decision, id) = parse_callback_data("DECLINE:550e8400:e29b-41d4").unwrap();
        assert_eq!(decision, Decision::Decline);
        assert_eq!(id, "550e8400:e29b-41d4");
    }

    #[test]
    fn callback_parse_rejects_garbage() {
        assert!(parse_callback_data("").is_err());
        assert!(parse_callback_data("no-colon-here").is_err());
        assert!(parse_callback_data("APPROVE:").is_err());
        assert!(parse_callback_data("INVALID:some-id").is_err());
    }

    #[test]
    fn uuid_payload_fits_telegram_limit() {
        let data = format_callback_data(Decision::Decline, "550e8400-e29b-41d4-a716-446655440000");
        assert!(data.len() <= MAX_CALLBACK_PAYLOAD_BYTES);
    }

    #[test]
    fn update_deserializes_both_shapes() {
        let message: Update = serde_json::from_str(
            r#"{"update_id": 1, "message": {"message_id": 10, "from": {"id": 7},
                "chat": {"id": 7}, "text": "/start"}}"#,
        )
        .unwrap();
        assert!(message.message.is_some());
        assert!(message.callback_query.is_none());

        let callback: Update = serde_json::from_str(
            r#"{"update_id": 2, "callback_query": {"id": "cb1", "from": {"id": 7},
                "data": "APPROVE:r1"}}"#,
        )
        .unwrap();
        let query = callback.callback_query.unwrap();
        assert_eq!(query.data.as_deref(), Some("APPROVE:r1"));
    }
}
