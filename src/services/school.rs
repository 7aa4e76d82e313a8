//! School API client.
//!
//! Wraps the handful of platform calls the bot depends on: credential
//! exchange, notification feed, project graph, and calendar slot reads and
//! mutations. Calls authenticate with the reviewer's access token from the
//! vault.

use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::AppError;
use crate::services::vault::TokenBundle;

/// School API client configuration.
#[derive(Debug, Clone)]
pub struct SchoolClientConfig {
    /// Base URL of the school platform API.
    pub base_url: String,

    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl SchoolClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_secs: 10,
        }
    }
}

/// One notification from the school feed.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Notification {
    pub id: String,
    pub message: String,
}

/// One edge of the project graph: a project and the family it belongs to.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FamilyProject {
    pub family_label: String,
    pub project_name: String,
}

/// One calendar booking inside the query window.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CalendarBooking {
    /// Calendar slot the booking occupies.
    pub slot_id: String,

    /// Booking id, doubling as the notification id that announced it.
    pub booking_id: String,

    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,

    #[serde(default)]
    pub project_name: Option<String>,
}

/// School API operations, implemented by [`SchoolClient`] and by test stubs.
pub trait SchoolApi {
    fn authenticate(
        &self,
        login: &str,
        password: &str,
    ) -> impl std::future::Future<Output = Result<TokenBundle, AppError>> + Send;

    fn get_notifications(
        &self,
        tokens: &TokenBundle,
        offset: u32,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<Notification>, AppError>> + Send;

    fn get_project_graph(
        &self,
        tokens: &TokenBundle,
        login: &str,
    ) -> impl std::future::Future<Output = Result<Vec<FamilyProject>, AppError>> + Send;

    fn get_calendar_events(
        &self,
        tokens: &TokenBundle,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Vec<CalendarBooking>, AppError>> + Send;

    fn cancel_slot(
        &self,
        tokens: &TokenBundle,
        slot_id: &str,
    ) -> impl std::future::Future<Output = Result<(), AppError>> + Send;

    fn change_slot(
        &self,
        tokens: &TokenBundle,
        slot_id: &str,
        new_start: DateTime<Utc>,
        new_end: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<(), AppError>> + Send;
}

/// School API client over JSON HTTP.
#[derive(Debug, Clone)]
pub struct SchoolClient {
    client: Client,
    config: SchoolClientConfig,
}

impl SchoolClient {
    pub fn new(config: SchoolClientConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::school_api(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    async fn check(
        &self,
        response: reqwest::Response,
        endpoint: &str,
    ) -> Result<reqwest::Response, AppError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        Err(AppError::school_api_full(
            format!("request failed: HTTP {}", status.as_u16()),
            status.as_u16(),
            endpoint,
        ))
    }
}

impl SchoolApi for SchoolClient {
    async fn authenticate(&self, login: &str, password: &str) -> Result<TokenBundle, AppError> {
        let response = self
            .client
            .post(self.url("/auth/token"))
            .json(&json!({ "login": login, "password": password }))
            .send()
            .await?;

        let status = response.status();
        if status.is_client_error() {
            return Err(AppError::BadCredentials);
        }
        let response = self.check(response, "/auth/token").await?;

        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
            refresh_token: String,
        }

        let tokens: TokenResponse = response
            .json()
            .await
            .map_err(|e| AppError::school_api(format!("malformed token response: {}", e)))?;

        Ok(TokenBundle {
            access: tokens.access_token,
            refresh: tokens.refresh_token,
        })
    }

    async fn get_notifications(
        &self,
        tokens: &TokenBundle,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<Notification>, AppError> {
        let response = self
            .client
            .get(self.url("/notifications"))
            .bearer_auth(&tokens.access)
            .query(&[("offset", offset), ("limit", limit)])
            .send()
            .await?;
        let response = self.check(response, "/notifications").await?;

        #[derive(Deserialize)]
        struct NotificationsResponse {
            notifications: Vec<Notification>,
        }

        let body: NotificationsResponse = response
            .json()
            .await
            .map_err(|e| AppError::school_api(format!("malformed notifications: {}", e)))?;

        Ok(body.notifications)
    }

    async fn get_project_graph(
        &self,
        tokens: &TokenBundle,
        login: &str,
    ) -> Result<Vec<FamilyProject>, AppError> {
        let response = self
            .client
            .get(self.url("/graph/projects"))
            .bearer_auth(&tokens.access)
            .query(&[("login", login)])
            .send()
            .await?;
        let response = self.check(response, "/graph/projects").await?;

        #[derive(Deserialize)]
        struct GraphResponse {
            projects: Vec<FamilyProject>,
        }

        let body: GraphResponse = response
            .json()
            .await
            .map_err(|e| AppError::school_api(format!("malformed project graph: {}", e)))?;

        Ok(body.projects)
    }

    async fn get_calendar_events(
        &self,
        tokens: &TokenBundle,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<CalendarBooking>, AppError> {
        let response = self
            .client
            .get(self.url("/calendar/events"))
            .bearer_auth(&tokens.access)
            .query(&[("from", from.to_rfc3339()), ("to", to.to_rfc3339())])
            .send()
            .await?;
        let response = self.check(response, "/calendar/events").await?;

        #[derive(Deserialize)]
        struct EventsResponse {
            bookings: Vec<CalendarBooking>,
        }

        let body: EventsResponse = response
            .json()
            .await
            .map_err(|e| AppError::school_api(format!("malformed calendar events: {}", e)))?;

        Ok(body.bookings)
    }

    async fn cancel_slot(&self, tokens: &TokenBundle, slot_id: &str) -> Result<(), AppError> {
        let response = self
            .client
            .delete(self.url(&format!("/calendar/slots/{}", slot_id)))
            .bearer_auth(&tokens.access)
            .send()
            .await?;

        // Cancelling an already-cancelled slot is a non-error.
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        self.check(response, "/calendar/slots").await?;

        Ok(())
    }

    async fn change_slot(
        &self,
        tokens: &TokenBundle,
        slot_id: &str,
        new_start: DateTime<Utc>,
        new_end: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let response = self
            .client
            .patch(self.url(&format!("/calendar/slots/{}", slot_id)))
            .bearer_auth(&tokens.access)
            .json(&json!({
                "start": new_start.to_rfc3339(),
                "end": new_end.to_rfc3339(),
            }))
            .send()
            .await?;
        self.check(response, "/calendar/slots").await?;

        Ok(())
    }
}

/// Pull a project name out of a notification message.
///
/// Platform messages quote the project in backquotes ("You are invited to
/// review `libft` ..."); older messages end with the bare name. No candidate
/// at all means the message is not a review announcement.
pub fn extract_project_name(message: &str) -> Option<String> {
    if let Some(start) = message.find('`') {
        let rest = &message[start + 1..];
        if let Some(end) = rest.find('`') {
            let name = rest[..end].trim();
            if !name.is_empty() {
                return Some(name.to_string());
            }
        }
    }

    message
        .split_whitespace()
        .last()
        .map(|word| word.trim_end_matches(['.', '!', '?']))
        .filter(|word| !word.is_empty())
        .map(|word| word.to_string())
}
