//! Shared harness for the integration suites: stub adapters over an
//! in-memory store, plus seeding helpers.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};

use slotguard::db;
use slotguard::db::pool::DbPool;
use slotguard::error::AppError;
use slotguard::models::{User, UserStatus};
use slotguard::services::reconciler::Services;
use slotguard::services::school::{CalendarBooking, FamilyProject, Notification, SchoolApi};
use slotguard::services::telegram::ChatApi;
use slotguard::services::vault::{
    SecretPayload, SecretStore, TokenBundle, TokenVault, VaultDocument,
};
use slotguard::timeutil;

pub type TestServices = Services<StubSchool, StubChat, MemorySecretStore>;

/// Fixed UTC timestamp helper: 2025-01-08 at the given time.
pub fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 8, h, m, 0).unwrap()
}

pub fn test_tokens() -> TokenBundle {
    TokenBundle {
        access: "access-token".to_string(),
        refresh: "refresh-token".to_string(),
    }
}

// ---------------------------------------------------------------------------
// School stub

#[derive(Default)]
pub struct SchoolState {
    pub notifications: Vec<Notification>,
    pub graph: Vec<FamilyProject>,
    pub bookings: Vec<CalendarBooking>,
    pub auth_result: Option<TokenBundle>,

    pub cancelled_slots: Vec<String>,
    pub changed_slots: Vec<(String, DateTime<Utc>, DateTime<Utc>)>,
    pub graph_fetches: usize,

    pub fail_change_slot: bool,
}

/// School API stub: canned data in, recorded mutations out.
#[derive(Clone, Default)]
pub struct StubSchool {
    pub state: Arc<Mutex<SchoolState>>,
}

impl StubSchool {
    pub fn cancelled(&self) -> Vec<String> {
        self.state.lock().unwrap().cancelled_slots.clone()
    }

    pub fn changed(&self) -> Vec<(String, DateTime<Utc>, DateTime<Utc>)> {
        self.state.lock().unwrap().changed_slots.clone()
    }

    pub fn add_booking(&self, slot_id: &str, booking_id: &str, start: DateTime<Utc>, end: DateTime<Utc>) {
        self.state.lock().unwrap().bookings.push(CalendarBooking {
            slot_id: slot_id.to_string(),
            booking_id: booking_id.to_string(),
            start,
            end,
            project_name: None,
        });
    }

    pub fn add_notification(&self, id: &str, message: &str) {
        self.state.lock().unwrap().notifications.push(Notification {
            id: id.to_string(),
            message: message.to_string(),
        });
    }

    pub fn set_graph(&self, pairs: &[(&str, &str)]) {
        self.state.lock().unwrap().graph = pairs
            .iter()
            .map(|(family, project)| FamilyProject {
                family_label: family.to_string(),
                project_name: project.to_string(),
            })
            .collect();
    }
}

impl SchoolApi for StubSchool {
    async fn authenticate(&self, _login: &str, _password: &str) -> Result<TokenBundle, AppError> {
        self.state
            .lock()
            .unwrap()
            .auth_result
            .clone()
            .ok_or(AppError::BadCredentials)
    }

    async fn get_notifications(
        &self,
        _tokens: &TokenBundle,
        _offset: u32,
        _limit: u32,
    ) -> Result<Vec<Notification>, AppError> {
        Ok(self.state.lock().unwrap().notifications.clone())
    }

    async fn get_project_graph(
        &self,
        _tokens: &TokenBundle,
        _login: &str,
    ) -> Result<Vec<FamilyProject>, AppError> {
        let mut state = self.state.lock().unwrap();
        state.graph_fetches += 1;
        Ok(state.graph.clone())
    }

    async fn get_calendar_events(
        &self,
        _tokens: &TokenBundle,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<CalendarBooking>, AppError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .bookings
            .iter()
            .filter(|booking| booking.start >= from && booking.start <= to)
            .cloned()
            .collect())
    }

    async fn cancel_slot(&self, _tokens: &TokenBundle, slot_id: &str) -> Result<(), AppError> {
        self.state
            .lock()
            .unwrap()
            .cancelled_slots
            .push(slot_id.to_string());
        Ok(())
    }

    async fn change_slot(
        &self,
        _tokens: &TokenBundle,
        slot_id: &str,
        new_start: DateTime<Utc>,
        new_end: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_change_slot {
            return Err(AppError::school_api_full("shift rejected", 500, "/calendar/slots"));
        }
        state
            .changed_slots
            .push((slot_id.to_string(), new_start, new_end));
        // Keep the stub calendar consistent with the move.
        if let Some(booking) = state.bookings.iter_mut().find(|b| b.slot_id == slot_id) {
            booking.start = new_start;
            booking.end = new_end;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Chat stub

#[derive(Default)]
pub struct ChatState {
    pub plain_messages: Vec<(i64, String)>,
    pub keyboards: Vec<(i64, String, String, String)>,
    pub edits: Vec<(i64, i64, String)>,
    pub acks: Vec<(String, String)>,
    pub next_message_id: i64,

    pub fail_send_keyboard: bool,
}

/// Chat transport stub: records every outbound call.
#[derive(Clone, Default)]
pub struct StubChat {
    pub state: Arc<Mutex<ChatState>>,
}

impl StubChat {
    pub fn plain_messages(&self) -> Vec<(i64, String)> {
        self.state.lock().unwrap().plain_messages.clone()
    }

    pub fn keyboards(&self) -> Vec<(i64, String, String, String)> {
        self.state.lock().unwrap().keyboards.clone()
    }

    pub fn edits(&self) -> Vec<(i64, i64, String)> {
        self.state.lock().unwrap().edits.clone()
    }

    pub fn acks(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().acks.clone()
    }

    pub fn last_plain_text(&self) -> String {
        self.plain_messages()
            .last()
            .map(|(_, text)| text.clone())
            .unwrap_or_default()
    }
}

impl ChatApi for StubChat {
    async fn send_plain_message(&self, chat_id: i64, text: &str) -> Result<(), AppError> {
        self.state
            .lock()
            .unwrap()
            .plain_messages
            .push((chat_id, text.to_string()));
        Ok(())
    }

    async fn send_two_button_keyboard(
        &self,
        chat_id: i64,
        text: &str,
        _button_a_label: &str,
        button_a_payload: &str,
        _button_b_label: &str,
        button_b_payload: &str,
    ) -> Result<i64, AppError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_send_keyboard {
            return Err(AppError::telegram("sendMessage failed: HTTP 502"));
        }
        state.next_message_id += 1;
        let id = state.next_message_id;
        state.keyboards.push((
            chat_id,
            text.to_string(),
            button_a_payload.to_string(),
            button_b_payload.to_string(),
        ));
        Ok(id)
    }

    async fn edit_message(&self, chat_id: i64, message_id: i64, text: &str) -> Result<(), AppError> {
        self.state
            .lock()
            .unwrap()
            .edits
            .push((chat_id, message_id, text.to_string()));
        Ok(())
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: &str,
        _show_alert: bool,
    ) -> Result<(), AppError> {
        self.state
            .lock()
            .unwrap()
            .acks
            .push((callback_id.to_string(), text.to_string()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Secret store stub

/// In-memory secret store for the vault.
#[derive(Clone, Default)]
pub struct MemorySecretStore {
    pub payload: Arc<Mutex<SecretPayload>>,
}

impl MemorySecretStore {
    pub fn document(&self) -> VaultDocument {
        let payload = self.payload.lock().unwrap();
        payload
            .entries
            .iter()
            .find(|entry| entry.key == "users")
            .map(|entry| serde_json::from_str(&entry.text).unwrap())
            .unwrap_or_default()
    }
}

impl SecretStore for MemorySecretStore {
    async fn get_payload(&self, _secret_id: &str) -> Result<SecretPayload, AppError> {
        Ok(self.payload.lock().unwrap().clone())
    }

    async fn put_payload(&self, _secret_id: &str, payload: &SecretPayload) -> Result<(), AppError> {
        *self.payload.lock().unwrap() = payload.clone();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harness

pub struct Harness {
    pub services: TestServices,
    pub school: StubSchool,
    pub chat: StubChat,
    pub store: MemorySecretStore,
}

/// Fresh harness over an empty in-memory database.
pub async fn harness() -> Harness {
    let pool: DbPool = db::initialize_in_memory().await.unwrap();
    let school = StubSchool::default();
    let chat = StubChat::default();
    let store = MemorySecretStore::default();
    let vault = TokenVault::new(store.clone(), "sec-test");

    let services = Services {
        pool,
        school: school.clone(),
        chat: chat.clone(),
        vault,
    };

    Harness {
        services,
        school,
        chat,
        store,
    }
}

impl Harness {
    /// Register an active reviewer with default settings and vaulted tokens.
    pub async fn seed_reviewer(&self, login: &str, chat_id: i64) {
        let now = timeutil::to_unix_seconds(at(8, 0));
        db::users::upsert_user(
            &self.services.pool,
            &User {
                reviewer_login: login.to_string(),
                status: UserStatus::Active.as_str().to_string(),
                telegram_chat_id: chat_id,
                created_at: now,
                last_auth_success_at: now,
                last_auth_failure_at: None,
            },
        )
        .await
        .unwrap();
        db::settings::create_default_settings(&self.services.pool, login)
            .await
            .unwrap();

        self.services
            .vault
            .store_user_tokens(login, test_tokens())
            .await
            .unwrap();
    }

    pub async fn review_status(&self, slot_id: &str) -> (String, String) {
        let review = db::reviews::get_by_slot_id(&self.services.pool, slot_id)
            .await
            .unwrap()
            .expect("review for slot");
        (review.id, review.status)
    }
}
