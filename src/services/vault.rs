//! Token vault over the external secret store.
//!
//! All reviewer tokens live in one versioned secret: a JSON document
//! `{"version": n, "users": {login: {access, refresh}}}` stored as the text
//! entry keyed `users`. Reads go through a process-wide cache with a short
//! TTL; writes re-read the latest version, apply the change, write version+1
//! and invalidate the cache. Writers race only on the cache — last version
//! wins, which is acceptable at human auth/logout rates.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::AppError;

/// Cache TTL for the parsed payload.
pub const PAYLOAD_CACHE_TTL: Duration = Duration::from_secs(300);

/// Entry key carrying the token document.
const USERS_ENTRY_KEY: &str = "users";

/// Access + refresh token pair for one reviewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBundle {
    pub access: String,
    pub refresh: String,
}

/// The versioned document stored in the secret.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VaultDocument {
    pub version: u64,
    pub users: HashMap<String, TokenBundle>,
}

/// One entry of a secret payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretEntry {
    pub key: String,
    pub text: String,
}

/// A secret payload as the store returns it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecretPayload {
    pub entries: Vec<SecretEntry>,
}

/// Secret store operations, implemented by [`HttpSecretStore`] and by test
/// stubs.
pub trait SecretStore {
    fn get_payload(
        &self,
        secret_id: &str,
    ) -> impl std::future::Future<Output = Result<SecretPayload, AppError>> + Send;

    fn put_payload(
        &self,
        secret_id: &str,
        payload: &SecretPayload,
    ) -> impl std::future::Future<Output = Result<(), AppError>> + Send;
}

/// Secret store reached over HTTP with a bearer token.
#[derive(Debug, Clone)]
pub struct HttpSecretStore {
    client: Client,
    base_url: String,
    auth_token: String,
}

impl HttpSecretStore {
    pub fn new(
        base_url: impl Into<String>,
        auth_token: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| AppError::vault(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            auth_token: auth_token.into(),
        })
    }
}

impl SecretStore for HttpSecretStore {
    async fn get_payload(&self, secret_id: &str) -> Result<SecretPayload, AppError> {
        let url = format!("{}/secrets/{}/payload", self.base_url, secret_id);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.auth_token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::vault(format!(
                "get payload failed: HTTP {}",
                status.as_u16()
            )));
        }

        response
            .json::<SecretPayload>()
            .await
            .map_err(|e| AppError::vault(format!("malformed payload: {}", e)))
    }

    async fn put_payload(&self, secret_id: &str, payload: &SecretPayload) -> Result<(), AppError> {
        let url = format!("{}/secrets/{}/payload", self.base_url, secret_id);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.auth_token)
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::vault(format!(
                "put payload failed: HTTP {}",
                status.as_u16()
            )));
        }

        Ok(())
    }
}

struct CachedDocument {
    document: VaultDocument,
    fetched_at: Instant,
}

/// Cached read/write access to the token document.
pub struct TokenVault<S> {
    store: S,
    secret_id: String,
    ttl: Duration,
    cache: Arc<RwLock<Option<CachedDocument>>>,
}

impl<S: Clone> Clone for TokenVault<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            secret_id: self.secret_id.clone(),
            ttl: self.ttl,
            cache: Arc::clone(&self.cache),
        }
    }
}

impl<S: SecretStore> TokenVault<S> {
    pub fn new(store: S, secret_id: impl Into<String>) -> Self {
        Self::with_ttl(store, secret_id, PAYLOAD_CACHE_TTL)
    }

    pub fn with_ttl(store: S, secret_id: impl Into<String>, ttl: Duration) -> Self {
        Self {
            store,
            secret_id: secret_id.into(),
            ttl,
            cache: Arc::new(RwLock::new(None)),
        }
    }

    /// Tokens for one reviewer, served from cache within the TTL.
    pub async fn get_user_tokens(&self, login: &str) -> Result<TokenBundle, AppError> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.fetched_at.elapsed() < self.ttl {
                    return cached
                        .document
                        .users
                        .get(login)
                        .cloned()
                        .ok_or_else(|| AppError::tokens_missing(login));
                }
            }
        }

        let document = self.fetch_document().await?;
        let bundle = document.users.get(login).cloned();

        let mut cache = self.cache.write().await;
        *cache = Some(CachedDocument {
            document,
            fetched_at: Instant::now(),
        });

        bundle.ok_or_else(|| AppError::tokens_missing(login))
    }

    /// Write-through: merge the bundle into the next document version.
    pub async fn store_user_tokens(&self, login: &str, bundle: TokenBundle) -> Result<(), AppError> {
        let mut document = self.fetch_document().await?;
        document.version += 1;
        document.users.insert(login.to_string(), bundle);

        self.write_document(&document).await?;
        self.invalidate_cache().await;

        Ok(())
    }

    /// Remove a reviewer's bundle. Deleting an absent login is a no-op.
    pub async fn delete_user_tokens(&self, login: &str) -> Result<(), AppError> {
        let mut document = self.fetch_document().await?;
        if document.users.remove(login).is_none() {
            return Ok(());
        }
        document.version += 1;

        self.write_document(&document).await?;
        self.invalidate_cache().await;

        Ok(())
    }

    /// Drop the cached document; the next read refetches.
    pub async fn invalidate_cache(&self) {
        let mut cache = self.cache.write().await;
        *cache = None;
    }

    async fn fetch_document(&self) -> Result<VaultDocument, AppError> {
        let payload = self.store.get_payload(&self.secret_id).await?;

        let Some(entry) = payload.entries.iter().find(|e| e.key == USERS_ENTRY_KEY) else {
            // A fresh secret carries no users entry yet.
            return Ok(VaultDocument::default());
        };

        serde_json::from_str(&entry.text)
            .map_err(|e| AppError::vault(format!("malformed token document: {}", e)))
    }

    async fn write_document(&self, document: &VaultDocument) -> Result<(), AppError> {
        let payload = SecretPayload {
            entries: vec![SecretEntry {
                key: USERS_ENTRY_KEY.to_string(),
                text: serde_json::to_string(document)?,
            }],
        };

        self.store.put_payload(&self.secret_id, &payload).await
    }
}
