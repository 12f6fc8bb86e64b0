use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::cache::TtlCache;
use crate::error::Result;
use crate::pos::PosClient;
use crate::security::crypto::SecretVault;
use crate::store::models::IntegrationCredential;
use crate::store::Store;

/// Bearer token held in process memory only; never persisted in plaintext.
#[derive(Debug, Clone)]
pub struct CachedToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

/// Hides the POS client-credentials handshake behind a cached accessor.
///
/// Concurrent acquisitions for one credential coalesce behind a per-key
/// mutex; followers re-check the cache after taking the lock and reuse the
/// leader's result instead of issuing a second exchange.
pub struct TokenBroker {
    store: Arc<dyn Store>,
    pos: Arc<PosClient>,
    vault: Arc<SecretVault>,
    tokens: TtlCache<CachedToken>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TokenBroker {
    pub fn new(store: Arc<dyn Store>, pos: Arc<PosClient>, vault: Arc<SecretVault>) -> Self {
        Self {
            store,
            pos,
            vault,
            // per-entry TTLs come from the upstream expires_in
            tokens: TtlCache::new(Duration::from_secs(300)),
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, credential_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(credential_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Return a live bearer token for `credential`, exchanging the decrypted
    /// secret only when no cached token remains valid.
    pub async fn acquire_token(&self, credential: &IntegrationCredential) -> Result<String> {
        if let Some(cached) = self.tokens.get(&credential.id).await {
            debug!(credential_id = %credential.id, "token served from cache");
            return Ok(cached.access_token);
        }

        let lock = self.lock_for(&credential.id).await;
        let _guard = lock.lock().await;

        // a concurrent caller may have refreshed while we waited
        if let Some(cached) = self.tokens.get(&credential.id).await {
            debug!(credential_id = %credential.id, "token refreshed by concurrent caller");
            return Ok(cached.access_token);
        }

        let secret = self.vault.open(&credential.encrypted_secret)?;
        let response = self
            .pos
            .exchange_token(&credential.client_id, &secret)
            .await?;

        let expires_at = Utc::now() + chrono::Duration::seconds(response.expires_in as i64);
        self.tokens
            .put_with_ttl(
                credential.id.clone(),
                CachedToken {
                    access_token: response.access_token.clone(),
                    expires_at,
                },
                Duration::from_secs(response.expires_in),
            )
            .await;

        // persisted so a restart can detect a stale credential without
        // re-deriving the token
        self.store
            .set_credential_token_expiry(&credential.id, expires_at)
            .await?;

        info!(target: "audit", event = "token_acquired", credential_id = %credential.id);
        Ok(response.access_token)
    }

    /// Seed the cache with a token obtained outside the broker (credential
    /// save flow).
    pub async fn prime(&self, credential_id: &str, access_token: String, expires_in: u64) {
        let expires_at = Utc::now() + chrono::Duration::seconds(expires_in as i64);
        self.tokens
            .put_with_ttl(
                credential_id.to_string(),
                CachedToken {
                    access_token,
                    expires_at,
                },
                Duration::from_secs(expires_in),
            )
            .await;
    }
}

/// Setup and rotation of encrypted POS credentials.
pub struct CredentialManager {
    store: Arc<dyn Store>,
    pos: Arc<PosClient>,
    vault: Arc<SecretVault>,
    broker: Arc<TokenBroker>,
}

impl CredentialManager {
    pub fn new(
        store: Arc<dyn Store>,
        pos: Arc<PosClient>,
        vault: Arc<SecretVault>,
        broker: Arc<TokenBroker>,
    ) -> Self {
        Self {
            store,
            pos,
            vault,
            broker,
        }
    }

    /// Validate, encrypt, and store a new credential for `owner_id`.
    ///
    /// The secret is proven against the identity endpoint and the POS API
    /// before anything is written. All prior active credentials for the
    /// owner are deactivated first, so exactly one row stays active.
    pub async fn save_credentials(
        &self,
        owner_id: &str,
        retailer_name: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Result<IntegrationCredential> {
        let token = self.pos.exchange_token(client_id, client_secret).await?;
        self.pos.ping(&token.access_token).await?;

        let encrypted_secret = self.vault.seal(client_secret)?;
        let now = Utc::now();

        let deactivated = self.store.deactivate_credentials_for_owner(owner_id).await?;
        if deactivated > 0 {
            info!(target: "audit", event = "credential_rotated", owner_id, deactivated);
        }

        let credential = IntegrationCredential {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            retailer_name: retailer_name.to_string(),
            client_id: client_id.to_string(),
            encrypted_secret,
            token_expires_at: Some(now + chrono::Duration::seconds(token.expires_in as i64)),
            active: true,
            created_at: now,
        };
        self.store.insert_credential(credential.clone()).await?;

        self.broker
            .prime(&credential.id, token.access_token, token.expires_in)
            .await;

        info!(target: "audit", event = "credential_saved", owner_id, credential_id = %credential.id);
        Ok(credential)
    }
}
