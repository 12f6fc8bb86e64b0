use async_trait::async_trait;
use chrono::{Duration, Utc};
use rand::Rng;
use regex::Regex;
use serde::Serialize;
use std::sync::{Arc, OnceLock};
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{GatewayError, Result};
use crate::security::rate_limit::RateLimiter;
use crate::security::session::SessionSigner;
use crate::store::models::{FieldAccount, OtpCode};
use crate::store::Store;

const OTP_TTL_MINUTES: i64 = 5;

fn email_re() -> &'static Regex {
    static EMAIL_RE: OnceLock<Regex> = OnceLock::new();
    EMAIL_RE.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid regex"))
}

/// Out-of-band delivery channel for issued codes. Email rendering and the
/// actual mail service live outside this crate.
#[async_trait]
pub trait OtpDelivery: Send + Sync {
    async fn deliver(&self, email: &str, code: &str) -> anyhow::Result<()>;
}

/// Delivery stand-in for standalone runs: records the dispatch without
/// exposing the code at info level.
#[derive(Debug, Default)]
pub struct LogDelivery;

#[async_trait]
impl OtpDelivery for LogDelivery {
    async fn deliver(&self, email: &str, code: &str) -> anyhow::Result<()> {
        info!(email, "dispatching OTP code");
        debug!(email, code, "OTP code (debug only)");
        Ok(())
    }
}

/// Session credentials returned by a successful verification.
#[derive(Debug, Clone, Serialize)]
pub struct VerifiedSession {
    pub account_id: String,
    pub email: String,
    pub session_token: String,
}

/// Passwordless login for the field-staff population.
///
/// Issuance is rate-limited per email and invalidates any prior unverified
/// code; verification is single-use and provisions a backing account on
/// first success.
pub struct OtpIssuer {
    store: Arc<dyn Store>,
    limiter: RateLimiter,
    delivery: Arc<dyn OtpDelivery>,
    signer: Arc<SessionSigner>,
}

impl OtpIssuer {
    pub fn new(
        store: Arc<dyn Store>,
        limiter: RateLimiter,
        delivery: Arc<dyn OtpDelivery>,
        signer: Arc<SessionSigner>,
    ) -> Self {
        Self {
            store,
            limiter,
            delivery,
            signer,
        }
    }

    /// Generate and dispatch a 6-digit code for `email`.
    ///
    /// The code is persisted before dispatch, so a delivery failure never
    /// fails the issuance; dispatch runs on a detached task.
    pub async fn request_otp(&self, email: &str) -> Result<()> {
        let email = email.trim().to_lowercase();
        if !email_re().is_match(&email) {
            return Err(GatewayError::Validation("Invalid email address".to_string()));
        }

        self.limiter.check(&email).await?;

        let code = format!("{:06}", rand::thread_rng().gen_range(0..1_000_000u32));
        let now = Utc::now();

        // delete-then-insert keeps at most one live code per principal
        self.store.delete_unverified_otp(&email).await?;
        self.store
            .insert_otp(OtpCode {
                email: email.clone(),
                code: code.clone(),
                expires_at: now + Duration::minutes(OTP_TTL_MINUTES),
                verified: false,
                created_at: now,
            })
            .await?;

        info!(target: "audit", event = "otp_issued", email);

        let delivery = self.delivery.clone();
        tokio::spawn(async move {
            if let Err(err) = delivery.deliver(&email, &code).await {
                warn!(email, error = %err, "OTP delivery failed");
            }
        });

        Ok(())
    }

    /// Consume a code and return session credentials.
    ///
    /// A verified code never verifies again; expired codes never verify.
    /// The backing account is created transparently on first success.
    pub async fn verify_otp(&self, email: &str, code: &str) -> Result<VerifiedSession> {
        let email = email.trim().to_lowercase();
        let now = Utc::now();

        let invalid = || GatewayError::Validation("Invalid or expired code".to_string());

        let active = self
            .store
            .find_active_otp(&email, now)
            .await?
            .ok_or_else(invalid)?;

        if active.code.as_bytes().ct_eq(code.as_bytes()).unwrap_u8() != 1 {
            warn!(target: "audit", event = "otp_rejected", email);
            return Err(invalid());
        }

        self.store.mark_otp_verified(&email, &active.code).await?;

        let account = match self.store.find_account_by_email(&email).await? {
            Some(account) => account,
            None => {
                let account = FieldAccount {
                    id: Uuid::new_v4().to_string(),
                    email: email.clone(),
                    created_at: now,
                };
                self.store.insert_account(account.clone()).await?;
                info!(target: "audit", event = "account_provisioned", email);
                account
            }
        };

        let session_token = self.signer.issue(&account.id, &email)?;
        info!(target: "audit", event = "otp_verified", email, account_id = %account.id);

        Ok(VerifiedSession {
            account_id: account.id,
            email,
            session_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct CaptureDelivery {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl OtpDelivery for CaptureDelivery {
        async fn deliver(&self, email: &str, code: &str) -> anyhow::Result<()> {
            self.sent
                .lock()
                .await
                .push((email.to_string(), code.to_string()));
            Ok(())
        }
    }

    fn issuer(
        store: Arc<MemoryStore>,
        delivery: Arc<dyn OtpDelivery>,
    ) -> OtpIssuer {
        OtpIssuer::new(
            store.clone(),
            RateLimiter::new(store, 900, 5, 900),
            delivery,
            Arc::new(SessionSigner::new("test-session-secret")),
        )
    }

    async fn issued_code(store: &MemoryStore, email: &str) -> String {
        store
            .find_active_otp(email, Utc::now())
            .await
            .unwrap()
            .expect("code should be stored")
            .code
    }

    #[tokio::test]
    async fn test_request_then_verify_issues_session() {
        let store = Arc::new(MemoryStore::new());
        let issuer = issuer(store.clone(), Arc::new(LogDelivery));

        issuer.request_otp("a@x.com").await.unwrap();
        let code = issued_code(&store, "a@x.com").await;
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));

        let session = issuer.verify_otp("a@x.com", &code).await.unwrap();
        assert_eq!(session.email, "a@x.com");
        assert!(!session.session_token.is_empty());
    }

    #[tokio::test]
    async fn test_code_is_single_use() {
        let store = Arc::new(MemoryStore::new());
        let issuer = issuer(store.clone(), Arc::new(LogDelivery));

        issuer.request_otp("a@x.com").await.unwrap();
        let code = issued_code(&store, "a@x.com").await;

        issuer.verify_otp("a@x.com", &code).await.unwrap();
        let err = issuer.verify_otp("a@x.com", &code).await.unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));
    }

    #[tokio::test]
    async fn test_new_code_invalidates_previous() {
        let store = Arc::new(MemoryStore::new());
        let issuer = issuer(store.clone(), Arc::new(LogDelivery));

        issuer.request_otp("a@x.com").await.unwrap();
        let first = issued_code(&store, "a@x.com").await;

        issuer.request_otp("a@x.com").await.unwrap();
        let second = issued_code(&store, "a@x.com").await;

        if first != second {
            assert!(issuer.verify_otp("a@x.com", &first).await.is_err());
        }
        assert!(issuer.verify_otp("a@x.com", &second).await.is_ok());
    }

    #[tokio::test]
    async fn test_expired_code_never_verifies() {
        let store = Arc::new(MemoryStore::new());
        let issuer = issuer(store.clone(), Arc::new(LogDelivery));

        store
            .insert_otp(OtpCode {
                email: "a@x.com".into(),
                code: "123456".into(),
                expires_at: Utc::now() - Duration::minutes(1),
                verified: false,
                created_at: Utc::now() - Duration::minutes(10),
            })
            .await
            .unwrap();

        assert!(issuer.verify_otp("a@x.com", "123456").await.is_err());
    }

    #[tokio::test]
    async fn test_wrong_code_rejected() {
        let store = Arc::new(MemoryStore::new());
        let issuer = issuer(store.clone(), Arc::new(LogDelivery));

        issuer.request_otp("a@x.com").await.unwrap();
        let code = issued_code(&store, "a@x.com").await;
        let wrong = if code == "000000" { "000001" } else { "000000" };

        assert!(issuer.verify_otp("a@x.com", wrong).await.is_err());
        // the stored code is still live after a failed attempt
        assert!(issuer.verify_otp("a@x.com", &code).await.is_ok());
    }

    #[tokio::test]
    async fn test_invalid_email_rejected() {
        let store = Arc::new(MemoryStore::new());
        let issuer = issuer(store, Arc::new(LogDelivery));

        let err = issuer.request_otp("not-an-email").await.unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));
    }

    #[tokio::test]
    async fn test_issuance_is_rate_limited() {
        let store = Arc::new(MemoryStore::new());
        let issuer = issuer(store, Arc::new(LogDelivery));

        for _ in 0..5 {
            issuer.request_otp("a@x.com").await.unwrap();
        }
        let err = issuer.request_otp("a@x.com").await.unwrap_err();
        assert!(matches!(err, GatewayError::RateLimited(_)));
    }

    #[tokio::test]
    async fn test_account_provisioned_once() {
        let store = Arc::new(MemoryStore::new());
        let issuer = issuer(store.clone(), Arc::new(LogDelivery));

        issuer.request_otp("a@x.com").await.unwrap();
        let code = issued_code(&store, "a@x.com").await;
        let first = issuer.verify_otp("a@x.com", &code).await.unwrap();

        issuer.request_otp("a@x.com").await.unwrap();
        let code = issued_code(&store, "a@x.com").await;
        let second = issuer.verify_otp("a@x.com", &code).await.unwrap();

        assert_eq!(first.account_id, second.account_id);
    }

    #[tokio::test]
    async fn test_delivery_receives_the_stored_code() {
        let store = Arc::new(MemoryStore::new());
        let delivery = Arc::new(CaptureDelivery::default());
        let issuer = issuer(store.clone(), delivery.clone());

        issuer.request_otp("a@x.com").await.unwrap();
        let code = issued_code(&store, "a@x.com").await;

        // dispatch runs on a detached task
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let sent = delivery.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], ("a@x.com".to_string(), code));
    }
}
