use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::warn;

use crate::error::{GatewayError, Result};
use crate::store::models::RateLimitRecord;
use crate::store::Store;

/// Fixed-window rate limiter keyed by principal (email or caller IP).
///
/// Shared by the OTP issuer and the credential-save endpoint. Records live
/// in the store so one principal gets one window across entry points and
/// restarts. Once attempts exceed the threshold inside a window, a block is
/// imposed and every attempt is rejected until it lapses.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn Store>,
    window: Duration,
    max_attempts: u32,
    block: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn Store>, window_secs: u64, max_attempts: u32, block_secs: u64) -> Self {
        Self {
            store,
            window: Duration::seconds(window_secs as i64),
            max_attempts,
            block: Duration::seconds(block_secs as i64),
        }
    }

    /// Register one attempt for `key`. Returns Ok when the attempt is
    /// allowed, or `RateLimited` with the remaining block time otherwise.
    pub async fn check(&self, key: &str) -> Result<()> {
        let now = Utc::now();

        let record = self.store.rate_limit_record(key).await?;
        let Some(mut record) = record else {
            self.store
                .put_rate_limit_record(RateLimitRecord {
                    key: key.to_string(),
                    attempts: 1,
                    window_start: now,
                    blocked_until: None,
                })
                .await?;
            return Ok(());
        };

        if let Some(blocked_until) = record.blocked_until {
            if blocked_until > now {
                let remaining = (blocked_until - now).num_seconds().max(1);
                warn!(target: "audit", event = "rate_limited", key, remaining_secs = remaining);
                return Err(GatewayError::RateLimited(format!(
                    "Too many attempts, retry in {remaining} seconds"
                )));
            }
        }

        if now - record.window_start > self.window {
            record.attempts = 1;
            record.window_start = now;
            record.blocked_until = None;
            self.store.put_rate_limit_record(record).await?;
            return Ok(());
        }

        record.attempts += 1;
        if record.attempts > self.max_attempts {
            record.blocked_until = Some(now + self.block);
            let remaining = self.block.num_seconds();
            self.store.put_rate_limit_record(record).await?;
            warn!(target: "audit", event = "rate_limited", key, remaining_secs = remaining);
            return Err(GatewayError::RateLimited(format!(
                "Too many attempts, retry in {remaining} seconds"
            )));
        }

        self.store.put_rate_limit_record(record).await?;
        Ok(())
    }
}
