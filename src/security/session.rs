use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use ring::hmac;
use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};

/// Claims embedded in an OTP session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub account_id: String,
    pub email: String,
    pub issued_at: i64,
}

/// Stateless session tokens for the OTP-authenticated population.
///
/// Token layout: base64url(claims JSON || HMAC-SHA256 signature). Verify
/// enforces a maximum age so stolen tokens stop working without a revocation
/// list.
pub struct SessionSigner {
    secret: Vec<u8>,
}

impl SessionSigner {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    pub fn issue(&self, account_id: &str, email: &str) -> Result<String> {
        let claims = SessionClaims {
            account_id: account_id.to_string(),
            email: email.to_string(),
            issued_at: Utc::now().timestamp(),
        };
        let payload = serde_json::to_vec(&claims)
            .map_err(|e| GatewayError::Store(format!("serializing session claims: {e}")))?;

        let key = hmac::Key::new(hmac::HMAC_SHA256, &self.secret);
        let signature = hmac::sign(&key, &payload);

        let mut signed = payload;
        signed.extend_from_slice(signature.as_ref());
        Ok(general_purpose::URL_SAFE_NO_PAD.encode(signed))
    }

    pub fn verify(&self, token: &str, max_age_secs: i64) -> Result<SessionClaims> {
        let invalid = || GatewayError::Auth("Invalid session".to_string());

        let decoded = general_purpose::URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| invalid())?;

        // HMAC-SHA256 signature is the trailing 32 bytes
        if decoded.len() <= 32 {
            return Err(invalid());
        }
        let (payload, signature) = decoded.split_at(decoded.len() - 32);

        let key = hmac::Key::new(hmac::HMAC_SHA256, &self.secret);
        hmac::verify(&key, payload, signature).map_err(|_| invalid())?;

        let claims: SessionClaims = serde_json::from_slice(payload).map_err(|_| invalid())?;
        if Utc::now().timestamp() - claims.issued_at > max_age_secs {
            return Err(GatewayError::Auth("Session expired".to_string()));
        }
        Ok(claims)
    }
}
