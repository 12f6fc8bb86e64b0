use base64::{engine::general_purpose, Engine as _};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::{GatewayError, Result};

/// Symmetric vault for third-party client secrets.
///
/// AES-256-GCM with a random nonce per seal; blob layout is
/// base64(nonce || ciphertext+tag). The key comes from process
/// configuration and is never stored alongside the data. Plaintext secrets
/// must never be logged or returned in responses.
pub struct SecretVault {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl SecretVault {
    pub fn new(key_bytes: &[u8; 32]) -> Self {
        let unbound =
            UnboundKey::new(&AES_256_GCM, key_bytes).expect("AES-256 key is always 32 bytes");
        Self {
            key: LessSafeKey::new(unbound),
            rng: SystemRandom::new(),
        }
    }

    pub fn seal(&self, plaintext: &str) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| GatewayError::Credential("secret encryption failed".to_string()))?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut in_out = plaintext.as_bytes().to_vec();
        self.key
            .seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| GatewayError::Credential("secret encryption failed".to_string()))?;

        let mut blob = nonce_bytes.to_vec();
        blob.extend_from_slice(&in_out);
        Ok(general_purpose::STANDARD.encode(blob))
    }

    pub fn open(&self, blob: &str) -> Result<String> {
        let decoded = general_purpose::STANDARD
            .decode(blob)
            .map_err(|_| GatewayError::Credential("invalid credential secret".to_string()))?;
        if decoded.len() < NONCE_LEN {
            return Err(GatewayError::Credential(
                "invalid credential secret".to_string(),
            ));
        }

        let (nonce_bytes, ciphertext) = decoded.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| GatewayError::Credential("invalid credential secret".to_string()))?;

        let mut in_out = ciphertext.to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| GatewayError::Credential("invalid credential secret".to_string()))?;

        String::from_utf8(plaintext.to_vec())
            .map_err(|_| GatewayError::Credential("invalid credential secret".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_roundtrip() {
        let vault = SecretVault::new(&[42u8; 32]);
        let blob = vault.seal("super-secret-client-key").unwrap();
        assert_ne!(blob, "super-secret-client-key");
        assert_eq!(vault.open(&blob).unwrap(), "super-secret-client-key");
    }

    #[test]
    fn test_nonce_varies_per_seal() {
        let vault = SecretVault::new(&[42u8; 32]);
        let a = vault.seal("same-secret").unwrap();
        let b = vault.seal("same-secret").unwrap();
        assert_ne!(a, b);
        assert_eq!(vault.open(&a).unwrap(), vault.open(&b).unwrap());
    }

    #[test]
    fn test_open_with_wrong_key_fails() {
        let vault = SecretVault::new(&[1u8; 32]);
        let other = SecretVault::new(&[2u8; 32]);
        let blob = vault.seal("secret").unwrap();
        assert!(other.open(&blob).is_err());
    }

    #[test]
    fn test_open_rejects_garbage() {
        let vault = SecretVault::new(&[1u8; 32]);
        assert!(vault.open("not base64!!!").is_err());
        assert!(vault.open("c2hvcnQ=").is_err()); // shorter than a nonce
    }
}
