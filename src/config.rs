use anyhow::{Context, Result};
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use std::fs;

/// Runtime configuration loaded from a JSON file at startup.
///
/// Secrets are never stored in the config file itself: the master encryption
/// key and the session signing secret come from the environment
/// (`POSBRIDGE_MASTER_KEY`, `POSBRIDGE_SESSION_SECRET`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the external POS platform, e.g. https://pos.example.com
    pub pos_base_url: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Default page size for catalog sync fetches.
    #[serde(default = "default_page_size")]
    pub sync_page_size: usize,
    /// Rate-limit window length in seconds.
    #[serde(default = "default_rate_window_secs")]
    pub rate_window_secs: u64,
    /// Maximum attempts per window before a block is imposed.
    #[serde(default = "default_rate_max_attempts")]
    pub rate_max_attempts: u32,
    /// Block duration in seconds once the threshold is crossed.
    #[serde(default = "default_rate_block_secs")]
    pub rate_block_secs: u64,
    /// Interval between schedule poller wakeups, in seconds.
    #[serde(default = "default_poll_interval_secs")]
    pub schedule_poll_secs: u64,
}

fn default_port() -> u16 {
    8088
}

fn default_page_size() -> usize {
    100
}

fn default_rate_window_secs() -> u64 {
    900
}

fn default_rate_max_attempts() -> u32 {
    5
}

fn default_rate_block_secs() -> u64 {
    900
}

fn default_poll_interval_secs() -> u64 {
    300
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let raw = fs::read_to_string(path).context("reading config file")?;
        let cfg: Config = serde_json::from_str(&raw).context("parsing config JSON")?;
        Ok(cfg)
    }

    /// 32-byte AES key for the credential vault, base64-decoded from
    /// `POSBRIDGE_MASTER_KEY`.
    pub fn master_key(&self) -> Result<[u8; 32]> {
        let encoded = std::env::var("POSBRIDGE_MASTER_KEY")
            .context("POSBRIDGE_MASTER_KEY is not set")?;
        let bytes = general_purpose::STANDARD
            .decode(encoded.trim())
            .context("POSBRIDGE_MASTER_KEY is not valid base64")?;
        let key: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| anyhow::anyhow!("master key must be exactly 32 bytes"))?;
        Ok(key)
    }

    /// Secret used to sign OTP session tokens, from
    /// `POSBRIDGE_SESSION_SECRET`.
    pub fn session_secret(&self) -> Result<Vec<u8>> {
        let secret = std::env::var("POSBRIDGE_SESSION_SECRET")
            .context("POSBRIDGE_SESSION_SECRET is not set")?;
        if secret.len() < 16 {
            anyhow::bail!("session secret must be at least 16 bytes");
        }
        Ok(secret.into_bytes())
    }
}
