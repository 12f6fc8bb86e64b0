use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Encrypted third-party credential for one POS integration.
///
/// At most one row per owner carries `active = true`; rotation deactivates
/// prior rows instead of deleting them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationCredential {
    pub id: String,
    pub owner_id: String,
    pub retailer_name: String,
    pub client_id: String,
    /// base64(nonce || ciphertext), sealed by the credential vault. Never
    /// logged or returned in responses.
    pub encrypted_secret: String,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncType {
    Categories,
    Products,
    Inventory,
    FullProducts,
}

impl SyncType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncType::Categories => "categories",
            SyncType::Products => "products",
            SyncType::Inventory => "inventory",
            SyncType::FullProducts => "full_products",
        }
    }
}

impl std::fmt::Display for SyncType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncFrequency {
    Hourly,
    Daily,
    Custom,
}

/// Recurring sync configuration, one row per (credential, sync_type).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSchedule {
    pub id: String,
    pub credential_id: String,
    pub sync_type: SyncType,
    pub frequency: SyncFrequency,
    /// Required when `frequency` is `custom`; must be >= 1.
    pub custom_interval_hours: Option<u32>,
    pub enabled: bool,
    pub next_run_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Success,
    Partial,
    Failed,
}

/// Append-only audit row, one per orchestrator invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncLog {
    pub id: String,
    pub credential_id: String,
    /// Comma-joined list of the requested types, in invocation order.
    pub sync_type: String,
    pub status: SyncStatus,
    pub records_synced: u64,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Bearer token issued to an external OAuth API client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayToken {
    pub token: String,
    pub client_id: String,
    pub revoked: bool,
    pub expires_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayClient {
    pub id: String,
    pub name: String,
    pub active: bool,
}

/// Read grant for a client on a resource. `resource` may be an exact name
/// (`customers/lookup`), a namespace wildcard (`customers/*`), or the global
/// wildcard `*`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayPermission {
    pub client_id: String,
    pub resource: String,
    pub can_read: bool,
}

/// Per-principal attempt counter for the shared rate limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitRecord {
    pub key: String,
    pub attempts: u32,
    pub window_start: DateTime<Utc>,
    pub blocked_until: Option<DateTime<Utc>>,
}

/// Short-lived one-time passcode. At most one unverified, unexpired code per
/// email is honored; issuing a new code deletes prior ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtpCode {
    pub email: String,
    pub code: String,
    pub expires_at: DateTime<Utc>,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
}

/// Backing account for the OTP-authenticated population, provisioned on
/// first successful verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldAccount {
    pub id: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

/// Usage-log row appended after every successful gateway request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageLog {
    pub id: String,
    pub client_id: String,
    pub caller_ip: String,
    pub endpoint: String,
    pub status_code: u16,
    pub created_at: DateTime<Utc>,
}

/// Synced POS category. `parent_external_id` references another category's
/// `external_id`; unmatched references are treated as orphans when building
/// the display tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub external_id: String,
    pub name: String,
    pub parent_external_id: Option<String>,
    pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub external_id: String,
    pub sku: String,
    pub name: String,
    pub price_cents: i64,
    pub category_external_id: Option<String>,
    pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryLevel {
    pub product_external_id: String,
    pub quantity: i64,
    pub synced_at: DateTime<Utc>,
}

/// CRM customer record served through the gateway lookup endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    /// Digits only; lookup input is normalized before matching.
    pub phone: String,
    pub full_name: String,
    pub email: Option<String>,
    pub loyalty_points: i64,
}
