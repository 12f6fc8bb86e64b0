pub mod models;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::Result;
use models::*;

/// Persistence seam for the integration gateway.
///
/// The relational schema lives behind this trait; handlers only ever need
/// keyed reads, writes, and upserts. `MemoryStore` backs tests and
/// standalone runs; a database-backed implementation slots in behind the
/// same methods.
#[async_trait]
pub trait Store: Send + Sync {
    // credentials
    async fn insert_credential(&self, cred: IntegrationCredential) -> Result<()>;
    async fn credential(&self, id: &str) -> Result<Option<IntegrationCredential>>;
    async fn active_credential_for_owner(
        &self,
        owner_id: &str,
    ) -> Result<Option<IntegrationCredential>>;
    async fn deactivate_credentials_for_owner(&self, owner_id: &str) -> Result<u64>;
    async fn set_credential_token_expiry(
        &self,
        id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()>;

    // gateway clients, tokens, permissions
    async fn insert_gateway_client(&self, client: GatewayClient) -> Result<()>;
    async fn insert_gateway_token(&self, token: GatewayToken) -> Result<()>;
    async fn insert_gateway_permission(&self, perm: GatewayPermission) -> Result<()>;
    /// Token lookup joined with its owning client. Only returns tokens with
    /// `revoked = false` and `expires_at > now`.
    async fn find_valid_gateway_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<(GatewayToken, GatewayClient)>>;
    async fn touch_gateway_token(&self, token: &str, at: DateTime<Utc>) -> Result<()>;
    async fn permissions_for_client(&self, client_id: &str) -> Result<Vec<GatewayPermission>>;
    async fn append_usage_log(&self, row: UsageLog) -> Result<()>;
    async fn usage_logs(&self) -> Result<Vec<UsageLog>>;

    // shared rate limiter
    async fn rate_limit_record(&self, key: &str) -> Result<Option<RateLimitRecord>>;
    async fn put_rate_limit_record(&self, record: RateLimitRecord) -> Result<()>;

    // OTP codes and field accounts
    async fn delete_unverified_otp(&self, email: &str) -> Result<u64>;
    async fn insert_otp(&self, code: OtpCode) -> Result<()>;
    async fn find_active_otp(&self, email: &str, now: DateTime<Utc>) -> Result<Option<OtpCode>>;
    async fn mark_otp_verified(&self, email: &str, code: &str) -> Result<()>;
    async fn find_account_by_email(&self, email: &str) -> Result<Option<FieldAccount>>;
    async fn insert_account(&self, account: FieldAccount) -> Result<()>;

    // schedules and sync logs
    /// Insert-or-replace keyed by (credential_id, sync_type) so at most one
    /// schedule exists per pair.
    async fn upsert_schedule(&self, schedule: SyncSchedule) -> Result<()>;
    async fn schedules_for_credential(&self, credential_id: &str) -> Result<Vec<SyncSchedule>>;
    async fn due_schedules(&self, now: DateTime<Utc>) -> Result<Vec<SyncSchedule>>;
    async fn record_schedule_run(
        &self,
        schedule_id: &str,
        last_run_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
    ) -> Result<()>;
    async fn append_sync_log(&self, log: SyncLog) -> Result<()>;
    async fn sync_logs_for_credential(&self, credential_id: &str) -> Result<Vec<SyncLog>>;

    // synced catalog, upserted by external id
    async fn upsert_category(&self, row: Category) -> Result<()>;
    async fn upsert_product(&self, row: Product) -> Result<()>;
    async fn upsert_inventory(&self, row: InventoryLevel) -> Result<()>;
    async fn categories(&self) -> Result<Vec<Category>>;
    async fn category_count(&self) -> Result<usize>;
    async fn product_count(&self) -> Result<usize>;
    async fn inventory_count(&self) -> Result<usize>;

    // gateway downstream data
    async fn upsert_customer(&self, customer: Customer) -> Result<()>;
    async fn find_customer_by_phone(&self, phone: &str) -> Result<Option<Customer>>;
}

#[derive(Debug, Default)]
struct Inner {
    credentials: HashMap<String, IntegrationCredential>,
    gateway_clients: HashMap<String, GatewayClient>,
    gateway_tokens: HashMap<String, GatewayToken>,
    gateway_permissions: Vec<GatewayPermission>,
    usage_logs: Vec<UsageLog>,
    rate_limits: HashMap<String, RateLimitRecord>,
    otp_codes: Vec<OtpCode>,
    accounts: HashMap<String, FieldAccount>,
    schedules: HashMap<(String, SyncType), SyncSchedule>,
    sync_logs: Vec<SyncLog>,
    categories: HashMap<String, Category>,
    products: HashMap<String, Product>,
    inventory: HashMap<String, InventoryLevel>,
    customers: HashMap<String, Customer>,
}

/// In-memory store guarded by a single RwLock.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_credential(&self, cred: IntegrationCredential) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.credentials.insert(cred.id.clone(), cred);
        Ok(())
    }

    async fn credential(&self, id: &str) -> Result<Option<IntegrationCredential>> {
        let inner = self.inner.read().await;
        Ok(inner.credentials.get(id).cloned())
    }

    async fn active_credential_for_owner(
        &self,
        owner_id: &str,
    ) -> Result<Option<IntegrationCredential>> {
        let inner = self.inner.read().await;
        Ok(inner
            .credentials
            .values()
            .find(|c| c.owner_id == owner_id && c.active)
            .cloned())
    }

    async fn deactivate_credentials_for_owner(&self, owner_id: &str) -> Result<u64> {
        let mut inner = self.inner.write().await;
        let mut deactivated = 0;
        for cred in inner.credentials.values_mut() {
            if cred.owner_id == owner_id && cred.active {
                cred.active = false;
                deactivated += 1;
            }
        }
        Ok(deactivated)
    }

    async fn set_credential_token_expiry(
        &self,
        id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(cred) = inner.credentials.get_mut(id) {
            cred.token_expires_at = Some(expires_at);
        }
        Ok(())
    }

    async fn insert_gateway_client(&self, client: GatewayClient) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.gateway_clients.insert(client.id.clone(), client);
        Ok(())
    }

    async fn insert_gateway_token(&self, token: GatewayToken) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.gateway_tokens.insert(token.token.clone(), token);
        Ok(())
    }

    async fn insert_gateway_permission(&self, perm: GatewayPermission) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.gateway_permissions.push(perm);
        Ok(())
    }

    async fn find_valid_gateway_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<(GatewayToken, GatewayClient)>> {
        let inner = self.inner.read().await;
        let Some(row) = inner.gateway_tokens.get(token) else {
            return Ok(None);
        };
        if row.revoked || row.expires_at <= now {
            return Ok(None);
        }
        let Some(client) = inner.gateway_clients.get(&row.client_id) else {
            return Ok(None);
        };
        Ok(Some((row.clone(), client.clone())))
    }

    async fn touch_gateway_token(&self, token: &str, at: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(row) = inner.gateway_tokens.get_mut(token) {
            row.last_used_at = Some(at);
        }
        Ok(())
    }

    async fn permissions_for_client(&self, client_id: &str) -> Result<Vec<GatewayPermission>> {
        let inner = self.inner.read().await;
        Ok(inner
            .gateway_permissions
            .iter()
            .filter(|p| p.client_id == client_id)
            .cloned()
            .collect())
    }

    async fn append_usage_log(&self, row: UsageLog) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.usage_logs.push(row);
        Ok(())
    }

    async fn usage_logs(&self) -> Result<Vec<UsageLog>> {
        let inner = self.inner.read().await;
        Ok(inner.usage_logs.clone())
    }

    async fn rate_limit_record(&self, key: &str) -> Result<Option<RateLimitRecord>> {
        let inner = self.inner.read().await;
        Ok(inner.rate_limits.get(key).cloned())
    }

    async fn put_rate_limit_record(&self, record: RateLimitRecord) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.rate_limits.insert(record.key.clone(), record);
        Ok(())
    }

    async fn delete_unverified_otp(&self, email: &str) -> Result<u64> {
        let mut inner = self.inner.write().await;
        let before = inner.otp_codes.len();
        inner
            .otp_codes
            .retain(|c| !(c.email == email && !c.verified));
        Ok((before - inner.otp_codes.len()) as u64)
    }

    async fn insert_otp(&self, code: OtpCode) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.otp_codes.push(code);
        Ok(())
    }

    async fn find_active_otp(&self, email: &str, now: DateTime<Utc>) -> Result<Option<OtpCode>> {
        let inner = self.inner.read().await;
        Ok(inner
            .otp_codes
            .iter()
            .find(|c| c.email == email && !c.verified && c.expires_at > now)
            .cloned())
    }

    async fn mark_otp_verified(&self, email: &str, code: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(row) = inner
            .otp_codes
            .iter_mut()
            .find(|c| c.email == email && c.code == code && !c.verified)
        {
            row.verified = true;
        }
        Ok(())
    }

    async fn find_account_by_email(&self, email: &str) -> Result<Option<FieldAccount>> {
        let inner = self.inner.read().await;
        Ok(inner.accounts.values().find(|a| a.email == email).cloned())
    }

    async fn insert_account(&self, account: FieldAccount) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.accounts.insert(account.id.clone(), account);
        Ok(())
    }

    async fn upsert_schedule(&self, schedule: SyncSchedule) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner
            .schedules
            .insert((schedule.credential_id.clone(), schedule.sync_type), schedule);
        Ok(())
    }

    async fn schedules_for_credential(&self, credential_id: &str) -> Result<Vec<SyncSchedule>> {
        let inner = self.inner.read().await;
        let mut out: Vec<SyncSchedule> = inner
            .schedules
            .values()
            .filter(|s| s.credential_id == credential_id)
            .cloned()
            .collect();
        out.sort_by_key(|s| s.sync_type);
        Ok(out)
    }

    async fn due_schedules(&self, now: DateTime<Utc>) -> Result<Vec<SyncSchedule>> {
        let inner = self.inner.read().await;
        Ok(inner
            .schedules
            .values()
            .filter(|s| s.enabled && s.next_run_at <= now)
            .cloned()
            .collect())
    }

    async fn record_schedule_run(
        &self,
        schedule_id: &str,
        last_run_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(schedule) = inner
            .schedules
            .values_mut()
            .find(|s| s.id == schedule_id)
        {
            schedule.last_run_at = Some(last_run_at);
            schedule.next_run_at = next_run_at;
        }
        Ok(())
    }

    async fn append_sync_log(&self, log: SyncLog) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.sync_logs.push(log);
        Ok(())
    }

    async fn sync_logs_for_credential(&self, credential_id: &str) -> Result<Vec<SyncLog>> {
        let inner = self.inner.read().await;
        Ok(inner
            .sync_logs
            .iter()
            .filter(|l| l.credential_id == credential_id)
            .cloned()
            .collect())
    }

    async fn upsert_category(&self, row: Category) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.categories.insert(row.external_id.clone(), row);
        Ok(())
    }

    async fn upsert_product(&self, row: Product) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.products.insert(row.external_id.clone(), row);
        Ok(())
    }

    async fn upsert_inventory(&self, row: InventoryLevel) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner
            .inventory
            .insert(row.product_external_id.clone(), row);
        Ok(())
    }

    async fn categories(&self) -> Result<Vec<Category>> {
        let inner = self.inner.read().await;
        let mut out: Vec<Category> = inner.categories.values().cloned().collect();
        out.sort_by(|a, b| a.external_id.cmp(&b.external_id));
        Ok(out)
    }

    async fn category_count(&self) -> Result<usize> {
        Ok(self.inner.read().await.categories.len())
    }

    async fn product_count(&self) -> Result<usize> {
        Ok(self.inner.read().await.products.len())
    }

    async fn inventory_count(&self) -> Result<usize> {
        Ok(self.inner.read().await.inventory.len())
    }

    async fn upsert_customer(&self, customer: Customer) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.customers.insert(customer.id.clone(), customer);
        Ok(())
    }

    async fn find_customer_by_phone(&self, phone: &str) -> Result<Option<Customer>> {
        let inner = self.inner.read().await;
        Ok(inner.customers.values().find(|c| c.phone == phone).cloned())
    }
}
