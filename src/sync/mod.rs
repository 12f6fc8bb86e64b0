pub mod catalog;
pub mod schedule;

use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::broker::TokenBroker;
use crate::error::{GatewayError, Result};
use crate::pos::PosClient;
use crate::store::models::{IntegrationCredential, SyncLog, SyncStatus, SyncType};
use crate::store::Store;

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Overrides the configured page size for this invocation.
    pub page_size: Option<usize>,
}

/// Per-type record counts for one orchestrator invocation, in-memory only.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub results: BTreeMap<SyncType, u64>,
}

/// Reconciles POS catalog data into the local store.
///
/// Each invocation processes the requested types in the caller's declared
/// order and writes exactly one `SyncLog` row bracketing the whole call:
/// `success` when every type completed, `failed` with the first error
/// otherwise. Types already synced before a failure keep their upserts; the
/// per-type breakdown of a failed run is not persisted.
pub struct SyncOrchestrator {
    store: Arc<dyn Store>,
    broker: Arc<TokenBroker>,
    pos: Arc<PosClient>,
    default_page_size: usize,
}

impl SyncOrchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        broker: Arc<TokenBroker>,
        pos: Arc<PosClient>,
        default_page_size: usize,
    ) -> Self {
        Self {
            store,
            broker,
            pos,
            default_page_size,
        }
    }

    pub async fn sync_data(
        &self,
        credential_id: &str,
        types: &[SyncType],
        options: &SyncOptions,
    ) -> Result<SyncReport> {
        if types.is_empty() {
            return Err(GatewayError::Validation(
                "No sync types requested".to_string(),
            ));
        }

        let started_at = Utc::now();
        let credential = self
            .store
            .credential(credential_id)
            .await?
            .ok_or_else(|| GatewayError::Credential("Credential not found".to_string()))?;
        if !credential.active {
            return Err(GatewayError::Credential(
                "Credential is deactivated".to_string(),
            ));
        }

        let page_size = options.page_size.unwrap_or(self.default_page_size).max(1);
        let joined_types = types
            .iter()
            .map(|t| t.as_str())
            .collect::<Vec<_>>()
            .join(",");

        let mut results: BTreeMap<SyncType, u64> = BTreeMap::new();
        let outcome = match guard_token_expiry(&credential, started_at) {
            Ok(()) => {
                self.run_types(&credential, types, page_size, &mut results)
                    .await
            }
            Err(err) => Err(err),
        };
        let records_synced: u64 = results.values().sum();
        let finished_at = Utc::now();

        match outcome {
            Ok(()) => {
                self.store
                    .append_sync_log(SyncLog {
                        id: Uuid::new_v4().to_string(),
                        credential_id: credential.id.clone(),
                        sync_type: joined_types,
                        status: SyncStatus::Success,
                        records_synced,
                        error_message: None,
                        started_at,
                        finished_at,
                    })
                    .await?;
                info!(
                    target: "audit",
                    event = "sync_completed",
                    credential_id = %credential.id,
                    records = records_synced
                );
                Ok(SyncReport { results })
            }
            Err(err) => {
                let message = err.to_string();
                self.store
                    .append_sync_log(SyncLog {
                        id: Uuid::new_v4().to_string(),
                        credential_id: credential.id.clone(),
                        sync_type: joined_types,
                        status: SyncStatus::Failed,
                        records_synced,
                        error_message: Some(message.clone()),
                        started_at,
                        finished_at,
                    })
                    .await?;
                warn!(
                    target: "audit",
                    event = "sync_failed",
                    credential_id = %credential.id,
                    error = %message
                );
                Err(err)
            }
        }
    }

    async fn run_types(
        &self,
        credential: &IntegrationCredential,
        types: &[SyncType],
        page_size: usize,
        results: &mut BTreeMap<SyncType, u64>,
    ) -> Result<()> {
        let token = self.broker.acquire_token(credential).await?;

        for sync_type in types {
            let count = match sync_type {
                SyncType::Categories => self.sync_categories(&token, page_size).await?,
                SyncType::Products => self.sync_products(&token, page_size).await?,
                SyncType::Inventory => self.sync_inventory(&token, page_size).await?,
                SyncType::FullProducts => self.sync_full_products(&token, page_size).await?,
            };
            results.insert(*sync_type, count);
        }
        Ok(())
    }

    async fn sync_categories(&self, token: &str, page_size: usize) -> Result<u64> {
        let mut page = 1u32;
        let mut count = 0u64;
        loop {
            let batch = self.pos.fetch_categories(token, page, page_size).await?;
            let fetched = batch.len();
            let now = Utc::now();
            for item in batch {
                self.store
                    .upsert_category(catalog::category_from_pos(item, now))
                    .await?;
                count += 1;
            }
            if fetched < page_size {
                break;
            }
            page += 1;
        }
        Ok(count)
    }

    async fn sync_products(&self, token: &str, page_size: usize) -> Result<u64> {
        let mut page = 1u32;
        let mut count = 0u64;
        loop {
            let batch = self.pos.fetch_products(token, page, page_size).await?;
            let fetched = batch.len();
            let now = Utc::now();
            for item in batch {
                self.store
                    .upsert_product(catalog::product_from_pos(item, now))
                    .await?;
                count += 1;
            }
            if fetched < page_size {
                break;
            }
            page += 1;
        }
        Ok(count)
    }

    async fn sync_inventory(&self, token: &str, page_size: usize) -> Result<u64> {
        let mut page = 1u32;
        let mut count = 0u64;
        loop {
            let batch = self.pos.fetch_inventory(token, page, page_size).await?;
            let fetched = batch.len();
            let now = Utc::now();
            for item in batch {
                self.store
                    .upsert_inventory(catalog::inventory_from_pos(item, now))
                    .await?;
                count += 1;
            }
            if fetched < page_size {
                break;
            }
            page += 1;
        }
        Ok(count)
    }

    async fn sync_full_products(&self, token: &str, page_size: usize) -> Result<u64> {
        let mut page = 1u32;
        let mut count = 0u64;
        loop {
            let batch = self.pos.fetch_full_products(token, page, page_size).await?;
            let fetched = batch.len();
            let now = Utc::now();
            for item in batch {
                let (product, inventory) = catalog::full_product_rows(item, now);
                self.store.upsert_product(product).await?;
                self.store.upsert_inventory(inventory).await?;
                count += 1;
            }
            if fetched < page_size {
                break;
            }
            page += 1;
        }
        Ok(count)
    }
}

/// Fail fast on a credential whose last exchanged token already lapsed; the
/// upstream call would be rejected anyway. Runs inside the logged section so
/// the failure lands in the audit trail like any other run error.
fn guard_token_expiry(
    credential: &IntegrationCredential,
    now: chrono::DateTime<Utc>,
) -> Result<()> {
    if let Some(expires_at) = credential.token_expires_at {
        if expires_at <= now {
            return Err(GatewayError::Credential(
                "POS token expired, reconfigure the integration".to_string(),
            ));
        }
    }
    Ok(())
}
