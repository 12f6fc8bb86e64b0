use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::TtlCache;
use crate::error::{GatewayError, Result};
use crate::store::models::{GatewayClient, GatewayToken, UsageLog};
use crate::store::Store;

const TOKEN_CACHE_TTL: Duration = Duration::from_secs(60);
const PERMISSION_CACHE_TTL: Duration = Duration::from_secs(300);
const RESPONSE_CACHE_TTL: Duration = Duration::from_secs(60);

pub const CUSTOMER_LOOKUP_RESOURCE: &str = "customers/lookup";

/// True when `grant` covers `resource`: exact match, namespace wildcard
/// (`customers/*`), or the global wildcard `*`.
fn grant_matches(grant: &str, resource: &str) -> bool {
    if grant == "*" || grant == resource {
        return true;
    }
    if let Some(prefix) = grant.strip_suffix("/*") {
        return resource
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'));
    }
    false
}

/// Lookup input is matched on digits only.
pub fn normalize_phone(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

#[derive(Debug, Clone)]
pub struct GatewayReply {
    pub data: Value,
    pub cache_hit: bool,
}

/// Validation/authorization/caching chain guarding inbound third-party API
/// calls.
///
/// Every request passes, in order: bearer validation, client-active check,
/// permission check, payload resolution (with response caching), then
/// fire-and-forget usage accounting. Any failed stage short-circuits with a
/// typed error; the handler maps it to the right status.
pub struct ApiGateway {
    store: Arc<dyn Store>,
    token_cache: TtlCache<(GatewayToken, GatewayClient)>,
    permission_cache: TtlCache<bool>,
    response_cache: TtlCache<Value>,
}

impl ApiGateway {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            token_cache: TtlCache::new(TOKEN_CACHE_TTL),
            permission_cache: TtlCache::new(PERMISSION_CACHE_TTL),
            response_cache: TtlCache::new(RESPONSE_CACHE_TTL),
        }
    }

    async fn authenticate(&self, bearer: Option<&str>) -> Result<(GatewayToken, GatewayClient)> {
        let token = bearer
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| GatewayError::Auth("Invalid token".to_string()))?;

        if let Some(entry) = self.token_cache.get(token).await {
            return Ok(entry);
        }

        match self
            .store
            .find_valid_gateway_token(token, Utc::now())
            .await?
        {
            Some(entry) => {
                self.token_cache
                    .put(token.to_string(), entry.clone())
                    .await;
                Ok(entry)
            }
            None => {
                warn!(target: "audit", event = "token_rejected");
                Err(GatewayError::Auth("Invalid token".to_string()))
            }
        }
    }

    async fn authorize(&self, client_id: &str, resource: &str) -> Result<()> {
        let cache_key = format!("{client_id}:{resource}");
        let permitted = match self.permission_cache.get(&cache_key).await {
            Some(permitted) => permitted,
            None => {
                let grants = self.store.permissions_for_client(client_id).await?;
                let permitted = grants
                    .iter()
                    .any(|g| g.can_read && grant_matches(&g.resource, resource));
                self.permission_cache.put(cache_key, permitted).await;
                permitted
            }
        };

        if permitted {
            Ok(())
        } else {
            warn!(target: "audit", event = "permission_denied", client_id, resource);
            Err(GatewayError::Permission(
                "Insufficient permissions".to_string(),
            ))
        }
    }

    /// Detached usage accounting; never blocks or fails the response.
    fn record_usage(&self, token: String, client_id: String, caller_ip: String, endpoint: &str) {
        let store = self.store.clone();
        let endpoint = endpoint.to_string();
        tokio::spawn(async move {
            let now = Utc::now();
            if let Err(err) = store.touch_gateway_token(&token, now).await {
                warn!(error = %err, "failed to update token last-used timestamp");
            }
            let row = UsageLog {
                id: Uuid::new_v4().to_string(),
                client_id,
                caller_ip,
                endpoint,
                status_code: 200,
                created_at: now,
            };
            if let Err(err) = store.append_usage_log(row).await {
                warn!(error = %err, "failed to append usage log");
            }
        });
    }

    /// Full pipeline for the customer lookup endpoint.
    pub async fn lookup_customer(
        &self,
        bearer: Option<&str>,
        phone: &str,
        caller_ip: &str,
    ) -> Result<GatewayReply> {
        let (token_row, client) = self.authenticate(bearer).await?;

        if !client.active {
            warn!(target: "audit", event = "client_suspended", client_id = %client.id);
            return Err(GatewayError::Permission("Client suspended".to_string()));
        }

        self.authorize(&client.id, CUSTOMER_LOOKUP_RESOURCE).await?;

        let normalized = normalize_phone(phone);
        if normalized.is_empty() {
            return Err(GatewayError::Validation(
                "Missing or invalid phone parameter".to_string(),
            ));
        }

        let cache_key = format!("{CUSTOMER_LOOKUP_RESOURCE}:{normalized}");
        if let Some(data) = self.response_cache.get(&cache_key).await {
            debug!(phone = %normalized, "lookup served from response cache");
            self.record_usage(
                token_row.token,
                client.id,
                caller_ip.to_string(),
                CUSTOMER_LOOKUP_RESOURCE,
            );
            return Ok(GatewayReply {
                data,
                cache_hit: true,
            });
        }

        let customer = self
            .store
            .find_customer_by_phone(&normalized)
            .await?
            .ok_or_else(|| GatewayError::NotFound("Customer not found".to_string()))?;

        let data = serde_json::to_value(&customer)
            .map_err(|e| GatewayError::Store(format!("serializing customer: {e}")))?;
        self.response_cache.put(cache_key, data.clone()).await;

        self.record_usage(
            token_row.token,
            client.id,
            caller_ip.to_string(),
            CUSTOMER_LOOKUP_RESOURCE,
        );
        Ok(GatewayReply {
            data,
            cache_hit: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::{Customer, GatewayPermission};
    use crate::store::MemoryStore;

    async fn seed(store: &MemoryStore, grant: &str, client_active: bool) {
        let now = Utc::now();
        store
            .insert_gateway_client(GatewayClient {
                id: "client-1".into(),
                name: "Partner".into(),
                active: client_active,
            })
            .await
            .unwrap();
        store
            .insert_gateway_token(GatewayToken {
                token: "tok-1".into(),
                client_id: "client-1".into(),
                revoked: false,
                expires_at: now + chrono::Duration::hours(1),
                last_used_at: None,
            })
            .await
            .unwrap();
        if !grant.is_empty() {
            store
                .insert_gateway_permission(GatewayPermission {
                    client_id: "client-1".into(),
                    resource: grant.into(),
                    can_read: true,
                })
                .await
                .unwrap();
        }
        store
            .upsert_customer(Customer {
                id: "cust-1".into(),
                phone: "15550001111".into(),
                full_name: "Jordan Li".into(),
                email: None,
                loyalty_points: 120,
            })
            .await
            .unwrap();
    }

    #[test]
    fn test_grant_matching() {
        assert!(grant_matches("*", "customers/lookup"));
        assert!(grant_matches("customers/lookup", "customers/lookup"));
        assert!(grant_matches("customers/*", "customers/lookup"));
        assert!(!grant_matches("customers/*", "customersextra/lookup"));
        assert!(!grant_matches("orders/*", "customers/lookup"));
        assert!(!grant_matches("customers/export", "customers/lookup"));
    }

    #[test]
    fn test_normalize_phone() {
        assert_eq!(normalize_phone("+1 (555) 000-1111"), "15550001111");
        assert_eq!(normalize_phone("abc"), "");
    }

    #[tokio::test]
    async fn test_missing_bearer_is_auth_error() {
        let store = Arc::new(MemoryStore::new());
        let gateway = ApiGateway::new(store);
        let err = gateway
            .lookup_customer(None, "15550001111", "10.0.0.1")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Auth(_)));
        assert_eq!(err.to_string(), "Invalid token");
    }

    #[tokio::test]
    async fn test_unknown_token_is_auth_error() {
        let store = Arc::new(MemoryStore::new());
        let gateway = ApiGateway::new(store);
        let err = gateway
            .lookup_customer(Some("nope"), "15550001111", "10.0.0.1")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Auth(_)));
    }

    #[tokio::test]
    async fn test_suspended_client_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "*", false).await;
        let gateway = ApiGateway::new(store);
        let err = gateway
            .lookup_customer(Some("tok-1"), "15550001111", "10.0.0.1")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Client suspended");
    }

    #[tokio::test]
    async fn test_no_grant_is_permission_error() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "", true).await;
        let gateway = ApiGateway::new(store);
        let err = gateway
            .lookup_customer(Some("tok-1"), "15550001111", "10.0.0.1")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Insufficient permissions");
    }

    #[tokio::test]
    async fn test_wildcard_grant_passes_any_resource() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "*", true).await;
        let gateway = ApiGateway::new(store);
        let reply = gateway
            .lookup_customer(Some("tok-1"), "+1 (555) 000-1111", "10.0.0.1")
            .await
            .unwrap();
        assert!(!reply.cache_hit);
        assert_eq!(reply.data["full_name"], "Jordan Li");
    }

    #[tokio::test]
    async fn test_namespace_grant_passes() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "customers/*", true).await;
        let gateway = ApiGateway::new(store);
        assert!(gateway
            .lookup_customer(Some("tok-1"), "15550001111", "10.0.0.1")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_second_lookup_is_cache_hit() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "*", true).await;
        let gateway = ApiGateway::new(store);

        let first = gateway
            .lookup_customer(Some("tok-1"), "15550001111", "10.0.0.1")
            .await
            .unwrap();
        assert!(!first.cache_hit);

        let second = gateway
            .lookup_customer(Some("tok-1"), "1-555-000-1111", "10.0.0.1")
            .await
            .unwrap();
        assert!(second.cache_hit);
        assert_eq!(first.data, second.data);
    }

    #[tokio::test]
    async fn test_unknown_phone_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "*", true).await;
        let gateway = ApiGateway::new(store);
        let err = gateway
            .lookup_customer(Some("tok-1"), "19990000000", "10.0.0.1")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_usage_logged_and_token_touched() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "*", true).await;
        let gateway = ApiGateway::new(store.clone());

        gateway
            .lookup_customer(Some("tok-1"), "15550001111", "203.0.113.9")
            .await
            .unwrap();

        // accounting runs on a detached task
        tokio::time::sleep(Duration::from_millis(50)).await;
        let logs = store.usage_logs().await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].client_id, "client-1");
        assert_eq!(logs[0].caller_ip, "203.0.113.9");
        assert_eq!(logs[0].endpoint, CUSTOMER_LOOKUP_RESOURCE);

        let (token_row, _) = store
            .find_valid_gateway_token("tok-1", Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert!(token_row.last_used_at.is_some());
    }

    #[tokio::test]
    async fn test_token_cache_serves_within_ttl() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "*", true).await;
        let gateway = ApiGateway::new(store.clone());

        gateway
            .lookup_customer(Some("tok-1"), "15550001111", "10.0.0.1")
            .await
            .unwrap();

        // revoke in the store; the cached entry still answers inside its TTL
        store
            .insert_gateway_token(GatewayToken {
                token: "tok-1".into(),
                client_id: "client-1".into(),
                revoked: true,
                expires_at: Utc::now() + chrono::Duration::hours(1),
                last_used_at: None,
            })
            .await
            .unwrap();

        assert!(gateway
            .lookup_customer(Some("tok-1"), "15550001111", "10.0.0.1")
            .await
            .is_ok());
    }
}
