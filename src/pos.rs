use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::{GatewayError, Result};

const HTTP_TIMEOUT_SECS: u64 = 15;

/// Successful client-credentials exchange against the POS identity endpoint.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_in: u64,
}

/// One page of a catalog listing. The fetch loop stops when a page comes
/// back shorter than the requested page size.
#[derive(Debug, Deserialize)]
struct PageEnvelope<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PosCategory {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PosProduct {
    pub id: String,
    pub sku: String,
    pub name: String,
    pub price_cents: i64,
    #[serde(default)]
    pub category_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PosInventory {
    pub product_id: String,
    pub quantity: i64,
}

/// Consolidated product + stock record served by the POS "full products"
/// listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PosFullProduct {
    pub id: String,
    pub sku: String,
    pub name: String,
    pub price_cents: i64,
    #[serde(default)]
    pub category_id: Option<String>,
    pub quantity: i64,
}

/// Typed client for the external POS platform.
///
/// Every call carries a bounded timeout; a timeout is reported as a plain
/// failure, never retried here.
#[derive(Debug, Clone)]
pub struct PosClient {
    base_url: String,
    http: Client,
    timeout: Duration,
}

impl PosClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: Client::new(),
            timeout: Duration::from_secs(HTTP_TIMEOUT_SECS),
        }
    }

    /// Client-credentials handshake. The decrypted secret only ever
    /// transits here; it is not logged.
    pub async fn exchange_token(
        &self,
        client_id: &str,
        client_secret: &str,
    ) -> Result<TokenResponse> {
        let url = format!("{}/oauth/token", self.base_url);
        debug!(client_id, "exchanging client credentials for bearer token");

        let response = self
            .http
            .post(&url)
            .timeout(self.timeout)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", client_id),
                ("client_secret", client_secret),
            ])
            .send()
            .await
            .map_err(|e| GatewayError::TokenAcquisition(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::TokenAcquisition(format!(
                "identity endpoint returned {status}: {body}"
            )));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| GatewayError::TokenAcquisition(format!("malformed token response: {e}")))
    }

    /// Cheap authenticated call used to validate freshly saved credentials.
    pub async fn ping(&self, token: &str) -> Result<()> {
        let url = format!("{}/api/v1/ping", self.base_url);
        let response = self
            .http
            .get(&url)
            .timeout(self.timeout)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| GatewayError::ExternalApi(e.to_string()))?;

        if !response.status().is_success() {
            return Err(GatewayError::ExternalApi(format!(
                "ping returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn fetch_page<T: DeserializeOwned>(
        &self,
        token: &str,
        resource: &str,
        page: u32,
        page_size: usize,
    ) -> Result<Vec<T>> {
        let url = format!(
            "{}/api/v1/catalog/{}?page={}&page_size={}",
            self.base_url, resource, page, page_size
        );
        trace!(url = %url, "fetching catalog page");

        let response = self
            .http
            .get(&url)
            .timeout(self.timeout)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| GatewayError::ExternalApi(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::ExternalApi(format!(
                "{resource} page {page} returned {status}: {body}"
            )));
        }

        let envelope: PageEnvelope<T> = response
            .json()
            .await
            .map_err(|e| GatewayError::ExternalApi(format!("malformed {resource} page: {e}")))?;
        Ok(envelope.items)
    }

    pub async fn fetch_categories(
        &self,
        token: &str,
        page: u32,
        page_size: usize,
    ) -> Result<Vec<PosCategory>> {
        self.fetch_page(token, "categories", page, page_size).await
    }

    pub async fn fetch_products(
        &self,
        token: &str,
        page: u32,
        page_size: usize,
    ) -> Result<Vec<PosProduct>> {
        self.fetch_page(token, "products", page, page_size).await
    }

    pub async fn fetch_inventory(
        &self,
        token: &str,
        page: u32,
        page_size: usize,
    ) -> Result<Vec<PosInventory>> {
        self.fetch_page(token, "inventory", page, page_size).await
    }

    pub async fn fetch_full_products(
        &self,
        token: &str,
        page: u32,
        page_size: usize,
    ) -> Result<Vec<PosFullProduct>> {
        self.fetch_page(token, "full-products", page, page_size)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    #[tokio::test]
    async fn test_exchange_token_parses_response() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/oauth/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "client_credentials".into()),
                Matcher::UrlEncoded("client_id".into(), "cid".into()),
                Matcher::UrlEncoded("client_secret".into(), "shh".into()),
            ]))
            .with_status(200)
            .with_body(json!({"access_token": "tok-1", "expires_in": 3600}).to_string())
            .create_async()
            .await;

        let client = PosClient::new(server.url());
        let token = client.exchange_token("cid", "shh").await.unwrap();
        assert_eq!(token.access_token, "tok-1");
        assert_eq!(token.expires_in, 3600);
        mock.assert();
    }

    #[tokio::test]
    async fn test_exchange_token_non_2xx_is_error() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/oauth/token")
            .with_status(401)
            .with_body(r#"{"error":"invalid_client"}"#)
            .create_async()
            .await;

        let client = PosClient::new(server.url());
        let err = client.exchange_token("cid", "bad").await.unwrap_err();
        assert!(matches!(err, GatewayError::TokenAcquisition(_)));
    }

    #[tokio::test]
    async fn test_exchange_token_malformed_body_is_error() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/oauth/token")
            .with_status(200)
            .with_body(r#"{"unexpected": true}"#)
            .create_async()
            .await;

        let client = PosClient::new(server.url());
        assert!(client.exchange_token("cid", "shh").await.is_err());
    }

    #[tokio::test]
    async fn test_fetch_page_sends_bearer() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/catalog/categories")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("page".into(), "1".into()),
                Matcher::UrlEncoded("page_size".into(), "100".into()),
            ]))
            .match_header("authorization", "Bearer tok-1")
            .with_status(200)
            .with_body(
                json!({"items": [{"id": "c1", "name": "Drinks", "parent_id": null}]}).to_string(),
            )
            .create_async()
            .await;

        let client = PosClient::new(server.url());
        let page = client.fetch_categories("tok-1", 1, 100).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, "c1");
        mock.assert();
    }

    #[tokio::test]
    async fn test_fetch_page_empty_items_default() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", Matcher::Regex(r"^/api/v1/catalog/inventory.*$".into()))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let client = PosClient::new(server.url());
        let page = client.fetch_inventory("tok-1", 1, 100).await.unwrap();
        assert!(page.is_empty());
    }
}
