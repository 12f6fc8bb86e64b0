use anyhow::Result;
use axum::extract::{FromRequestParts, Query, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::CorsLayer;
use tracing::info;
use uuid::Uuid;

use crate::broker::{CredentialManager, TokenBroker};
use crate::config::Config;
use crate::error::GatewayError;
use crate::gateway::ApiGateway;
use crate::pos::PosClient;
use crate::security::crypto::SecretVault;
use crate::security::otp::{LogDelivery, OtpDelivery, OtpIssuer};
use crate::security::rate_limit::RateLimiter;
use crate::security::session::SessionSigner;
use crate::store::models::{SyncFrequency, SyncSchedule, SyncType};
use crate::store::Store;
use crate::sync::{catalog, schedule, SyncOptions, SyncOrchestrator};

type SharedState = Arc<AppState>;

// Extract client IP from ConnectInfo, proxy headers, or fallback
#[derive(Debug, Clone)]
pub struct ClientIp(pub String);

impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(connect) = parts
            .extensions
            .get::<axum::extract::ConnectInfo<SocketAddr>>()
        {
            return Ok(ClientIp(connect.0.ip().to_string()));
        }

        if let Some(forwarded) = parts.headers.get("x-forwarded-for") {
            if let Ok(s) = forwarded.to_str() {
                let ip = s.split(',').next().unwrap_or(s).trim().to_string();
                if !ip.is_empty() {
                    return Ok(ClientIp(ip));
                }
            }
        }
        if let Some(real_ip) = parts.headers.get("x-real-ip") {
            if let Ok(s) = real_ip.to_str() {
                let ip = s.trim().to_string();
                if !ip.is_empty() {
                    return Ok(ClientIp(ip));
                }
            }
        }

        Ok(ClientIp("127.0.0.1".to_string()))
    }
}

pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub gateway: ApiGateway,
    pub orchestrator: Arc<SyncOrchestrator>,
    pub credentials: CredentialManager,
    pub otp: OtpIssuer,
    pub limiter: RateLimiter,
}

impl AppState {
    /// Wire up every component from configuration and the injected store.
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn Store>,
        master_key: [u8; 32],
        session_secret: Vec<u8>,
        delivery: Arc<dyn OtpDelivery>,
    ) -> Self {
        let pos = Arc::new(PosClient::new(config.pos_base_url.clone()));
        let vault = Arc::new(SecretVault::new(&master_key));
        let broker = Arc::new(TokenBroker::new(store.clone(), pos.clone(), vault.clone()));
        let limiter = RateLimiter::new(
            store.clone(),
            config.rate_window_secs,
            config.rate_max_attempts,
            config.rate_block_secs,
        );

        Self {
            gateway: ApiGateway::new(store.clone()),
            orchestrator: Arc::new(SyncOrchestrator::new(
                store.clone(),
                broker.clone(),
                pos.clone(),
                config.sync_page_size,
            )),
            credentials: CredentialManager::new(store.clone(), pos, vault, broker),
            otp: OtpIssuer::new(
                store.clone(),
                limiter.clone(),
                delivery,
                Arc::new(SessionSigner::new(session_secret)),
            ),
            limiter,
            config,
            store,
        }
    }

    pub fn with_defaults(config: Arc<Config>, store: Arc<dyn Store>) -> Result<Self> {
        let master_key = config.master_key()?;
        let session_secret = config.session_secret()?;
        Ok(Self::new(
            config,
            store,
            master_key,
            session_secret,
            Arc::new(LogDelivery),
        ))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveCredentialsRequest {
    #[serde(default = "default_owner")]
    pub owner_id: String,
    pub retailer_name: String,
    pub client_id: String,
    pub client_secret: String,
}

fn default_owner() -> String {
    "default".to_string()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub credential_id: String,
    pub sync_types: Vec<SyncType>,
    #[serde(default)]
    pub page_size: Option<usize>,
}

#[derive(Deserialize)]
pub struct CredentialQuery {
    pub credential_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRequest {
    pub credential_id: String,
    pub sync_type: SyncType,
    pub frequency: SyncFrequency,
    #[serde(default)]
    pub custom_interval_hours: Option<u32>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Deserialize)]
pub struct LookupQuery {
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Deserialize)]
pub struct RequestOtpBody {
    pub email: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyOtpBody {
    pub email: String,
    pub otp_code: String,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub request_id: String,
}

/// Per-request bookkeeping: correlation id plus elapsed-time measurement.
struct RequestMeta {
    request_id: String,
    started: Instant,
}

impl RequestMeta {
    fn begin() -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            started: Instant::now(),
        }
    }

    fn meta(&self) -> serde_json::Value {
        json!({
            "request_id": self.request_id,
            "duration_ms": self.started.elapsed().as_millis() as u64,
        })
    }

    fn ok(&self, data: serde_json::Value) -> Json<serde_json::Value> {
        Json(json!({"success": true, "data": data, "meta": self.meta()}))
    }

    fn err(&self, err: GatewayError) -> (StatusCode, Json<ErrorResponse>) {
        (
            err.status(),
            Json(ErrorResponse {
                error: err.to_string(),
                request_id: self.request_id.clone(),
            }),
        )
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.trim().to_string())
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok", "version": crate::VERSION}))
}

async fn save_credentials(
    State(state): State<SharedState>,
    ClientIp(ip): ClientIp,
    Json(req): Json<SaveCredentialsRequest>,
) -> impl IntoResponse {
    let meta = RequestMeta::begin();

    if req.retailer_name.trim().is_empty()
        || req.client_id.trim().is_empty()
        || req.client_secret.is_empty()
    {
        return meta
            .err(GatewayError::Validation(
                "retailerName, clientId, and clientSecret are required".to_string(),
            ))
            .into_response();
    }

    if let Err(err) = state.limiter.check(&ip).await {
        return meta.err(err).into_response();
    }

    match state
        .credentials
        .save_credentials(
            &req.owner_id,
            req.retailer_name.trim(),
            req.client_id.trim(),
            &req.client_secret,
        )
        .await
    {
        Ok(credential) => meta
            .ok(json!({"credentialId": credential.id}))
            .into_response(),
        Err(err) => meta.err(err).into_response(),
    }
}

async fn run_sync(
    State(state): State<SharedState>,
    Json(req): Json<SyncRequest>,
) -> impl IntoResponse {
    let meta = RequestMeta::begin();
    let options = SyncOptions {
        page_size: req.page_size,
    };

    match state
        .orchestrator
        .sync_data(&req.credential_id, &req.sync_types, &options)
        .await
    {
        Ok(report) => Json(json!({
            "success": true,
            "results": report.results,
            "meta": meta.meta(),
        }))
        .into_response(),
        // a failed sync is always a server-side failure to the caller
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "success": false,
                "error": err.to_string(),
                "request_id": meta.request_id,
            })),
        )
            .into_response(),
    }
}

async fn sync_logs(
    State(state): State<SharedState>,
    Query(query): Query<CredentialQuery>,
) -> impl IntoResponse {
    let meta = RequestMeta::begin();
    match state
        .store
        .sync_logs_for_credential(&query.credential_id)
        .await
    {
        Ok(logs) => meta.ok(json!({"logs": logs})).into_response(),
        Err(err) => meta.err(err).into_response(),
    }
}

async fn get_schedules(
    State(state): State<SharedState>,
    Query(query): Query<CredentialQuery>,
) -> impl IntoResponse {
    let meta = RequestMeta::begin();
    match state
        .store
        .schedules_for_credential(&query.credential_id)
        .await
    {
        Ok(schedules) => meta.ok(json!({"schedules": schedules})).into_response(),
        Err(err) => meta.err(err).into_response(),
    }
}

async fn upsert_schedule(
    State(state): State<SharedState>,
    Json(req): Json<ScheduleRequest>,
) -> impl IntoResponse {
    let meta = RequestMeta::begin();

    if let Err(err) = schedule::validate(req.frequency, req.custom_interval_hours) {
        return meta.err(err).into_response();
    }
    match state.store.credential(&req.credential_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return meta
                .err(GatewayError::Validation("Unknown credential".to_string()))
                .into_response()
        }
        Err(err) => return meta.err(err).into_response(),
    }

    // keep the run history when reconfiguring an existing schedule
    let existing = match state
        .store
        .schedules_for_credential(&req.credential_id)
        .await
    {
        Ok(schedules) => schedules.into_iter().find(|s| s.sync_type == req.sync_type),
        Err(err) => return meta.err(err).into_response(),
    };

    let now = Utc::now();
    let last_run_at = existing.as_ref().and_then(|s| s.last_run_at);
    let row = SyncSchedule {
        id: existing
            .map(|s| s.id)
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        credential_id: req.credential_id,
        sync_type: req.sync_type,
        frequency: req.frequency,
        custom_interval_hours: req.custom_interval_hours,
        enabled: req.enabled,
        next_run_at: schedule::next_run_at(
            req.frequency,
            req.custom_interval_hours,
            last_run_at,
            now,
        ),
        last_run_at,
    };

    match state.store.upsert_schedule(row.clone()).await {
        Ok(()) => meta.ok(json!({"schedule": row})).into_response(),
        Err(err) => meta.err(err).into_response(),
    }
}

async fn category_tree(State(state): State<SharedState>) -> impl IntoResponse {
    let meta = RequestMeta::begin();
    match state.store.categories().await {
        Ok(rows) => {
            let tree = catalog::build_category_tree(rows);
            meta.ok(json!({"categories": tree})).into_response()
        }
        Err(err) => meta.err(err).into_response(),
    }
}

async fn lookup_customer(
    State(state): State<SharedState>,
    ClientIp(ip): ClientIp,
    Query(query): Query<LookupQuery>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let meta = RequestMeta::begin();
    let bearer = bearer_token(&headers);
    let phone = query.phone.unwrap_or_default();

    match state
        .gateway
        .lookup_customer(bearer.as_deref(), &phone, &ip)
        .await
    {
        Ok(reply) => {
            let mut response_headers = HeaderMap::new();
            response_headers.insert(
                "x-cache",
                if reply.cache_hit { "hit" } else { "miss" }.parse().unwrap(),
            );
            (
                StatusCode::OK,
                response_headers,
                meta.ok(reply.data),
            )
                .into_response()
        }
        Err(err) => meta.err(err).into_response(),
    }
}

async fn request_otp(
    State(state): State<SharedState>,
    Json(body): Json<RequestOtpBody>,
) -> impl IntoResponse {
    let meta = RequestMeta::begin();
    match state.otp.request_otp(&body.email).await {
        Ok(()) => meta.ok(json!({"sent": true})).into_response(),
        Err(err) => meta.err(err).into_response(),
    }
}

async fn verify_otp(
    State(state): State<SharedState>,
    Json(body): Json<VerifyOtpBody>,
) -> impl IntoResponse {
    let meta = RequestMeta::begin();
    match state.otp.verify_otp(&body.email, &body.otp_code).await {
        Ok(session) => meta
            .ok(serde_json::to_value(session).unwrap_or_default())
            .into_response(),
        Err(err) => meta.err(err).into_response(),
    }
}

pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/credentials", post(save_credentials))
        .route("/api/v1/sync", post(run_sync))
        .route("/api/v1/sync/logs", get(sync_logs))
        .route("/api/v1/schedules", get(get_schedules).post(upsert_schedule))
        .route("/api/v1/categories/tree", get(category_tree))
        .route("/api/v1/customers/lookup", get(lookup_customer))
        .route("/api/v1/auth/request-otp", post(request_otp))
        .route("/api/v1/auth/verify-otp", post(verify_otp))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(config: Config, store: Arc<dyn Store>, port: u16) -> Result<()> {
    let cfg = Arc::new(config);
    let state = Arc::new(AppState::with_defaults(cfg.clone(), store.clone())?);

    let _poller = schedule::spawn_schedule_poller(
        store,
        state.orchestrator.clone(),
        Duration::from_secs(cfg.schedule_poll_secs),
    );

    let app = create_router(state).into_make_service_with_connect_info::<SocketAddr>();

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("integration gateway listening on {}", addr);
    axum::serve(listener, app).into_future().await?;
    Ok(())
}
