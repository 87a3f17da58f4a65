//! HTTP API for faucet service

use crate::error::FaucetError;
use crate::service::{ClaimOutcome, FaucetService};
use axum::{
    async_trait,
    extract::{rejection::JsonRejection, ConnectInfo, FromRequestParts, State},
    http::{header, request::Parts, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

/// Claim request
#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    pub address: Option<String>,
}

/// Client IP as seen by the rate limiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

#[async_trait]
impl FromRequestParts<Arc<FaucetService>> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        service: &Arc<FaucetService>,
    ) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        Ok(ClientIp(client_ip(
            &parts.headers,
            peer,
            service.config().trust_proxy_headers,
        )))
    }
}

/// First `X-Forwarded-For` entry, then `X-Real-IP`, then the TCP peer.
/// Headers are ignored unless `trust_proxy` is set.
pub fn client_ip(headers: &HeaderMap, peer: Option<IpAddr>, trust_proxy: bool) -> String {
    if trust_proxy {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.split(',').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty());
        if let Some(ip) = forwarded {
            return ip.to_string();
        }

        let real_ip = headers
            .get("x-real-ip")
            .and_then(|h| h.to_str().ok())
            .map(str::trim)
            .filter(|ip| !ip.is_empty());
        if let Some(ip) = real_ip {
            return ip.to_string();
        }
    }

    peer.map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Claim handler
pub async fn claim_handler(
    State(service): State<Arc<FaucetService>>,
    ClientIp(ip): ClientIp,
    request: Result<Json<ClaimRequest>, JsonRejection>,
) -> Response {
    let address = match request {
        Ok(Json(request)) => request.address,
        Err(rejection) => {
            debug!(error = %rejection, %ip, "Unreadable claim body");
            None
        }
    };

    match service.claim(address.as_deref(), &ip).await {
        Ok(ClaimOutcome::Sent(receipt)) => (StatusCode::OK, Json(receipt)).into_response(),
        Ok(ClaimOutcome::Declined {
            scope,
            retry_after_secs,
        }) => FaucetError::CooldownActive {
            scope,
            retry_after_secs,
        }
        .into_response(),
        Err(e) => {
            error!(error = %e, %ip, "Claim failed");
            e.into_response()
        }
    }
}

/// Status handler
pub async fn status_handler(State(service): State<Arc<FaucetService>>) -> Response {
    match service.status().await {
        Ok(status) => Json(status).into_response(),
        Err(e) => {
            error!(error = %e, "Status check failed");
            e.into_response()
        }
    }
}

/// Health check handler
pub async fn health_handler(State(service): State<Arc<FaucetService>>) -> Response {
    match service.health().await {
        Ok(report) => Json(report).into_response(),
        Err(unhealthy) => (StatusCode::INTERNAL_SERVER_ERROR, Json(unhealthy)).into_response(),
    }
}

/// Prometheus metrics handler
pub async fn metrics_handler(State(service): State<Arc<FaucetService>>) -> Response {
    match service.metrics().encode() {
        Ok((content_type, body)) => {
            ([(header::CONTENT_TYPE, content_type)], body).into_response()
        }
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
        }
    }
}

/// Store round-trip check
pub async fn debug_kv_handler(State(service): State<Arc<FaucetService>>) -> Response {
    match service.debug_kv().await {
        Ok(probe) => Json(probe).into_response(),
        Err(e) => {
            error!(error = %e, "Store probe failed");
            e.into_response()
        }
    }
}

/// Notification self-test
pub async fn debug_notify_handler(State(service): State<Arc<FaucetService>>) -> Response {
    match service.test_notification().await {
        Ok(()) => Json(serde_json::json!({
            "status": "ok",
            "message": "Test message sent successfully!",
        }))
        .into_response(),
        Err(e) => {
            error!(error = %e, "Test notification failed");
            e.into_response()
        }
    }
}

/// Root handler with info
pub async fn root_handler(State(service): State<Arc<FaucetService>>) -> impl IntoResponse {
    let config = service.config();
    Json(serde_json::json!({
        "name": format!("{} Faucet", config.token_symbol),
        "version": env!("CARGO_PKG_VERSION"),
        "network": config.network_name,
        "endpoints": {
            "POST /claim": "Request tokens",
            "GET /status": "Get faucet status",
            "GET /health": "Health check",
            "GET /metrics": "Prometheus metrics"
        }
    }))
}

/// Assemble the HTTP surface.
pub fn build_router(service: Arc<FaucetService>) -> Router {
    let config = service.config();

    let mut router = Router::new()
        .route("/", get(root_handler))
        .route("/claim", post(claim_handler))
        .route("/api/faucet", post(claim_handler))
        .route("/status", get(status_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler));

    if config.debug_endpoints {
        router = router
            .route("/debug/kv", get(debug_kv_handler))
            .route("/debug/notify", get(debug_notify_handler));
        info!("Debug endpoints enabled");
    }

    let mut router = router
        .layer(TraceLayer::new_for_http())
        .with_state(service.clone());

    if config.cors_enabled {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any);
        router = router.layer(cors);
    }

    router
}
