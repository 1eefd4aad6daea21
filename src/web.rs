//! Dashboard-facing JSON API over the price service.

use crate::models::{BatchProgress, BatchRequest, PriceEntry, PriceMap, TokenDetail};
use crate::service::{PriceService, ServiceError};
use anyhow::Context;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{error, info};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;

pub fn router(service: PriceService) -> Router {
    Router::new()
        .route("/api/native-price", get(native_price))
        .route("/api/prices/batch", post(batch_prices).get(batch_progress))
        .route("/api/token-detail", get(token_detail))
        .route("/api/token-logos", get(token_logos))
        .route("/api/token-price", get(token_price))
        .with_state(service)
}

/// Bind and serve until shutdown.
pub async fn serve(service: PriceService, port: u16) -> anyhow::Result<()> {
    let app = router(service);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .context("failed to bind listen port")?;
    info!("Price relay listening on http://0.0.0.0:{}", port);
    axum::serve(listener, app).await?;
    Ok(())
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        match self {
            ServiceError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": msg })),
            )
                .into_response(),
            ServiceError::Upstream {
                status,
                content_type,
                body,
            } => {
                // Upstream failures pass through verbatim: same status, same
                // body, same content type.
                let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
                let body = if body.is_empty() {
                    format!("Upstream error {}", status.as_u16())
                } else {
                    body
                };
                let content_type = content_type.unwrap_or_else(|| "text/plain".to_string());
                (status, [(header::CONTENT_TYPE, content_type)], body).into_response()
            }
            ServiceError::Internal(e) => {
                error!("internal error: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": e.to_string() })),
                )
                    .into_response()
            }
        }
    }
}

async fn native_price(
    State(service): State<PriceService>,
) -> Result<Json<PriceEntry>, ServiceError> {
    Ok(Json(service.native_price().await?))
}

async fn batch_prices(
    State(service): State<PriceService>,
    Json(body): Json<BatchRequest>,
) -> Result<Json<PriceMap>, ServiceError> {
    let prices = service
        .batch_prices(&body.platform, &body.contract_addresses)
        .await?;
    Ok(Json(prices))
}

#[derive(Deserialize)]
struct ProgressQuery {
    #[serde(default)]
    platform: String,
}

async fn batch_progress(
    State(service): State<PriceService>,
    Query(query): Query<ProgressQuery>,
) -> Json<BatchProgress> {
    Json(service.progress_for(&query.platform).await)
}

#[derive(Deserialize)]
struct DetailQuery {
    #[serde(default)]
    platform: String,
    #[serde(default)]
    address: String,
}

async fn token_detail(
    State(service): State<PriceService>,
    Query(query): Query<DetailQuery>,
) -> Result<Json<TokenDetail>, ServiceError> {
    Ok(Json(
        service.token_detail(&query.platform, &query.address).await?,
    ))
}

#[derive(Deserialize)]
struct LogosQuery {
    #[serde(default)]
    platform: String,
    #[serde(default)]
    contracts: String,
}

async fn token_logos(
    State(service): State<PriceService>,
    Query(query): Query<LogosQuery>,
) -> Result<Json<HashMap<String, String>>, ServiceError> {
    Ok(Json(
        service
            .token_logos(&query.platform, &query.contracts)
            .await?,
    ))
}

#[derive(Deserialize)]
struct TokenPriceQuery {
    #[serde(default)]
    platform: String,
    /// Older dashboard builds send `contracts`; both spellings are accepted.
    contract_addresses: Option<String>,
    contracts: Option<String>,
}

async fn token_price(
    State(service): State<PriceService>,
    Query(query): Query<TokenPriceQuery>,
) -> Result<Json<Value>, ServiceError> {
    let contracts = query
        .contract_addresses
        .or(query.contracts)
        .unwrap_or_default();
    Ok(Json(service.token_price(&query.platform, &contracts).await?))
}
