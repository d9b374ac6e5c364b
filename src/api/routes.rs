use crate::api::api_error::APIError;
use crate::api::model::{CnameRequest, DomainData, DomainRequest, DomainResponse, TxtRequest};
use crate::api::server::AppState;
use crate::error::Error;
use axum::extract::{Path, State};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use axum_extra::extract::WithRejection;
use serde_json::json;
use std::collections::HashMap;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub(super) fn new(state: AppState) -> Router {
    Router::new()
        .route("/healthcheck", get(health_check))
        .route("/v1/domain", post(create_domain))
        .route(
            "/v1/domain/:fqdn",
            get(get_domain).put(update_domain).delete(delete_domain),
        )
        .route("/v1/domain/:fqdn/renew", put(renew_domain))
        .route(
            "/v1/domain/:fqdn/txt",
            post(upsert_txt).put(upsert_txt).delete(delete_txt),
        )
        .route(
            "/v1/domain/:fqdn/cname",
            post(upsert_cname).put(upsert_cname).delete(delete_cname),
        )
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(state.config.api_timeout))
        .with_state(state)
}

#[allow(clippy::unused_async)]
async fn health_check() -> impl IntoResponse {
    Json(json!({"ok":"healthy"}))
}

async fn create_domain(
    State(state): State<AppState>,
    WithRejection(Json(payload), _): WithRejection<Json<DomainRequest>, APIError>,
) -> Result<Json<DomainResponse>, APIError> {
    let alloc = state.lifecycle.allocate().await?;
    state
        .lifecycle
        .put_domain(
            &alloc.fqdn,
            &alloc.token,
            payload.hosts.clone(),
            payload.subdomain.clone(),
        )
        .await?;
    tracing::info!(fqdn = %alloc.fqdn, "created domain");
    Ok(Json(DomainResponse::with_token(
        alloc.token,
        DomainData {
            fqdn: alloc.fqdn,
            hosts: payload.hosts,
            subdomain: payload.subdomain,
            text: String::new(),
            expiration: Some(alloc.expiration),
        },
    )))
}

async fn get_domain(
    State(state): State<AppState>,
    Path(fqdn): Path<String>,
    headers: HeaderMap,
) -> Result<Json<DomainResponse>, APIError> {
    let token = bearer_token(&headers)?;
    let (token, record, subs) = state.lifecycle.get_domain(&fqdn, &token).await?;
    let mut subdomain = HashMap::new();
    for sub in subs {
        if let Some(label) = sub.fqdn.split('.').next() {
            subdomain.insert(label.to_string(), sub.hosts);
        }
    }
    Ok(Json(DomainResponse::ok(DomainData {
        fqdn: token.fqdn,
        hosts: record.map(|r| r.hosts).unwrap_or_default(),
        subdomain,
        text: String::new(),
        expiration: Some(state.lifecycle.expiration_of(token.created_on)),
    })))
}

async fn update_domain(
    State(state): State<AppState>,
    Path(fqdn): Path<String>,
    headers: HeaderMap,
    WithRejection(Json(payload), _): WithRejection<Json<DomainRequest>, APIError>,
) -> Result<Json<DomainResponse>, APIError> {
    let token = bearer_token(&headers)?;
    state
        .lifecycle
        .put_domain(&fqdn, &token, payload.hosts.clone(), payload.subdomain.clone())
        .await?;
    tracing::info!(%fqdn, "updated domain");
    Ok(Json(DomainResponse::ok(DomainData {
        fqdn,
        hosts: payload.hosts,
        subdomain: payload.subdomain,
        text: String::new(),
        expiration: None,
    })))
}

async fn delete_domain(
    State(state): State<AppState>,
    Path(fqdn): Path<String>,
    headers: HeaderMap,
) -> Result<Json<DomainResponse>, APIError> {
    let token = bearer_token(&headers)?;
    state.lifecycle.authorize(&fqdn, &token).await?;
    state.lifecycle.release(&fqdn).await?;
    tracing::info!(%fqdn, "released domain");
    Ok(Json(DomainResponse::ok(DomainData::default())))
}

async fn renew_domain(
    State(state): State<AppState>,
    Path(fqdn): Path<String>,
    headers: HeaderMap,
) -> Result<Json<DomainResponse>, APIError> {
    let token = bearer_token(&headers)?;
    state.lifecycle.authorize(&fqdn, &token).await?;
    let expiration = state.lifecycle.renew(&fqdn).await?;
    Ok(Json(DomainResponse::ok(DomainData {
        fqdn,
        hosts: Vec::new(),
        subdomain: HashMap::new(),
        text: String::new(),
        expiration: Some(expiration),
    })))
}

async fn upsert_txt(
    State(state): State<AppState>,
    Path(fqdn): Path<String>,
    headers: HeaderMap,
    WithRejection(Json(payload), _): WithRejection<Json<TxtRequest>, APIError>,
) -> Result<Json<DomainResponse>, APIError> {
    let token = bearer_token(&headers)?;
    state.lifecycle.put_txt(&fqdn, &token, &payload.text).await?;
    Ok(Json(DomainResponse::ok(DomainData {
        fqdn,
        hosts: Vec::new(),
        subdomain: HashMap::new(),
        text: payload.text,
        expiration: None,
    })))
}

async fn delete_txt(
    State(state): State<AppState>,
    Path(fqdn): Path<String>,
    headers: HeaderMap,
) -> Result<Json<DomainResponse>, APIError> {
    let token = bearer_token(&headers)?;
    state.lifecycle.delete_txt(&fqdn, &token).await?;
    Ok(Json(DomainResponse::ok(DomainData::default())))
}

async fn upsert_cname(
    State(state): State<AppState>,
    Path(fqdn): Path<String>,
    headers: HeaderMap,
    WithRejection(Json(payload), _): WithRejection<Json<CnameRequest>, APIError>,
) -> Result<Json<DomainResponse>, APIError> {
    let token = bearer_token(&headers)?;
    state
        .lifecycle
        .put_cname(&fqdn, &token, &payload.target)
        .await?;
    Ok(Json(DomainResponse::ok(DomainData {
        fqdn,
        hosts: Vec::new(),
        subdomain: HashMap::new(),
        text: String::new(),
        expiration: None,
    })))
}

async fn delete_cname(
    State(state): State<AppState>,
    Path(fqdn): Path<String>,
    headers: HeaderMap,
) -> Result<Json<DomainResponse>, APIError> {
    let token = bearer_token(&headers)?;
    state.lifecycle.delete_cname(&fqdn, &token).await?;
    Ok(Json(DomainResponse::ok(DomainData::default())))
}

/// The renewal token from the `Authorization` header, with or without the
/// `Bearer` scheme.
fn bearer_token(headers: &HeaderMap) -> Result<String, APIError> {
    let value = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            APIError::from(Error::InvalidArgument(
                "missing Authorization header".to_string(),
            ))
        })?;
    Ok(value.strip_prefix("Bearer ").unwrap_or(value).to_string())
}
