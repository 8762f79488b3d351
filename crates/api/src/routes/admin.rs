//! # 管理员专有路由控制器
//!
//! `/admin/collectors/:name/trigger` 手动触发一轮采集，`/admin/cache/:provider/clear`
//! 清空某个市场 Provider 的缓存。两个端点都受 `auth_middleware` +
//! `require_admin` 中间件保护。

use axum::extract::{Path, State};
use axum::Json;

use crate::error::ApiError;
use crate::server::AppState;
use crate::types::{CacheClearResponse, IngestReportResponse, SuccessEnvelope};
use tickerflow_core::error::CoreError;
use tickerflow_news::run_collector;

/// `POST /admin/collectors/:name/trigger` — 手动跑一轮指定采集源。
#[utoipa::path(post, path = "/admin/collectors/{name}/trigger", tag = "admin", security(("bearer_jwt" = [])), params(("name" = String, Path)), responses((status = 200, body = SuccessEnvelope<IngestReportResponse>), (status = 404, body = crate::types::ErrorEnvelope)))]
pub async fn trigger_collector(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<SuccessEnvelope<IngestReportResponse>>, ApiError> {
    let feed = state
        .news_feeds
        .get(&name)
        .ok_or_else(|| CoreError::NotFound(format!("collector {name}")))?;

    let known_symbols = state.news_store.known_symbols().await?;
    let report = run_collector(feed.as_ref(), state.store.as_ref(), 50, Some(&known_symbols)).await?;
    Ok(Json(SuccessEnvelope::new(IngestReportResponse::from(report))))
}

/// `POST /admin/cache/:provider/clear` — 清空某个市场 Provider 的报价/K
/// 线/详情缓存。
#[utoipa::path(post, path = "/admin/cache/{provider}/clear", tag = "admin", security(("bearer_jwt" = [])), params(("provider" = String, Path)), responses((status = 200, body = SuccessEnvelope<CacheClearResponse>), (status = 404, body = crate::types::ErrorEnvelope)))]
pub async fn clear_cache(
    State(state): State<AppState>,
    Path(provider): Path<String>,
) -> Result<Json<SuccessEnvelope<CacheClearResponse>>, ApiError> {
    match provider.as_str() {
        "crypto" => state.crypto.clear_caches(),
        "us" => state.us.clear_caches(),
        "bist" => state.bist.clear_caches(),
        other => return Err(CoreError::NotFound(format!("provider {other}")).into()),
    }
    Ok(Json(SuccessEnvelope::new(CacheClearResponse {
        provider,
        cleared: true,
    })))
}
