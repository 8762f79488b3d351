//! # 新闻聚合端点

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use std::str::FromStr;
use tickerflow_core::error::CoreError;
use tickerflow_core::news::entity::NewsCategory;

use crate::error::ApiError;
use crate::server::AppState;
use crate::types::{NewsItemResponse, NewsListResponse, SuccessEnvelope};

const DEFAULT_LIMIT: usize = 20;
const MAX_LIMIT: usize = 50;

#[derive(Debug, Deserialize)]
pub struct NewsListQuery {
    pub category: Option<String>,
    pub limit: Option<usize>,
}

/// `GET /news?category=&limit=` — 按分类列出最近的新闻，默认 20 条，最多 50。
#[utoipa::path(get, path = "/news", tag = "news", params(("category" = Option<String>, Query), ("limit" = Option<usize>, Query)), responses((status = 200, body = SuccessEnvelope<NewsListResponse>)))]
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<NewsListQuery>,
) -> Result<Json<SuccessEnvelope<NewsListResponse>>, ApiError> {
    let category = query.category.as_deref().map(NewsCategory::from_str).transpose()?;
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    let items = state.news_store.list_recent(category, limit).await?;
    let items = items.into_iter().map(NewsItemResponse::from).collect();
    Ok(Json(SuccessEnvelope::new(NewsListResponse { items })))
}

/// `GET /news/article/:id` — 按稳定 ID 查询单条新闻。
#[utoipa::path(get, path = "/news/article/{id}", tag = "news", params(("id" = String, Path)), responses((status = 200, body = SuccessEnvelope<NewsItemResponse>), (status = 404, body = crate::types::ErrorEnvelope)))]
pub async fn article(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SuccessEnvelope<NewsItemResponse>>, ApiError> {
    let item = state
        .news_store
        .get_by_id(&id)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("news article {id}")))?;
    Ok(Json(SuccessEnvelope::new(NewsItemResponse::from(item))))
}
