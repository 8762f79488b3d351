//! # 健康检查与可观测性端点
//!
//! `/health/live`、`/health/ready`、`/health/collectors` 均不经过限流/鉴权
//! 中间件（见 `server.rs` 的路由分组），供编排平台探活。

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use std::time::Duration;
use tickerflow_core::health::{ComponentHealth, Health};

use crate::error::ApiError;
use crate::server::AppState;
use crate::types::{
    CollectorStatusResponse, CollectorsStatusResponse, ComponentHealthResponse, LivenessResponse,
    ReadinessResponse, SuccessEnvelope,
};

/// 存储可达性探测的延迟预算：超过此时限视为未就绪。
const READINESS_BUDGET: Duration = Duration::from_millis(500);

const KNOWN_COLLECTORS: &[&str] = &["gdelt", "sec_rss", "kap", "google_news_rss"];

/// `GET /health/live` — 进程存活即返回 200，不做任何依赖检查。
#[utoipa::path(get, path = "/health/live", tag = "health", responses((status = 200, body = SuccessEnvelope<LivenessResponse>)))]
pub async fn live() -> Json<SuccessEnvelope<LivenessResponse>> {
    Json(SuccessEnvelope::new(LivenessResponse { alive: true }))
}

/// `GET /health/ready` — 存储在预算内可达，且各 Provider Service 均未处于
/// 持续故障态时返回 200；否则 503。
#[utoipa::path(get, path = "/health/ready", tag = "health", responses((status = 200, body = SuccessEnvelope<ReadinessResponse>), (status = 503, body = SuccessEnvelope<ReadinessResponse>)))]
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<SuccessEnvelope<ReadinessResponse>>) {
    let store_healthy = match tokio::time::timeout(READINESS_BUDGET, (state.store_ping)()).await {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            tracing::warn!(error = %err, "readiness store ping failed");
            false
        }
        Err(_) => {
            tracing::warn!("readiness store ping exceeded budget");
            false
        }
    };

    let mut components: Vec<ComponentHealthResponse> = vec![ComponentHealthResponse {
        name: "store".to_string(),
        healthy: store_healthy,
        circuit: None,
        detail: None,
    }];
    components.extend(gateway_components(&state).into_iter().map(Into::into));

    let ready = store_healthy && components.iter().all(|c| c.healthy);
    let status = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(SuccessEnvelope::new(ReadinessResponse { ready, components })))
}

fn gateway_components(state: &AppState) -> Vec<ComponentHealth> {
    let mut out = state.crypto.health();
    out.extend(state.us.health());
    out.extend(state.bist.health());
    out.push(state.crypto_fanout.health());
    out.push(state.trade_fanout.health());
    out
}

/// `GET /health/collectors` — 每个已知新闻采集源的最近运行统计。
#[utoipa::path(get, path = "/health/collectors", tag = "health", responses((status = 200, body = SuccessEnvelope<CollectorsStatusResponse>)))]
pub async fn collectors(
    State(state): State<AppState>,
) -> Result<Json<SuccessEnvelope<CollectorsStatusResponse>>, ApiError> {
    let mut collectors = Vec::with_capacity(KNOWN_COLLECTORS.len());
    for source in KNOWN_COLLECTORS {
        let status = state.ingestion_store.collector_status(source).await?;
        collectors.push(CollectorStatusResponse::from(status));
    }
    Ok(Json(SuccessEnvelope::new(CollectorsStatusResponse { collectors })))
}
