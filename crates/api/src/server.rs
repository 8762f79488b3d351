//! # API 服务启动器
//!
//! 组装 axum 路由、挂载 Swagger UI、配置 CORS 并绑定 TCP 端口对外提供服务。
//! 本模块不直接启动 `main()`, 而是由 `crates/app` 的组合根持有并调用。

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_axum::router::OpenApiRouter;
use utoipa_axum::routes;
use utoipa_swagger_ui::SwaggerUi;

use tickerflow_core::config::AppConfig;
use tickerflow_core::error::CoreError;
use tickerflow_core::health::ingestion::IngestionStore;
use tickerflow_core::news::port::NewsStore;
use tickerflow_core::store::port::UserStore;
use tickerflow_feed::{CryptoClient, EquityTradeStreamClient, MarketDataClient, RssFeedClient};
use tickerflow_httpclient::HttpExecutor;
use tickerflow_store::SqliteStore;
use tickerflow_ws::Fanout;

use crate::gateway::MarketGateway;
use crate::ratelimit::{RateLimitLayer, RateLimiter};
use crate::routes::{admin, auth, health, market, metrics, news, ws};

// ============================================================
//  共享应用状态
// ============================================================

/// 存储可达性探针：包装 [`SqliteStore::ping`]，以便 `/health/ready` 不依赖
/// 具体存储实现即可在预算内探测。
pub type StorePing = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = Result<(), CoreError>> + Send>> + Send + Sync>;

/// 全局应用状态，通过 axum 的 `State` 提取器注入到每个 Handler 中。
///
/// # Invariants
/// - 所有字段均由组合根（`crates/app`）在启动时一次性注入，生命周期与进程等同。
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub user_store: Arc<dyn UserStore>,
    pub store: Arc<SqliteStore>,
    pub store_ping: StorePing,
    pub crypto: Arc<MarketGateway<CryptoClient>>,
    pub us: Arc<MarketGateway<MarketDataClient>>,
    pub bist: Arc<MarketGateway<MarketDataClient>>,
    pub crypto_fanout: Arc<Fanout<CryptoClient>>,
    pub trade_fanout: Arc<Fanout<EquityTradeStreamClient>>,
    pub http_executor: Arc<HttpExecutor>,
    pub news_store: Arc<dyn NewsStore>,
    pub ingestion_store: Arc<dyn IngestionStore>,
    pub news_feeds: HashMap<String, Arc<RssFeedClient>>,
}

// ============================================================
//  OpenAPI 文档定义
// ============================================================

/// 全局 OpenAPI 文档结构
#[derive(OpenApi)]
#[openapi(
    info(
        title = "tickerflow API",
        version = "0.1.0",
        description = "跨市场行情聚合与新闻采集网关：统一报价/K 线/详情接口、WebSocket 逐笔行情扇出、确定性新闻打标与采集调度。",
        contact(name = "tickerflow"),
        license(name = "MIT")
    ),
    tags(
        (name = "health", description = "存活/就绪探测、采集器运行状态与运行时指标"),
        (name = "market", description = "报价、K 线、详情与批量市场扫描"),
        (name = "news", description = "新闻列表与单条详情"),
        (name = "auth", description = "登录与密码修改"),
        (name = "admin", description = "手动触发采集、清空 Provider 缓存")
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// 为 OpenAPI 文档注入全局 Bearer JWT 鉴权方案。
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_jwt",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .description(Some("在此处填入登录接口返回的 JWT Token（无需 'Bearer ' 前缀）"))
                    .build(),
            ),
        );
    }
}

// ============================================================
//  服务构建与启动
// ============================================================

/// 构建完整的 axum 应用路由树并启动 HTTP 监听。
///
/// # Arguments
/// * `state` - 由组合根注入的共享状态
/// * `bind_addr` - 监听的地址与端口，如 `"0.0.0.0:8080"`
pub async fn start_server(state: AppState, bind_addr: &str) -> Result<(), Box<dyn std::error::Error>> {
    let rate_limiter = RateLimiter::new(state.config.rate_limit.requests_per_minute);

    // 1. 健康检查：不限流、不鉴权，供编排平台探活。
    let health_router = OpenApiRouter::new()
        .routes(routes!(health::live))
        .routes(routes!(health::ready))
        .routes(routes!(health::collectors))
        .routes(routes!(metrics::metrics));

    // 2. 公开但限流的行情/新闻/登录端点。
    let public_router = OpenApiRouter::new()
        .routes(routes!(market::quote))
        .routes(routes!(market::quotes))
        .routes(routes!(market::chart))
        .routes(routes!(market::detail))
        .routes(routes!(market::scan))
        .routes(routes!(news::list))
        .routes(routes!(news::article))
        .routes(routes!(auth::login))
        .layer(RateLimitLayer::new(rate_limiter.clone()));

    // 3. 需要合法 JWT 的路由；`/auth/change-password` 必须挂在字面量路径上，
    //    与 `middleware::auth::CHANGE_PASSWORD_PATH` 保持一致。
    let user_protected_router = OpenApiRouter::new()
        .routes(routes!(auth::change_password))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::middleware::auth::auth_middleware,
        ))
        .layer(RateLimitLayer::new(rate_limiter.clone()));

    // 4. 需要管理员角色的路由。
    let admin_protected_router = OpenApiRouter::new()
        .routes(routes!(admin::trigger_collector))
        .routes(routes!(admin::clear_cache))
        .layer(axum::middleware::from_fn(crate::middleware::auth::require_admin))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::middleware::auth::auth_middleware,
        ))
        .layer(RateLimitLayer::new(rate_limiter));

    // 5. 合并所有路由与自动收集的 OpenAPI Doc。
    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .merge(health_router)
        .merge(public_router)
        .merge(user_protected_router)
        .merge(admin_protected_router)
        .with_state(state.clone())
        .split_for_parts();

    // 6. WebSocket 扇出端点不经过 utoipa 的 routes! 宏（非 REST 操作）。
    let ws_router = axum::Router::new()
        .route("/stream/crypto", axum::routing::get(ws::crypto_stream))
        .route("/stream/trades", axum::routing::get(ws::trade_stream))
        .with_state(state);

    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let app: Router = router
        .merge(ws_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", api))
        .layer(cors);

    tracing::info!("tickerflow API listening on {}", bind_addr);
    tracing::info!("Swagger UI: http://{}/swagger-ui/", bind_addr);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
