//! # `tickerflow-api` - HTTP/WebSocket 网关
//!
//! 聚合下层 Provider Service、新闻管线与存储层，对外暴露 axum 路由，
//! 用 `utoipa` 自动生成 OpenAPI 3.0 Swagger 文档。
//!
//! ## 架构职责
//! - 接收客户端 HTTP/WebSocket 请求
//! - 执行每 IP 令牌桶限流与（管理端点的）JWT 鉴权
//! - 调用下层 `MarketGateway`/新闻存储/WS 扇出完成查询
//! - 将领域模型序列化为统一信封 DTO 返回给前端

pub mod error;
pub mod gateway;
pub mod middleware;
pub mod ratelimit;
pub mod routes;
pub mod server;
pub mod types;
