//! # tickerflow-market
//!
//! Provider Service 层：把 [`tickerflow_feed`] 的裸上游客户端包裹成
//! 缓存+单飞+节流+断路器齐全的服务，以及跨符号的批量行情服务。

pub mod batch;
pub mod chart_service;
pub mod detail_service;
pub mod mock;
pub mod quote_service;
mod support;

pub use batch::BatchMarketService;
pub use chart_service::ChartService;
pub use detail_service::DetailService;
pub use quote_service::QuoteService;
