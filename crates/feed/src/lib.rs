//! # tickerflow-feed
//!
//! 类型化的上游客户端：加密货币交易所、通用行情供应商、新闻 RSS/HTTP。
//! 全部通过 [`tickerflow_httpclient::HttpExecutor`] 触达网络，自身只负责
//! 请求构造、响应解析与到核心错误分类表的映射。

pub mod crypto;
pub mod market_data;
pub mod news_rss;
pub mod trade_stream;

pub use crypto::CryptoClient;
pub use market_data::MarketDataClient;
pub use news_rss::RssFeedClient;
pub use trade_stream::EquityTradeStreamClient;
