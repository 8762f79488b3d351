//! # tickerflow-httpclient
//!
//! 每主机限流+超时+重试/退避+小型响应缓存的 HTTP 执行器，所有 Provider
//! Client 通过它而非裸 `reqwest::Client` 触达上游。

pub mod executor;

pub use executor::{HostPolicy, HttpExecutor, HttpFailure, RetryPolicy};
