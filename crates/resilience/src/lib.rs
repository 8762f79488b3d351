//! # tickerflow-resilience
//!
//! 上游调用路径上的韧性原语：并发/节流限流器、单飞合并器、断路器。
//! 每个 Provider Service 各持有自己的一套实例，互不共享状态。

pub mod circuit_breaker;
pub mod coalescer;
pub mod limiter;

pub use circuit_breaker::CircuitBreaker;
pub use coalescer::{Coalescer, FlightLost};
pub use limiter::{ConcurrencyLimiter, ThrottledLimiter};
