//! # 中间件层
//!
//! 鉴权、限流等横切关注点，挂载在 `server.rs` 的路由树上。

pub mod auth;
