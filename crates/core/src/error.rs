//! # 核心错误分类表
//!
//! 整个数据面唯一对外暴露的失败形态。上游的 HTTP 状态码、WebSocket `error`
//! 信封的 `code` 字段均从这里派生，避免各层各自发明错误语义。

use thiserror::Error;

/// # Summary
/// 核心错误枚举，是数据面组件对外的唯一失败表面。
///
/// # Invariants
/// - 每个变体都必须有一个稳定的 `code()` 字符串，供客户端按 code 分支判断。
/// - 新增变体时必须同步更新 API 层的 HTTP 状态码映射表。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("missing parameter: {0}")]
    MissingParam(String),
    #[error("invalid parameter {name}: {reason}")]
    InvalidParam { name: String, reason: String },
    #[error("invalid symbol: {0}")]
    InvalidSymbol(String),
    #[error("invalid interval: {0}")]
    InvalidInterval(String),
    #[error("invalid range: {0}")]
    InvalidRange(String),
    #[error("invalid market: {0}")]
    InvalidMarket(String),
    #[error("invalid limit: {0}")]
    InvalidLimit(String),
    #[error("too many symbols: requested {requested}, max {max}")]
    TooManySymbols { requested: usize, max: usize },
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("symbol not found: {0}")]
    SymbolNotFound(String),
    #[error("not found: {0}")]
    NotFound(String),

    #[error("client rate limit exceeded")]
    RateLimit,
    #[error("upstream provider throttled")]
    ProviderThrottled,

    #[error("network error: {0}")]
    NetworkError(String),
    #[error("provider error: {0}")]
    ProviderError(String),
    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("circuit open for {name}, retry after {retry_after_ms}ms")]
    CircuitOpen { name: String, retry_after_ms: u64 },

    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("missing token")]
    MissingToken,
    #[error("invalid password")]
    InvalidPassword,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("invalid news category: {0}")]
    InvalidCategory(String),
    #[error("AI provider rate limited")]
    AiRateLimit,
    #[error("AI provider auth error")]
    AiAuthError,
    #[error("AI provider error: {0}")]
    AiError(String),
}

impl CoreError {
    /// # Summary
    /// 返回稳定的错误代码字符串，供客户端按 code 分支，不依赖 message 文案。
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::MissingParam(_) => "MISSING_PARAM",
            CoreError::InvalidParam { .. } => "INVALID_PARAM",
            CoreError::InvalidSymbol(_) => "INVALID_SYMBOL",
            CoreError::InvalidInterval(_) => "INVALID_INTERVAL",
            CoreError::InvalidRange(_) => "INVALID_RANGE",
            CoreError::InvalidMarket(_) => "INVALID_MARKET",
            CoreError::InvalidLimit(_) => "INVALID_LIMIT",
            CoreError::TooManySymbols { .. } => "TOO_MANY_SYMBOLS",
            CoreError::BadRequest(_) => "BAD_REQUEST",
            CoreError::SymbolNotFound(_) => "SYMBOL_NOT_FOUND",
            CoreError::NotFound(_) => "NOT_FOUND",
            CoreError::RateLimit => "RATE_LIMIT",
            CoreError::ProviderThrottled => "PROVIDER_THROTTLED",
            CoreError::NetworkError(_) => "NETWORK_ERROR",
            CoreError::ProviderError(_) => "PROVIDER_ERROR",
            CoreError::ValidationError(_) => "VALIDATION_ERROR",
            CoreError::CircuitOpen { .. } => "CIRCUIT_OPEN",
            CoreError::Unauthorized(_) => "UNAUTHORIZED",
            CoreError::MissingToken => "MISSING_TOKEN",
            CoreError::InvalidPassword => "INVALID_PASSWORD",
            CoreError::Internal(_) => "INTERNAL_ERROR",
            CoreError::InvalidCategory(_) => "INVALID_CATEGORY",
            CoreError::AiRateLimit => "AI_RATE_LIMIT",
            CoreError::AiAuthError => "AI_AUTH_ERROR",
            CoreError::AiError(_) => "AI_ERROR",
        }
    }

    /// 若错误携带建议的重试等待时间（目前仅 `CircuitOpen`），返回毫秒数。
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            CoreError::CircuitOpen { retry_after_ms, .. } => Some(*retry_after_ms),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_is_stable_and_does_not_depend_on_message() {
        let a = CoreError::ProviderError("timeout talking to upstream".into());
        let b = CoreError::ProviderError("different message entirely".into());
        assert_eq!(a.code(), b.code());
        assert_eq!(a.code(), "PROVIDER_ERROR");
    }

    #[test]
    fn circuit_open_carries_retry_after() {
        let e = CoreError::CircuitOpen {
            name: "binance".into(),
            retry_after_ms: 1200,
        };
        assert_eq!(e.retry_after_ms(), Some(1200));
    }
}
