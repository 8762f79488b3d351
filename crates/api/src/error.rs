//! # API 统一错误处理
//!
//! 把 [`CoreError`] 映射到 HTTP 状态码与统一的 `{ok:false,error:{code,message}}`
//! 响应信封，新增 `CoreError` 变体时必须同步更新这里的状态码分支。

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tickerflow_core::error::CoreError;

use crate::types::{ErrorBody, ErrorEnvelope};

/// API 层错误：直接包装 [`CoreError`]，状态码映射集中在 `into_response`。
#[derive(Debug, Clone)]
pub struct ApiError(pub CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        ApiError(err)
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ApiError {}

fn status_for(err: &CoreError) -> StatusCode {
    match err {
        CoreError::MissingParam(_)
        | CoreError::InvalidParam { .. }
        | CoreError::InvalidSymbol(_)
        | CoreError::InvalidInterval(_)
        | CoreError::InvalidRange(_)
        | CoreError::InvalidMarket(_)
        | CoreError::InvalidLimit(_)
        | CoreError::TooManySymbols { .. }
        | CoreError::BadRequest(_)
        | CoreError::ValidationError(_)
        | CoreError::InvalidCategory(_) => StatusCode::BAD_REQUEST,

        CoreError::Unauthorized(_) | CoreError::MissingToken | CoreError::InvalidPassword => {
            StatusCode::UNAUTHORIZED
        }

        CoreError::SymbolNotFound(_) | CoreError::NotFound(_) => StatusCode::NOT_FOUND,

        CoreError::RateLimit | CoreError::ProviderThrottled | CoreError::AiRateLimit => {
            StatusCode::TOO_MANY_REQUESTS
        }

        CoreError::ProviderError(_) | CoreError::AiError(_) => StatusCode::BAD_GATEWAY,

        CoreError::NetworkError(_) | CoreError::AiAuthError | CoreError::CircuitOpen { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }

        CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "internal error");
        }

        let body = ErrorEnvelope {
            ok: false,
            error: ErrorBody {
                code: self.0.code().to_string(),
                message: self.0.to_string(),
            },
        };
        let mut response = (status, Json(body)).into_response();
        if let Some(retry_ms) = self.0.retry_after_ms() {
            let retry_secs = retry_ms.div_ceil(1000).max(1);
            if let Ok(value) = axum::http::HeaderValue::from_str(&retry_secs.to_string()) {
                response.headers_mut().insert("Retry-After", value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circuit_open_maps_to_503_with_retry_after() {
        let err = ApiError(CoreError::CircuitOpen {
            name: "binance".into(),
            retry_after_ms: 2500,
        });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers().get("Retry-After").unwrap(), "3");
    }

    #[test]
    fn symbol_not_found_maps_to_404() {
        let err = ApiError(CoreError::SymbolNotFound("ZZZZ".into()));
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn too_many_symbols_maps_to_400() {
        let err = ApiError(CoreError::TooManySymbols { requested: 600, max: 500 });
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }
}
