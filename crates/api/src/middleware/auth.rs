//! # 鉴权中间件
//!
//! 基于 JWT 的身份验证，以及管理员角色的细粒度校验。

use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use jsonwebtoken::{decode, DecodingKey, Validation};
use tickerflow_core::error::CoreError;
use tickerflow_core::store::entity::User;

use crate::error::ApiError;
use crate::server::AppState;
use crate::types::Claims;

const CHANGE_PASSWORD_PATH: &str = "/auth/change-password";

/// 提取并验证 `Authorization: Bearer <token>`，把解出的用户注入 request extensions。
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .ok_or(CoreError::MissingToken)?;

    let raw = header
        .to_str()
        .map_err(|_| CoreError::Unauthorized("invalid authorization header".into()))?;
    let token = raw
        .strip_prefix("Bearer ")
        .ok_or_else(|| CoreError::Unauthorized("expected Bearer token".into()))?;

    let claims = verify_jwt(token, &state.config.auth.jwt_secret)?;

    let user = state
        .user_store
        .get_by_username(&claims.sub)
        .await?
        .ok_or_else(|| CoreError::Unauthorized("user not found".into()))?;

    if user.must_change_password && req.uri().path() != CHANGE_PASSWORD_PATH {
        return Err(CoreError::Unauthorized("password change required".into()).into());
    }

    req.extensions_mut().insert(user);
    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}

/// 要求当前用户为管理员；必须在 `auth_middleware` 之后应用。
pub async fn require_admin(req: Request, next: Next) -> Result<Response, ApiError> {
    let user = req
        .extensions()
        .get::<User>()
        .ok_or_else(|| CoreError::Unauthorized("missing user context".into()))?;

    if !user.is_admin {
        return Err(CoreError::Unauthorized("admin privileges required".into()).into());
    }

    Ok(next.run(req).await)
}

/// 验证 JWT 并返回强类型 Claims。
pub fn verify_jwt(token: &str, secret: &str) -> Result<Claims, CoreError> {
    let mut validation = Validation::default();
    validation.set_required_spec_claims(&["exp", "sub"]);

    let token_data = decode::<Claims>(token, &DecodingKey::from_secret(secret.as_ref()), &validation)
        .map_err(|_| CoreError::Unauthorized("invalid or expired token".into()))?;

    Ok(token_data.claims)
}

/// 从 request extensions 提取当前已认证用户的快捷提取器。
pub struct CurrentUser(pub User);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user = parts
            .extensions
            .get::<User>()
            .cloned()
            .ok_or_else(|| CoreError::Unauthorized("missing user context".into()))?;
        Ok(CurrentUser(user))
    }
}
