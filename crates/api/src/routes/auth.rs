//! # 身份验证路由控制器
//!
//! 实现登录、密码修改等鉴权相关接口。

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};

use crate::error::ApiError;
use crate::middleware::auth::CurrentUser;
use crate::server::AppState;
use crate::types::{ChangePasswordRequest, Claims, LoginRequest, LoginResponse, SuccessEnvelope};
use tickerflow_core::error::CoreError;

const JWT_EXPIRES_IN: u64 = 86400 * 7; // 7 天

/// 用户登录，校验用户名密码并颁发 JWT。
#[utoipa::path(post, path = "/auth/login", tag = "auth", request_body = LoginRequest, responses((status = 200, body = SuccessEnvelope<LoginResponse>), (status = 401, body = crate::types::ErrorEnvelope)))]
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<SuccessEnvelope<LoginResponse>>, ApiError> {
    let user = state
        .user_store
        .get_by_username(&req.username)
        .await?
        .ok_or_else(|| CoreError::Unauthorized("invalid username or password".into()))?;

    let valid = bcrypt::verify(&req.password, &user.password_hash).unwrap_or(false);
    if !valid {
        return Err(CoreError::Unauthorized("invalid username or password".into()).into());
    }

    let exp = Utc::now().timestamp() as usize + JWT_EXPIRES_IN as usize;
    let claims = Claims {
        sub: user.id.clone(),
        is_admin: user.is_admin,
        exp,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(state.config.auth.jwt_secret.as_ref()),
    )
    .map_err(|e| CoreError::Internal(format!("failed to sign token: {e}")))?;

    Ok(Json(SuccessEnvelope::new(LoginResponse {
        token,
        expires_in: JWT_EXPIRES_IN,
        must_change_password: user.must_change_password,
    })))
}

/// 修改密码。必须携带有效 JWT；成功后解除 `must_change_password` 的锁定态。
///
/// 必须挂载在字面量路径 `/auth/change-password`——鉴权中间件用这个精确路径
/// 放行"必须先改密码"的用户，路径一旦加前缀或改动就会把用户永久锁在外面。
#[utoipa::path(post, path = "/auth/change-password", tag = "auth", security(("bearer_jwt" = [])), request_body = ChangePasswordRequest, responses((status = 200, body = SuccessEnvelope<bool>), (status = 401, body = crate::types::ErrorEnvelope)))]
pub async fn change_password(
    State(state): State<AppState>,
    CurrentUser(mut user): CurrentUser,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<Json<SuccessEnvelope<bool>>, ApiError> {
    let valid = bcrypt::verify(&req.old_password, &user.password_hash).unwrap_or(false);
    if !valid {
        return Err(CoreError::Unauthorized("invalid old password".into()).into());
    }

    let new_hash = bcrypt::hash(&req.new_password, state.config.auth.bcrypt_rounds)
        .map_err(|e| CoreError::Internal(format!("failed to hash new password: {e}")))?;
    user.password_hash = new_hash;
    user.must_change_password = false;

    state.user_store.save(&user).await?;

    Ok(Json(SuccessEnvelope::new(true)))
}
