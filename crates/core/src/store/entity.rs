use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 认证用户记录。`password_hash` 为 bcrypt 摘要，从不以明文形式往返。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub password_hash: String,
    pub is_admin: bool,
    pub must_change_password: bool,
    pub created_at: DateTime<Utc>,
}
