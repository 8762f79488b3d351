use crate::error::CoreError;
use crate::store::entity::User;
use async_trait::async_trait;

/// # Summary
/// 鉴权用户的持久化契约。API 网关的登录/改密端点依赖此接口，不关心后端是
/// SQLite 还是别的关系型存储。
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_by_username(&self, username: &str) -> Result<Option<User>, CoreError>;
    async fn save(&self, user: &User) -> Result<(), CoreError>;
}
