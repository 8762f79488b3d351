use crate::SqliteStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use tickerflow_core::error::CoreError;
use tickerflow_core::store::entity::User;
use tickerflow_core::store::port::UserStore;

fn db_err(e: sqlx::Error) -> CoreError {
    CoreError::Internal(format!("store error: {e}"))
}

/// # Summary
/// [`UserStore`] 的 SQLite 实现，供鉴权中间件的登录/改密端点使用。
#[async_trait]
impl UserStore for SqliteStore {
    async fn get_by_username(&self, username: &str) -> Result<Option<User>, CoreError> {
        let row = sqlx::query(
            "SELECT id, username, password_hash, is_admin, must_change_password, created_at FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(self.pool())
        .await
        .map_err(db_err)?;

        Ok(row.map(|r| User {
            id: r.get("id"),
            username: r.get("username"),
            password_hash: r.get("password_hash"),
            is_admin: r.get::<i64, _>("is_admin") != 0,
            must_change_password: r.get::<i64, _>("must_change_password") != 0,
            created_at: r.get::<DateTime<Utc>, _>("created_at"),
        }))
    }

    async fn save(&self, user: &User) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, username, password_hash, is_admin, must_change_password, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                username = excluded.username,
                password_hash = excluded.password_hash,
                is_admin = excluded.is_admin,
                must_change_password = excluded.must_change_password
            "#,
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(i64::from(user.is_admin))
        .bind(i64::from(user.must_change_password))
        .bind(user.created_at)
        .execute(self.pool())
        .await
        .map_err(db_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn sample_user(username: &str) -> User {
        User {
            id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            password_hash: "bcrypt-hash".to_string(),
            is_admin: false,
            must_change_password: false,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn save_then_get_roundtrips() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        let user = sample_user("alice");
        store.save(&user).await.unwrap();
        let found = store.get_by_username("alice").await.unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert!(!found.is_admin);
    }

    #[tokio::test]
    async fn get_by_username_misses_unknown_user() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        assert!(store.get_by_username("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_upserts_on_conflicting_id() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        let mut user = sample_user("bob");
        store.save(&user).await.unwrap();
        user.password_hash = "new-hash".to_string();
        store.save(&user).await.unwrap();
        let found = store.get_by_username("bob").await.unwrap().unwrap();
        assert_eq!(found.password_hash, "new-hash");
    }
}
