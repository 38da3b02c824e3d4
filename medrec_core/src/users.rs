//! Identity store: user registration and login lookup.
//!
//! Email and username are each unique. Registration checks both up front,
//! but the unique indexes are what actually decide a race between two
//! concurrent registrations.

use crate::credentials::PasswordHasher;
use crate::db::{self, conflict_or_database, Database};
use crate::{AuthError, Error, NewUser, Result, User};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use uuid::Uuid;

const ENTITY: &str = "user";

/// Persistent user accounts
#[derive(Clone, Debug)]
pub struct UserStore {
    pool: SqlitePool,
    hasher: PasswordHasher,
}

impl UserStore {
    pub fn new(db: &Database, hasher: PasswordHasher) -> Self {
        Self {
            pool: db.pool().clone(),
            hasher,
        }
    }

    /// Register a new account; the password is stored only as a digest.
    pub async fn register(&self, new_user: &NewUser) -> Result<User> {
        let email = new_user.email.trim();
        let username = new_user.username.trim();

        if !crate::types::is_valid_email(email) {
            return Err(Error::Validation(format!("{:?} is not a valid email address", email)));
        }
        if username.is_empty() {
            return Err(Error::Validation("username must not be empty".into()));
        }
        if new_user.password.is_empty() {
            return Err(Error::Validation("password must not be empty".into()));
        }

        if self.exists("email", email).await? {
            tracing::warn!("Registration rejected: email already registered");
            return Err(Error::Conflict {
                entity: ENTITY,
                field: "email".into(),
            });
        }
        if self.exists("username", username).await? {
            tracing::warn!("Registration rejected: username {:?} already taken", username);
            return Err(Error::Conflict {
                entity: ENTITY,
                field: "username".into(),
            });
        }

        let password_hash = self.hash_off_thread(new_user.password.clone()).await?;
        let user = User {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            username: username.to_string(),
            created_at: Utc::now(),
            is_active: true,
        };

        sqlx::query(
            "INSERT INTO users (id, email, username, password_hash, created_at, is_active)
             VALUES (?, ?, ?, ?, ?, 1)",
        )
        .bind(&user.id)
        .bind(&user.email)
        .bind(&user.username)
        .bind(&password_hash)
        .bind(user.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_or_database(e, ENTITY))?;

        tracing::info!("Registered user {:?} ({})", user.username, user.id);
        Ok(user)
    }

    /// Resolve `identifier` (username or email) and check the password.
    ///
    /// Every failure mode yields the same `InvalidCredentials`.
    pub async fn authenticate(&self, identifier: &str, password: &str) -> Result<User> {
        let row = sqlx::query(
            "SELECT id, email, username, password_hash, created_at, is_active
             FROM users WHERE username = ? OR email = ?
             LIMIT 1",
        )
        .bind(identifier)
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            tracing::info!("Login failed: unknown identifier");
            return Err(AuthError::InvalidCredentials.into());
        };

        let digest: String = row.try_get("password_hash")?;
        let user = user_from_row(&row)?;

        let hasher = self.hasher;
        let candidate = password.to_string();
        let matches = tokio::task::spawn_blocking(move || hasher.verify_password(&candidate, &digest))
            .await
            .unwrap_or_else(|e| {
                tracing::error!("Password verification task failed: {}", e);
                false
            });

        if !matches || !user.is_active {
            tracing::info!("Login failed for {:?}", user.username);
            return Err(AuthError::InvalidCredentials.into());
        }
        Ok(user)
    }

    pub async fn count(&self) -> Result<u64> {
        db::count(&self.pool, "SELECT COUNT(*) FROM users").await
    }

    /// All users, oldest first
    pub async fn list_summaries(&self) -> Result<Vec<User>> {
        let rows = sqlx::query(
            "SELECT id, email, username, created_at, is_active FROM users ORDER BY created_at, id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(user_from_row).collect()
    }

    async fn exists(&self, column: &'static str, value: &str) -> Result<bool> {
        let sql = format!("SELECT 1 FROM users WHERE {} = ? LIMIT 1", column);
        let row = sqlx::query(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn hash_off_thread(&self, password: String) -> Result<String> {
        let hasher = self.hasher;
        tokio::task::spawn_blocking(move || hasher.hash_password(&password))
            .await
            .map_err(|e| Error::Other(format!("Password hashing task failed: {}", e)))?
    }
}

fn user_from_row(row: &SqliteRow) -> Result<User> {
    let created_at: String = row.try_get("created_at")?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| Error::Other(format!("Invalid user timestamp {:?}: {}", created_at, e)))?
        .with_timezone(&Utc);
    let is_active: i64 = row.try_get("is_active")?;

    Ok(User {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        username: row.try_get("username")?,
        created_at,
        is_active: is_active != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::open_temp_db;

    fn store(db: &Database) -> UserStore {
        UserStore::new(db, PasswordHasher::new(4).unwrap())
    }

    fn new_user(email: &str, username: &str) -> NewUser {
        NewUser {
            email: email.into(),
            username: username.into(),
            password: "s3cret-pass".into(),
        }
    }

    #[tokio::test]
    async fn test_register_returns_user_without_secret() {
        let (_dir, db) = open_temp_db().await;
        let users = store(&db);

        let user = users.register(&new_user("asha@example.com", "asha")).await.unwrap();
        assert!(!user.id.is_empty());
        assert_eq!(user.email, "asha@example.com");
        assert_eq!(user.username, "asha");
        assert!(user.is_active);

        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("s3cret-pass"));
        assert!(!json.contains("password"));

        let stored: String = sqlx::query("SELECT password_hash FROM users WHERE id = ?")
            .bind(&user.id)
            .fetch_one(db.pool())
            .await
            .unwrap()
            .get(0);
        assert_ne!(stored, "s3cret-pass");
        assert!(stored.starts_with("$2"));
    }

    #[tokio::test]
    async fn test_duplicate_email_conflicts() {
        let (_dir, db) = open_temp_db().await;
        let users = store(&db);

        users.register(&new_user("asha@example.com", "asha")).await.unwrap();
        let err = users
            .register(&new_user("asha@example.com", "asha2"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Conflict { ref field, .. } if field == "email"));
        assert_eq!(users.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_username_conflicts() {
        let (_dir, db) = open_temp_db().await;
        let users = store(&db);

        users.register(&new_user("asha@example.com", "asha")).await.unwrap();
        let err = users
            .register(&new_user("other@example.com", "asha"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Conflict { ref field, .. } if field == "username"));
        assert_eq!(users.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_registrations_store_one_user() {
        let (_dir, db) = open_temp_db().await;
        let users = store(&db);

        let a = users.clone();
        let b = users.clone();
        let (first, second) = tokio::join!(
            async move { a.register(&new_user("race@example.com", "racer")).await },
            async move { b.register(&new_user("race@example.com", "racer")).await },
        );

        let outcomes = [first, second];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(outcomes
            .iter()
            .any(|r| matches!(r, Err(Error::Conflict { .. }))));
        assert_eq!(users.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_invalid_email_rejected() {
        let (_dir, db) = open_temp_db().await;
        let users = store(&db);

        let err = users.register(&new_user("not-an-email", "asha")).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(users.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_overlong_password_propagates_hashing_error() {
        let (_dir, db) = open_temp_db().await;
        let users = store(&db);

        let mut user = new_user("asha@example.com", "asha");
        user.password = "p".repeat(100);
        let err = users.register(&user).await.unwrap_err();
        assert!(matches!(err, Error::Hashing(_)));
        assert_eq!(users.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_authenticate_by_username_or_email() {
        let (_dir, db) = open_temp_db().await;
        let users = store(&db);
        users.register(&new_user("asha@example.com", "asha")).await.unwrap();

        let by_name = users.authenticate("asha", "s3cret-pass").await.unwrap();
        let by_email = users
            .authenticate("asha@example.com", "s3cret-pass")
            .await
            .unwrap();
        assert_eq!(by_name.id, by_email.id);
    }

    #[tokio::test]
    async fn test_authenticate_failures_are_indistinguishable() {
        let (_dir, db) = open_temp_db().await;
        let users = store(&db);
        users.register(&new_user("asha@example.com", "asha")).await.unwrap();

        let wrong_password = users.authenticate("asha", "nope").await.unwrap_err();
        let unknown_user = users.authenticate("nobody", "s3cret-pass").await.unwrap_err();

        assert!(matches!(wrong_password, Error::Auth(AuthError::InvalidCredentials)));
        assert!(matches!(unknown_user, Error::Auth(AuthError::InvalidCredentials)));
        assert_eq!(wrong_password.to_string(), unknown_user.to_string());
    }

    #[tokio::test]
    async fn test_inactive_user_cannot_authenticate() {
        let (_dir, db) = open_temp_db().await;
        let users = store(&db);
        users.register(&new_user("asha@example.com", "asha")).await.unwrap();

        sqlx::query("UPDATE users SET is_active = 0 WHERE username = 'asha'")
            .execute(db.pool())
            .await
            .unwrap();

        let err = users.authenticate("asha", "s3cret-pass").await.unwrap_err();
        assert!(matches!(err, Error::Auth(AuthError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn test_list_summaries() {
        let (_dir, db) = open_temp_db().await;
        let users = store(&db);
        users.register(&new_user("asha@example.com", "asha")).await.unwrap();
        users.register(&new_user("ravi@example.com", "ravi")).await.unwrap();

        let all = users.list_summaries().await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().any(|u| u.username == "ravi" && u.email == "ravi@example.com"));
    }
}
