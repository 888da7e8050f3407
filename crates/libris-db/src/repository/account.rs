//! # Account Repository
//!
//! Donor, borrower, and administrator accounts. `user_id` and `email` are
//! unique; credentials live with the external auth service.

use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use libris_core::Account;

const SELECT_ACCOUNT: &str = r#"
    SELECT id, user_id, username, email, role, created_at
    FROM accounts
"#;

/// Repository for account database operations.
#[derive(Debug, Clone)]
pub struct AccountRepository {
    pool: SqlitePool,
}

impl AccountRepository {
    /// Creates a new AccountRepository.
    pub fn new(pool: SqlitePool) -> Self {
        AccountRepository { pool }
    }

    /// Inserts an account.
    ///
    /// ## Returns
    /// * `Err(DbError::UniqueViolation)` - user id or email taken
    pub async fn insert(&self, account: &Account) -> DbResult<()> {
        debug!(user_id = %account.user_id, "Inserting account");

        sqlx::query(
            r#"
            INSERT INTO accounts (id, user_id, username, email, role, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&account.id)
        .bind(&account.user_id)
        .bind(&account.username)
        .bind(&account.email)
        .bind(account.role)
        .bind(account.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match DbError::from(e) {
            err if err.is_unique_violation_on("accounts.email") => {
                err.with_value(account.email.as_str())
            }
            err => err.with_value(account.user_id.as_str()),
        })?;

        Ok(())
    }

    /// Gets an account by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Account>> {
        let sql = format!("{SELECT_ACCOUNT} WHERE id = ?1");

        let account = sqlx::query_as::<_, Account>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(account)
    }

    /// Gets an account by its login handle.
    pub async fn get_by_user_id(&self, user_id: &str) -> DbResult<Option<Account>> {
        let sql = format!("{SELECT_ACCOUNT} WHERE user_id = ?1");

        let account = sqlx::query_as::<_, Account>(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(account)
    }

    /// Counts accounts (for diagnostics).
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM accounts")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}
