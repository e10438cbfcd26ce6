use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};

use crate::error::ApiError;
use crate::loyalty::models::{Client, Level};

const CLIENT_COLUMNS: &str =
    "id, chat_id, first_name, last_name, birth_date, gender, identifier, level_id, total_spent, tags";

/// Repository for client records
#[derive(Clone)]
pub struct ClientRepository {
    pool: PgPool,
}

impl ClientRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Find a client by its human-readable identifier
    pub async fn find_by_identifier(&self, identifier: &str) -> Result<Option<Client>, ApiError> {
        let client = sqlx::query_as::<_, Client>(&format!(
            "SELECT {CLIENT_COLUMNS} FROM clients WHERE identifier = $1"
        ))
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?;

        Ok(client)
    }

    /// Find a client by identifier and take an exclusive lock on its row.
    /// Serializes `total_spent` mutation against concurrent redemptions and
    /// purchase recording.
    pub async fn lock_by_identifier(
        &self,
        conn: &mut PgConnection,
        identifier: &str,
    ) -> Result<Option<Client>, ApiError> {
        let client = sqlx::query_as::<_, Client>(&format!(
            "SELECT {CLIENT_COLUMNS} FROM clients WHERE identifier = $1 FOR UPDATE"
        ))
        .bind(identifier)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(client)
    }

    /// Atomically add an amount to the client's lifetime spend.
    /// Callers must already hold the client row lock.
    pub async fn add_spend(
        &self,
        conn: &mut PgConnection,
        client_id: i64,
        amount: Decimal,
    ) -> Result<Client, ApiError> {
        let client = sqlx::query_as::<_, Client>(&format!(
            "UPDATE clients SET total_spent = total_spent + $1 WHERE id = $2
             RETURNING {CLIENT_COLUMNS}"
        ))
        .bind(amount)
        .bind(client_id)
        .fetch_one(&mut *conn)
        .await?;

        Ok(client)
    }

    /// Point the client at a new loyalty level
    pub async fn set_level(
        &self,
        conn: &mut PgConnection,
        client_id: i64,
        level_id: i64,
    ) -> Result<(), ApiError> {
        sqlx::query("UPDATE clients SET level_id = $1 WHERE id = $2")
            .bind(level_id)
            .bind(client_id)
            .execute(&mut *conn)
            .await?;

        Ok(())
    }
}

/// Repository for the ordered tier table. Read-only from the engine's
/// perspective.
#[derive(Clone)]
pub struct LevelRepository {
    pool: PgPool,
}

impl LevelRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// All levels ordered by spend threshold, read through the pool
    pub async fn find_all(&self) -> Result<Vec<Level>, ApiError> {
        let levels = sqlx::query_as::<_, Level>(
            r#"SELECT id, name, threshold_amount, perks, "order" FROM levels
               ORDER BY threshold_amount"#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(levels)
    }

    /// All levels ordered by spend threshold, read inside a transaction
    pub async fn find_all_in(&self, conn: &mut PgConnection) -> Result<Vec<Level>, ApiError> {
        let levels = sqlx::query_as::<_, Level>(
            r#"SELECT id, name, threshold_amount, perks, "order" FROM levels
               ORDER BY threshold_amount"#,
        )
        .fetch_all(&mut *conn)
        .await?;

        Ok(levels)
    }
}
