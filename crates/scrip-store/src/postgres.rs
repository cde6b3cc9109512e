//! Postgres-backed ledger implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use scrip_core::{AccrualEntry, OrderRecord, OrderStatus, OrderWithAccrual, User, WithdrawalEntry};

use crate::{Ledger, StoreError};

/// SQLSTATE for unique-constraint violations.
const UNIQUE_VIOLATION: &str = "23505";

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION)
    )
}

/// Ledger store on a Postgres connection pool.
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    /// Connect to `dsn` and verify the connection.
    pub async fn connect(dsn: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .acquire_timeout(std::time::Duration::from_secs(5))
            .connect(dsn)
            .await?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool (tests, shared pools).
    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the embedded schema migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::info!("database migrations applied");
        Ok(())
    }

    /// Close the underlying pool. Called on orderly shutdown.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn order_from_row(row: &sqlx::postgres::PgRow) -> Result<OrderRecord, StoreError> {
    let status: String = row.try_get("status")?;
    Ok(OrderRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        status: status
            .parse::<OrderStatus>()
            .map_err(|e| StoreError::Decode(e.to_string()))?,
        uploaded_at: row.try_get::<DateTime<Utc>, _>("uploaded_at")?,
    })
}

#[async_trait]
impl Ledger for PgLedger {
    async fn create_user(&self, login: &str, password_hash: &str) -> Result<User, StoreError> {
        let id = Uuid::now_v7();
        sqlx::query(
            r#"
            INSERT INTO users (id, login, password_hash)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(id)
        .bind(login)
        .bind(password_hash)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::DuplicateUser
            } else {
                StoreError::Database(e)
            }
        })?;

        Ok(User {
            id,
            login: login.to_string(),
            password_hash: password_hash.to_string(),
        })
    }

    async fn find_user(&self, login: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, login, password_hash
            FROM users
            WHERE login = $1
            "#,
        )
        .bind(login)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            Ok(User {
                id: r.try_get("id")?,
                login: r.try_get("login")?,
                password_hash: r.try_get("password_hash")?,
            })
        })
        .transpose()
    }

    async fn create_order(&self, order_id: &str, user_id: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id)
            VALUES ($1, $2)
            "#,
        )
        .bind(order_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::DuplicateOrder
            } else {
                StoreError::Database(e)
            }
        })?;

        Ok(())
    }

    async fn find_order(&self, order_id: &str) -> Result<Option<OrderRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, status, uploaded_at
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(order_from_row).transpose()
    }

    async fn find_orders_with_accrual(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<OrderWithAccrual>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                o.id,
                o.user_id,
                o.status,
                o.uploaded_at,
                SUM(COALESCE(af.amount, 0)) AS accrual
            FROM orders o
            LEFT JOIN accrual_flow af ON o.id = af.order_id
            WHERE o.user_id = $1
            GROUP BY o.id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| {
                Ok(OrderWithAccrual {
                    order: order_from_row(r)?,
                    accrual: r.try_get("accrual")?,
                })
            })
            .collect()
    }

    async fn update_order_status(
        &self,
        order_id: &str,
        status: OrderStatus,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE orders
            SET status = $2
            WHERE id = $1
            "#,
        )
        .bind(order_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_all_unprocessed_orders(&self) -> Result<Vec<OrderRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, status, uploaded_at
            FROM orders
            WHERE status NOT IN ('INVALID', 'PROCESSED')
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(order_from_row).collect()
    }

    async fn create_accrual(&self, order_id: &str, amount: f64) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO accrual_flow (order_id, amount)
            VALUES ($1, $2)
            "#,
        )
        .bind(order_id)
        .bind(amount)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn create_withdrawal(
        &self,
        order_id: &str,
        user_id: Uuid,
        amount: f64,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        // Row lock serializes withdrawals per user; without it two
        // concurrent requests both pass the balance check.
        sqlx::query("SELECT id FROM users WHERE id = $1 FOR UPDATE")
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?;

        let earned: f64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(af.amount), 0)
            FROM accrual_flow af
            JOIN orders o ON af.order_id = o.id
            WHERE o.user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        let withdrawn: f64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(amount), 0)
            FROM withdrawal_flow
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        if earned - withdrawn < amount {
            return Err(StoreError::InsufficientBalance);
        }

        sqlx::query(
            r#"
            INSERT INTO withdrawal_flow (order_id, user_id, amount)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(order_id)
        .bind(user_id)
        .bind(amount)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::DuplicateWithdrawal
            } else {
                StoreError::Database(e)
            }
        })?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_accrual_flow(&self, user_id: Uuid) -> Result<Vec<AccrualEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT af.order_id, af.amount, af.processed_at
            FROM accrual_flow af
            LEFT JOIN orders o ON af.order_id = o.id
            WHERE o.user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| {
                Ok(AccrualEntry {
                    order_id: r.try_get("order_id")?,
                    amount: r.try_get("amount")?,
                    processed_at: r.try_get::<DateTime<Utc>, _>("processed_at")?,
                })
            })
            .collect()
    }

    async fn find_withdrawal_flow(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<WithdrawalEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT order_id, user_id, amount, processed_at
            FROM withdrawal_flow
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| {
                Ok(WithdrawalEntry {
                    order_id: r.try_get("order_id")?,
                    user_id: r.try_get("user_id")?,
                    amount: r.try_get("amount")?,
                    processed_at: r.try_get::<DateTime<Utc>, _>("processed_at")?,
                })
            })
            .collect()
    }
}
