//! Durable ledger storage.
//!
//! The [`Ledger`] trait is the storage boundary of the service: users,
//! orders, accrual inflows and withdrawal outflows. Two implementations
//! are provided — [`PgLedger`] for production and [`MemoryLedger`] for
//! tests and development wiring.

use async_trait::async_trait;
use uuid::Uuid;

use scrip_core::{AccrualEntry, OrderRecord, OrderStatus, OrderWithAccrual, User, WithdrawalEntry};

mod memory;
mod postgres;

pub use memory::MemoryLedger;
pub use postgres::PgLedger;

/// Storage error. The `Duplicate*` variants are sentinel values that
/// service code matches on; everything else propagates verbatim.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("user already exists")]
    DuplicateUser,

    #[error("order already exists")]
    DuplicateOrder,

    #[error("withdrawal already recorded for this order")]
    DuplicateWithdrawal,

    #[error("insufficient balance")]
    InsufficientBalance,

    #[error("corrupt row: {0}")]
    Decode(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// The durable ledger behind the loyalty service.
///
/// All operations are cancel-safe in the usual async sense: dropping the
/// returned future abandons the call. Mutating operations are single
/// statements except [`Ledger::create_withdrawal`], which runs the
/// balance-authorization transaction described on the method.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Insert a new user. Fails with [`StoreError::DuplicateUser`] when
    /// the login is taken.
    async fn create_user(&self, login: &str, password_hash: &str) -> Result<User, StoreError>;

    /// Look a user up by login.
    async fn find_user(&self, login: &str) -> Result<Option<User>, StoreError>;

    /// Insert a new order in status `NEW`. Fails with
    /// [`StoreError::DuplicateOrder`] when the number is already known.
    async fn create_order(&self, order_id: &str, user_id: Uuid) -> Result<(), StoreError>;

    /// Look an order up by number.
    async fn find_order(&self, order_id: &str) -> Result<Option<OrderRecord>, StoreError>;

    /// All orders of a user, each with the sum of its accrual entries
    /// (0.0 when none — left-join semantics).
    async fn find_orders_with_accrual(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<OrderWithAccrual>, StoreError>;

    /// Unconditional status write. Callers are responsible for only
    /// requesting legal transitions.
    async fn update_order_status(
        &self,
        order_id: &str,
        status: OrderStatus,
    ) -> Result<(), StoreError>;

    /// Every order whose status is neither `PROCESSED` nor `INVALID`.
    async fn find_all_unprocessed_orders(&self) -> Result<Vec<OrderRecord>, StoreError>;

    /// Append an accrual inflow for an order.
    async fn create_accrual(&self, order_id: &str, amount: f64) -> Result<(), StoreError>;

    /// Record a withdrawal for a user, authorizing it atomically.
    ///
    /// Runs as one transaction serialized per user: lock the user row,
    /// recompute Σaccrual and Σwithdrawal, fail with
    /// [`StoreError::InsufficientBalance`] when the remaining balance
    /// does not cover `amount`, otherwise insert. A second withdrawal
    /// with the same order number fails with
    /// [`StoreError::DuplicateWithdrawal`].
    async fn create_withdrawal(
        &self,
        order_id: &str,
        user_id: Uuid,
        amount: f64,
    ) -> Result<(), StoreError>;

    /// All accrual entries credited to a user's orders.
    async fn find_accrual_flow(&self, user_id: Uuid) -> Result<Vec<AccrualEntry>, StoreError>;

    /// All withdrawal entries of a user.
    async fn find_withdrawal_flow(&self, user_id: Uuid)
        -> Result<Vec<WithdrawalEntry>, StoreError>;
}
