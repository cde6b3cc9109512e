//! Order ingestion and balance accounting on top of the ledger store.

mod balance;
mod orders;

pub use balance::{BalanceError, BalanceService};
pub use orders::{OrderError, OrderService};
