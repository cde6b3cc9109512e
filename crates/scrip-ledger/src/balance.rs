//! Balance derivation and withdrawal accounting.
//!
//! The balance is never stored: it is the difference of the two ledger
//! flows. Reads tolerate concurrent writers; the consistency point is
//! the store's withdrawal transaction, which re-derives the balance
//! under a per-user lock before inserting the outflow row.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use scrip_core::{verify_order_id, Balance, Rfc3339Seconds, WithdrawalItem};
use scrip_store::{Ledger, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum BalanceError {
    #[error("order number failed validation")]
    InvalidOrderId,

    #[error("withdrawal amount must be positive")]
    InvalidAmount,

    #[error("insufficient balance")]
    Insufficient,

    #[error("withdrawal already recorded for this order")]
    Duplicate,

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for BalanceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InsufficientBalance => BalanceError::Insufficient,
            StoreError::DuplicateWithdrawal => BalanceError::Duplicate,
            other => BalanceError::Store(other),
        }
    }
}

/// Balance reads and withdrawal writes for authenticated callers.
pub struct BalanceService {
    store: Arc<dyn Ledger>,
}

impl BalanceService {
    pub fn new(store: Arc<dyn Ledger>) -> Self {
        Self { store }
    }

    /// Current and withdrawn totals derived from the two flows.
    pub async fn get_user_balance(&self, user_id: Uuid) -> Result<Balance, BalanceError> {
        let earned: f64 = self
            .store
            .find_accrual_flow(user_id)
            .await?
            .iter()
            .map(|e| e.amount)
            .sum();
        let withdrawn: f64 = self
            .store
            .find_withdrawal_flow(user_id)
            .await?
            .iter()
            .map(|e| e.amount)
            .sum();

        Ok(Balance {
            current: earned - withdrawn,
            withdrawn,
        })
    }

    /// Authorize and record a withdrawal against `order_id`.
    ///
    /// Preconditions checked here: a Luhn-valid order number and a
    /// positive amount. The balance check itself happens inside the
    /// store transaction so that concurrent withdrawals of the same
    /// user cannot both pass it.
    pub async fn create_withdrawal(
        &self,
        order_id: &str,
        user_id: Uuid,
        amount: f64,
    ) -> Result<(), BalanceError> {
        if !verify_order_id(order_id) {
            return Err(BalanceError::InvalidOrderId);
        }
        if amount <= 0.0 {
            return Err(BalanceError::InvalidAmount);
        }

        self.store
            .create_withdrawal(order_id, user_id, amount)
            .await?;
        info!(order_id, amount, "withdrawal recorded");
        Ok(())
    }

    /// Withdrawal history, oldest first.
    pub async fn get_withdrawal_flow(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<WithdrawalItem>, BalanceError> {
        let mut entries = self.store.find_withdrawal_flow(user_id).await?;
        entries.sort_by_key(|e| e.processed_at);

        Ok(entries
            .into_iter()
            .map(|e| WithdrawalItem {
                order: e.order_id,
                sum: e.amount,
                processed_at: Rfc3339Seconds(e.processed_at),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scrip_core::OrderStatus;
    use scrip_store::MemoryLedger;

    async fn funded_user(amount: f64) -> (BalanceService, Uuid) {
        let ledger = MemoryLedger::arc();
        let user = ledger.create_user("alice", "h").await.unwrap().id;
        ledger.create_order("12345678903", user).await.unwrap();
        ledger
            .update_order_status("12345678903", OrderStatus::Processed)
            .await
            .unwrap();
        ledger.create_accrual("12345678903", amount).await.unwrap();
        (BalanceService::new(ledger), user)
    }

    #[tokio::test]
    async fn balance_is_earned_minus_withdrawn() {
        let (balance, user) = funded_user(50.0).await;

        balance
            .create_withdrawal("4561261212345467", user, 20.0)
            .await
            .unwrap();

        let b = balance.get_user_balance(user).await.unwrap();
        assert_eq!(b.current, 30.0);
        assert_eq!(b.withdrawn, 20.0);
    }

    #[tokio::test]
    async fn withdrawal_preconditions() {
        let (balance, user) = funded_user(50.0).await;

        assert!(matches!(
            balance.create_withdrawal("12345678902", user, 10.0).await,
            Err(BalanceError::InvalidOrderId)
        ));
        assert!(matches!(
            balance
                .create_withdrawal("4561261212345467", user, 0.0)
                .await,
            Err(BalanceError::InvalidAmount)
        ));
        assert!(matches!(
            balance
                .create_withdrawal("4561261212345467", user, -3.0)
                .await,
            Err(BalanceError::InvalidAmount)
        ));
    }

    #[tokio::test]
    async fn overdraw_and_duplicate_are_rejected() {
        let (balance, user) = funded_user(50.0).await;

        assert!(matches!(
            balance
                .create_withdrawal("4561261212345467", user, 9999.0)
                .await,
            Err(BalanceError::Insufficient)
        ));

        balance
            .create_withdrawal("4561261212345467", user, 20.0)
            .await
            .unwrap();
        assert!(matches!(
            balance
                .create_withdrawal("4561261212345467", user, 5.0)
                .await,
            Err(BalanceError::Duplicate)
        ));
    }

    #[tokio::test]
    async fn history_is_oldest_first() {
        let (balance, user) = funded_user(50.0).await;

        balance
            .create_withdrawal("4561261212345467", user, 5.0)
            .await
            .unwrap();
        balance
            .create_withdrawal("2377225624", user, 10.0)
            .await
            .unwrap();

        let flow = balance.get_withdrawal_flow(user).await.unwrap();
        assert_eq!(flow.len(), 2);
        assert!(flow[0].processed_at <= flow[1].processed_at);
        assert_eq!(flow[0].order, "4561261212345467");
    }
}
