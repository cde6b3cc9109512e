//! In-memory ledger for tests and development wiring.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use scrip_core::{AccrualEntry, OrderRecord, OrderStatus, OrderWithAccrual, User, WithdrawalEntry};

use crate::{Ledger, StoreError};

#[derive(Default)]
struct Inner {
    users: HashMap<String, User>,
    orders: HashMap<String, OrderRecord>,
    accruals: Vec<AccrualEntry>,
    withdrawals: Vec<WithdrawalEntry>,
}

/// Mutex-guarded maps mirroring the four tables.
///
/// `create_withdrawal` performs the balance check and the insert under a
/// single lock acquisition, which gives it the same atomicity the
/// Postgres implementation gets from its transaction.
#[derive(Default)]
pub struct MemoryLedger {
    inner: Mutex<Inner>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Inner {
    fn earned(&self, user_id: Uuid) -> f64 {
        self.accruals
            .iter()
            .filter(|a| {
                self.orders
                    .get(&a.order_id)
                    .is_some_and(|o| o.user_id == user_id)
            })
            .map(|a| a.amount)
            .sum()
    }

    fn withdrawn(&self, user_id: Uuid) -> f64 {
        self.withdrawals
            .iter()
            .filter(|w| w.user_id == user_id)
            .map(|w| w.amount)
            .sum()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn create_user(&self, login: &str, password_hash: &str) -> Result<User, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.users.contains_key(login) {
            return Err(StoreError::DuplicateUser);
        }
        let user = User {
            id: Uuid::now_v7(),
            login: login.to_string(),
            password_hash: password_hash.to_string(),
        };
        inner.users.insert(login.to_string(), user.clone());
        Ok(user)
    }

    async fn find_user(&self, login: &str) -> Result<Option<User>, StoreError> {
        Ok(self.inner.lock().unwrap().users.get(login).cloned())
    }

    async fn create_order(&self, order_id: &str, user_id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.orders.contains_key(order_id) {
            return Err(StoreError::DuplicateOrder);
        }
        inner.orders.insert(
            order_id.to_string(),
            OrderRecord {
                id: order_id.to_string(),
                user_id,
                status: OrderStatus::New,
                uploaded_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn find_order(&self, order_id: &str) -> Result<Option<OrderRecord>, StoreError> {
        Ok(self.inner.lock().unwrap().orders.get(order_id).cloned())
    }

    async fn find_orders_with_accrual(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<OrderWithAccrual>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .map(|o| OrderWithAccrual {
                order: o.clone(),
                accrual: inner
                    .accruals
                    .iter()
                    .filter(|a| a.order_id == o.id)
                    .map(|a| a.amount)
                    .sum(),
            })
            .collect())
    }

    async fn update_order_status(
        &self,
        order_id: &str,
        status: OrderStatus,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(order) = inner.orders.get_mut(order_id) {
            order.status = status;
        }
        Ok(())
    }

    async fn find_all_unprocessed_orders(&self) -> Result<Vec<OrderRecord>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .orders
            .values()
            .filter(|o| !o.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn create_accrual(&self, order_id: &str, amount: f64) -> Result<(), StoreError> {
        self.inner.lock().unwrap().accruals.push(AccrualEntry {
            order_id: order_id.to_string(),
            amount,
            processed_at: Utc::now(),
        });
        Ok(())
    }

    async fn create_withdrawal(
        &self,
        order_id: &str,
        user_id: Uuid,
        amount: f64,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();

        if inner.withdrawals.iter().any(|w| w.order_id == order_id) {
            return Err(StoreError::DuplicateWithdrawal);
        }
        if inner.earned(user_id) - inner.withdrawn(user_id) < amount {
            return Err(StoreError::InsufficientBalance);
        }

        inner.withdrawals.push(WithdrawalEntry {
            order_id: order_id.to_string(),
            user_id,
            amount,
            processed_at: Utc::now(),
        });
        Ok(())
    }

    async fn find_accrual_flow(&self, user_id: Uuid) -> Result<Vec<AccrualEntry>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .accruals
            .iter()
            .filter(|a| {
                inner
                    .orders
                    .get(&a.order_id)
                    .is_some_and(|o| o.user_id == user_id)
            })
            .cloned()
            .collect())
    }

    async fn find_withdrawal_flow(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<WithdrawalEntry>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .withdrawals
            .iter()
            .filter(|w| w.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn user_with_funds(ledger: &MemoryLedger, amount: f64) -> Uuid {
        let user = ledger.create_user("funded", "hash").await.unwrap();
        ledger.create_order("12345678903", user.id).await.unwrap();
        ledger
            .update_order_status("12345678903", OrderStatus::Processed)
            .await
            .unwrap();
        ledger.create_accrual("12345678903", amount).await.unwrap();
        user.id
    }

    #[tokio::test]
    async fn duplicate_user_rejected() {
        let ledger = MemoryLedger::new();
        ledger.create_user("u", "h").await.unwrap();
        assert!(matches!(
            ledger.create_user("u", "h2").await,
            Err(StoreError::DuplicateUser)
        ));
    }

    #[tokio::test]
    async fn duplicate_order_never_creates_a_row() {
        let ledger = MemoryLedger::new();
        let a = ledger.create_user("a", "h").await.unwrap();
        let b = ledger.create_user("b", "h").await.unwrap();

        ledger.create_order("12345678903", a.id).await.unwrap();
        assert!(matches!(
            ledger.create_order("12345678903", b.id).await,
            Err(StoreError::DuplicateOrder)
        ));

        let order = ledger.find_order("12345678903").await.unwrap().unwrap();
        assert_eq!(order.user_id, a.id);
    }

    #[tokio::test]
    async fn withdrawal_respects_balance() {
        let ledger = MemoryLedger::new();
        let user = user_with_funds(&ledger, 50.0).await;

        ledger
            .create_withdrawal("4561261212345467", user, 20.0)
            .await
            .unwrap();
        assert!(matches!(
            ledger.create_withdrawal("2377225624", user, 40.0).await,
            Err(StoreError::InsufficientBalance)
        ));
    }

    #[tokio::test]
    async fn withdrawal_order_id_is_unique() {
        let ledger = MemoryLedger::new();
        let user = user_with_funds(&ledger, 50.0).await;

        ledger
            .create_withdrawal("4561261212345467", user, 10.0)
            .await
            .unwrap();
        assert!(matches!(
            ledger
                .create_withdrawal("4561261212345467", user, 10.0)
                .await,
            Err(StoreError::DuplicateWithdrawal)
        ));
    }

    #[tokio::test]
    async fn concurrent_withdrawals_cannot_overdraw() {
        let ledger = MemoryLedger::arc();
        let user = user_with_funds(&ledger, 100.0).await;

        let half_plus_one = 51.0;
        let a = {
            let ledger = ledger.clone();
            tokio::spawn(
                async move { ledger.create_withdrawal("2377225624", user, half_plus_one).await },
            )
        };
        let b = {
            let ledger = ledger.clone();
            tokio::spawn(async move {
                ledger
                    .create_withdrawal("4561261212345467", user, half_plus_one)
                    .await
            })
        };

        let (ra, rb) = (a.await.unwrap(), b.await.unwrap());
        assert!(
            ra.is_ok() ^ rb.is_ok(),
            "exactly one withdrawal must succeed"
        );

        let total: f64 = ledger
            .find_withdrawal_flow(user)
            .await
            .unwrap()
            .iter()
            .map(|w| w.amount)
            .sum();
        assert_eq!(total, half_plus_one);
    }

    #[tokio::test]
    async fn unprocessed_scan_skips_terminal_orders() {
        let ledger = MemoryLedger::new();
        let user = ledger.create_user("u", "h").await.unwrap();
        ledger.create_order("12345678903", user.id).await.unwrap();
        ledger.create_order("2377225624", user.id).await.unwrap();
        ledger
            .update_order_status("12345678903", OrderStatus::Processed)
            .await
            .unwrap();

        let pending = ledger.find_all_unprocessed_orders().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "2377225624");
    }
}
