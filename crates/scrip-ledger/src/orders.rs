//! Order ingestion, ownership conflict resolution and listing.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use scrip_core::{verify_order_id, Order, Rfc3339Seconds};
use scrip_store::{Ledger, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    /// The same user uploaded this number before — idempotent success
    /// at the HTTP layer.
    #[error("order already uploaded by this user")]
    DuplicateBySameUser,

    /// Another user owns this number — a conflict.
    #[error("order already uploaded by another user")]
    DuplicateByOtherUser,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Order operations for authenticated callers.
pub struct OrderService {
    store: Arc<dyn Ledger>,
}

impl OrderService {
    pub fn new(store: Arc<dyn Ledger>) -> Self {
        Self { store }
    }

    /// Luhn check on an order number.
    pub fn verify_order_id(&self, order_id: &str) -> bool {
        verify_order_id(order_id)
    }

    /// Record a new order for `user_id`. A duplicate number resolves to
    /// one of the two duplicate errors depending on who owns the
    /// existing row; ownership never changes.
    pub async fn create_order(&self, order_id: &str, user_id: Uuid) -> Result<(), OrderError> {
        match self.store.create_order(order_id, user_id).await {
            Ok(()) => {
                info!(order_id, "order accepted");
                Ok(())
            }
            Err(StoreError::DuplicateOrder) => {
                match self.store.find_order(order_id).await? {
                    Some(existing) if existing.user_id == user_id => {
                        Err(OrderError::DuplicateBySameUser)
                    }
                    // Owned by someone else, or the row is no longer
                    // visible; either way this number is taken.
                    _ => Err(OrderError::DuplicateByOtherUser),
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    /// All orders of a user with their accrual sums, oldest first. An
    /// order with no positive accrual is listed without the `accrual`
    /// field.
    pub async fn get_orders(&self, user_id: Uuid) -> Result<Vec<Order>, OrderError> {
        let mut rows = self.store.find_orders_with_accrual(user_id).await?;
        rows.sort_by_key(|r| r.order.uploaded_at);

        Ok(rows
            .into_iter()
            .map(|r| Order {
                number: r.order.id,
                status: r.order.status,
                accrual: (r.accrual > 0.0).then_some(r.accrual),
                uploaded_at: Rfc3339Seconds(r.order.uploaded_at),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scrip_core::OrderStatus;
    use scrip_store::MemoryLedger;

    async fn setup() -> (OrderService, Arc<MemoryLedger>, Uuid, Uuid) {
        let ledger = MemoryLedger::arc();
        let alice = ledger.create_user("alice", "h").await.unwrap().id;
        let bob = ledger.create_user("bob", "h").await.unwrap().id;
        (OrderService::new(ledger.clone()), ledger, alice, bob)
    }

    #[tokio::test]
    async fn resubmission_by_the_same_user_is_idempotent() {
        let (orders, _ledger, alice, _) = setup().await;

        orders.create_order("12345678903", alice).await.unwrap();
        assert!(matches!(
            orders.create_order("12345678903", alice).await,
            Err(OrderError::DuplicateBySameUser)
        ));
    }

    #[tokio::test]
    async fn submission_by_another_user_is_a_conflict() {
        let (orders, _ledger, alice, bob) = setup().await;

        orders.create_order("12345678903", alice).await.unwrap();
        assert!(matches!(
            orders.create_order("12345678903", bob).await,
            Err(OrderError::DuplicateByOtherUser)
        ));
    }

    #[tokio::test]
    async fn listing_is_oldest_first_with_positive_accruals_only() {
        let (orders, ledger, alice, _) = setup().await;

        orders.create_order("12345678903", alice).await.unwrap();
        orders.create_order("2377225624", alice).await.unwrap();
        ledger
            .update_order_status("12345678903", OrderStatus::Processed)
            .await
            .unwrap();
        ledger.create_accrual("12345678903", 50.0).await.unwrap();

        let listed = orders.get_orders(alice).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed[0].uploaded_at <= listed[1].uploaded_at);

        let processed = listed.iter().find(|o| o.number == "12345678903").unwrap();
        assert_eq!(processed.accrual, Some(50.0));
        let fresh = listed.iter().find(|o| o.number == "2377225624").unwrap();
        assert_eq!(fresh.accrual, None);
        assert_eq!(fresh.status, OrderStatus::New);
    }

    #[tokio::test]
    async fn luhn_delegation() {
        let (orders, _, _, _) = setup().await;
        assert!(orders.verify_order_id("12345678903"));
        assert!(!orders.verify_order_id("12345678902"));
    }
}
