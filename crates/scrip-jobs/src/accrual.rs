//! Accrual poller: drives each order through its lifecycle against the
//! external accrual calculator.
//!
//! Every poll is one job on the [`JobQueue`]. A job fetches
//! `GET {base}/api/orders/{id}` and reacts: unknown orders and backend
//! failures end the attempt, a rate limit pauses the whole queue for the
//! advertised window, and a 200 reply is applied through the order state
//! table. Re-polling an order is always done by the job itself (either a
//! delayed reschedule or a post-pause re-enqueue), so there is at most
//! one outstanding job per order.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info, warn};

use scrip_core::OrderStatus;
use scrip_store::{Ledger, StoreError};

use crate::queue::{JobQueue, QueueError};

/// Fallback rate-limit window when `Retry-After` is missing or garbled.
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Poller configuration.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Base URL of the external accrual calculator.
    pub base_url: String,
    /// Delay before re-polling an order the calculator has only
    /// REGISTERED so far.
    pub registered_delay: Duration,
    /// Per-request timeout on the outbound poll.
    pub request_timeout: Duration,
}

impl PollerConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            registered_delay: Duration::from_secs(60),
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_registered_delay(mut self, delay: Duration) -> Self {
        self.registered_delay = delay;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Remote lifecycle state reported by the calculator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
enum RemoteStatus {
    Registered,
    Processing,
    Processed,
    Invalid,
    #[serde(other)]
    Unknown,
}

/// Body of a 200 reply.
#[derive(Debug, Deserialize)]
struct AccrualReply {
    order: String,
    status: RemoteStatus,
    #[serde(default)]
    accrual: Option<f64>,
}

/// What one poll round observed.
#[derive(Debug)]
enum PollOutcome {
    /// 204 — the calculator does not know this order.
    Unregistered,
    /// 429 — pause globally for this many seconds, then retry the order.
    RateLimited(u64),
    /// 200 — apply the state table.
    Reply(AccrualReply),
}

#[derive(Debug, thiserror::Error)]
enum PollError {
    #[error("accrual request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("accrual service returned status {0}")]
    Server(u16),
}

/// Polls the external accrual calculator through the job queue.
pub struct AccrualPoller {
    store: Arc<dyn Ledger>,
    queue: Arc<JobQueue>,
    client: reqwest::Client,
    config: PollerConfig,
}

impl AccrualPoller {
    pub fn new(
        store: Arc<dyn Ledger>,
        queue: Arc<JobQueue>,
        config: PollerConfig,
    ) -> Arc<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .expect("reqwest client construction cannot fail with static options");

        Arc::new(Self {
            store,
            queue,
            client,
            config,
        })
    }

    /// Submit one polling job for `order_id`. Blocks while the queue is
    /// at capacity; fails only when the queue has shut down.
    pub async fn calculate_accrual(
        self: Arc<Self>,
        order_id: impl Into<String>,
    ) -> Result<(), QueueError> {
        let order_id = order_id.into();
        let queue = self.queue.clone();
        queue.enqueue(self.poll_order(order_id)).await
    }

    /// Enqueue one polling job per order that is not yet terminal, so
    /// interrupted work resumes after a restart.
    pub async fn start_calculation_accruals(self: Arc<Self>) -> Result<(), StoreError> {
        let orders = self.store.find_all_unprocessed_orders().await?;
        let pending = orders.len();
        for order in orders {
            if let Err(err) = self.clone().calculate_accrual(order.id).await {
                warn!(error = %err, "stopped resuming accrual jobs");
                break;
            }
        }
        if pending > 0 {
            info!(pending, "resumed accrual polling for unprocessed orders");
        }
        Ok(())
    }

    /// One polling round for one order. Runs inside a queue worker;
    /// failures are logged, never surfaced.
    fn poll_order(self: Arc<Self>, order_id: String) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
            let outcome = match self.fetch_accrual(&order_id).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    // Dropped attempt: the order stays non-terminal and is
                    // picked up again on the next process start.
                    error!(order_id = %order_id, error = %err, "accrual poll failed");
                    return;
                }
            };

            match outcome {
                PollOutcome::Unregistered => {
                    info!(order_id = %order_id, "order not registered with accrual service");
                }
                PollOutcome::RateLimited(retry_after) => {
                    info!(order_id = %order_id, retry_after, "accrual service rate limit, pausing queue");
                    self.queue
                        .pause_and_resume(Duration::from_secs(retry_after));
                    if let Err(err) = self.clone().calculate_accrual(order_id.as_str()).await {
                        warn!(order_id = %order_id, error = %err, "could not requeue rate-limited order");
                    }
                }
                PollOutcome::Reply(reply) => self.apply_reply(&order_id, reply).await,
            }
        })
    }

    /// The 200-reply state table.
    async fn apply_reply(self: Arc<Self>, order_id: &str, reply: AccrualReply) {
        info!(order_id = %reply.order, status = ?reply.status, "accrual data received");

        match reply.status {
            RemoteStatus::Registered => {
                let poller = self.clone();
                let order_id = order_id.to_string();
                self.queue
                    .schedule_job(poller.poll_order(order_id), self.config.registered_delay);
            }
            RemoteStatus::Processing => {
                if let Err(err) = self
                    .store
                    .update_order_status(order_id, OrderStatus::Processing)
                    .await
                {
                    error!(order_id, error = %err, "failed to update order status");
                }
            }
            RemoteStatus::Processed => {
                // Status first, then the ledger entry; a crash between
                // the two leaves a terminal order with no accrual row.
                if let Err(err) = self
                    .store
                    .update_order_status(order_id, OrderStatus::Processed)
                    .await
                {
                    error!(order_id, error = %err, "failed to update order status");
                    return;
                }

                match reply.accrual {
                    Some(amount) if amount > 0.0 => {
                        if let Err(err) = self.store.create_accrual(order_id, amount).await {
                            error!(order_id, error = %err, "failed to record accrual");
                            return;
                        }
                        info!(order_id, amount, "accrual recorded");
                    }
                    _ => {}
                }
            }
            RemoteStatus::Invalid => {
                if let Err(err) = self
                    .store
                    .update_order_status(order_id, OrderStatus::Invalid)
                    .await
                {
                    error!(order_id, error = %err, "failed to update order status");
                }
            }
            RemoteStatus::Unknown => {
                error!(order_id, "accrual service reported an unrecognized status");
            }
        }
    }

    /// One GET against the calculator, classified per the external
    /// contract: 204, 429 (+`Retry-After`), 5xx, 200.
    async fn fetch_accrual(&self, order_id: &str) -> Result<PollOutcome, PollError> {
        let url = format!("{}/api/orders/{}", self.config.base_url, order_id);
        let response = self.client.get(&url).send().await?;

        match response.status().as_u16() {
            204 => Ok(PollOutcome::Unregistered),
            429 => {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
                Ok(PollOutcome::RateLimited(retry_after))
            }
            200 => Ok(PollOutcome::Reply(response.json::<AccrualReply>().await?)),
            other => Err(PollError::Server(other)),
        }
    }
}
