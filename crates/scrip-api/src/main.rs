use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use scrip_api::{build_app, AppState, Config};
use scrip_auth::{AuthService, TokenService};
use scrip_jobs::{AccrualPoller, JobQueue, PollerConfig};
use scrip_ledger::{BalanceService, OrderService};
use scrip_store::{Ledger, PgLedger};

/// Depth of the polling job queue.
const QUEUE_CAPACITY: usize = 100;
/// Size of the polling worker pool.
const QUEUE_WORKERS: usize = 2;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();
    scrip_observability::init(&config.log_level, &config.env);

    if config.database_uri.is_empty() {
        anyhow::bail!("DATABASE_URI must be set");
    }

    let pg = Arc::new(PgLedger::connect(&config.database_uri).await?);
    pg.migrate().await?;
    let ledger: Arc<dyn Ledger> = pg.clone();

    let queue = JobQueue::new(CancellationToken::new(), QUEUE_CAPACITY, QUEUE_WORKERS);
    let accrual = AccrualPoller::new(
        ledger.clone(),
        queue.clone(),
        PollerConfig::new(config.accrual_address.clone()),
    );

    // Resume polling for orders interrupted by the previous run.
    accrual.clone().start_calculation_accruals().await?;

    let state = AppState {
        auth: Arc::new(AuthService::new(ledger.clone())),
        tokens: Arc::new(TokenService::new(&config.auth_secret())),
        orders: Arc::new(OrderService::new(ledger.clone())),
        balance: Arc::new(BalanceService::new(ledger.clone())),
        accrual,
    };

    let app = build_app(state);
    let listener = tokio::net::TcpListener::bind(&config.run_address).await?;
    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Orderly teardown: drain the queue before the pool goes away.
    queue.shutdown().await;
    pg.close().await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("termination signal received, shutting down");
}
