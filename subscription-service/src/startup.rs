//! Application startup and lifecycle management.

use crate::billing::{BillingCycleEngine, BillingScheduler, PaymentSettlement, SubscriptionManager};
use crate::clock::{Clock, SystemClock};
use crate::config::{BillingJobConfig, SubscriptionConfig};
use crate::handlers;
use crate::services::{init_metrics, Database, DistributedLock, RedisLock, Store};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::tracing::request_id_middleware;
use service_core::observability::install_metrics_recorder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub lock: Arc<dyn DistributedLock>,
    pub subscriptions: SubscriptionManager,
    pub settlement: PaymentSettlement,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        lock: Arc<dyn DistributedLock>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            subscriptions: SubscriptionManager::new(store.clone(), clock.clone()),
            settlement: PaymentSettlement::new(store.clone(), clock),
            store,
            lock,
        }
    }
}

/// HTTP routes with the shared middleware stack.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_handler))
        .route("/api/users", post(handlers::create_user))
        .route("/api/users/:user_id", get(handlers::get_user))
        .route("/api/products", get(handlers::list_products))
        .route("/api/products/:product_id", get(handlers::get_product))
        .route("/api/subscriptions", post(handlers::create_subscription))
        .route(
            "/api/subscriptions/:subscription_id",
            get(handlers::get_subscription),
        )
        .route("/api/bills/:bill_id", get(handlers::get_bill))
        .route("/api/bills/:bill_id/pay", post(handlers::pay_bill))
        .route("/api/bills/user/:user_id", get(handlers::list_user_bills))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Scheduler wired to the given collaborators and job settings.
pub fn build_scheduler(
    store: Arc<dyn Store>,
    lock: Arc<dyn DistributedLock>,
    clock: Arc<dyn Clock>,
    job: &BillingJobConfig,
    instance_id: impl Into<String>,
) -> Result<BillingScheduler, AppError> {
    Ok(BillingScheduler::new(
        BillingCycleEngine::new(store, clock.clone()),
        lock,
        clock,
        job.lock_settings(),
        job.schedule()?,
        instance_id,
    ))
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
    scheduler: Option<Arc<BillingScheduler>>,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: SubscriptionConfig) -> Result<Self, AppError> {
        init_metrics();
        install_metrics_recorder()?;

        let db = Database::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        db.run_migrations().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to run migrations");
            e
        })?;

        let lock = RedisLock::new(&config.redis.url).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to Redis");
            e
        })?;

        let store: Arc<dyn Store> = Arc::new(db);
        let lock: Arc<dyn DistributedLock> = Arc::new(lock);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let scheduler = if config.billing_job.enabled {
            let instance_id = config.common.instance_id_or(&config.service_name);
            Some(Arc::new(build_scheduler(
                store.clone(),
                lock.clone(),
                clock.clone(),
                &config.billing_job,
                instance_id,
            )?))
        } else {
            tracing::warn!("Billing job disabled on this instance");
            None
        };

        let state = AppState::new(store, lock, clock);

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port = port, "Subscription service listener bound");

        Ok(Self {
            port,
            listener,
            state,
            scheduler,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Serve HTTP and run the billing scheduler until `shutdown` fires.
    pub async fn run_until_stopped(self, shutdown: CancellationToken) -> std::io::Result<()> {
        let scheduler_task = self
            .scheduler
            .map(|scheduler| scheduler.spawn(shutdown.child_token()));

        tracing::info!(
            service = "subscription-service",
            version = env!("CARGO_PKG_VERSION"),
            port = self.port,
            billing_job = scheduler_task.is_some(),
            "Service ready to accept connections"
        );

        let server_shutdown = shutdown.clone();
        let served = axum::serve(self.listener, router(self.state))
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
            .await;

        // Make sure the scheduler stops even if the server exited on its own
        shutdown.cancel();
        if let Some(task) = scheduler_task {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Billing scheduler task failed");
            }
        }

        served.map_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}
