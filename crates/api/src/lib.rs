//! HTTP boundary for the order/payment saga.
//!
//! Two routers, one per service, with structured logging (tracing) and
//! Prometheus metrics. The binary runs the single-process demo topology:
//! both services over in-memory stores, wired through an in-memory
//! transport by the outbox dispatchers and saga consumers.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use contracts::{PAYMENT_PROCESSED_TOPIC, PAYMENT_REQUESTED_TOPIC};
use metrics_exporter_prometheus::PrometheusHandle;
use orders::{MemoryOrderStore, OrderStore, PaymentProcessedConsumer};
use outbox::Dispatcher;
use payments::{AccountStore, MemoryAccountStore, PaymentRequestedConsumer};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use transport::{InMemoryTransport, Transport, TransportError};

use config::Config;
pub use routes::accounts::PaymentsState;
pub use routes::orders::OrdersState;

fn metrics_router(handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(handle)
}

fn with_layers(router: Router) -> Router {
    router
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the orders service router.
pub fn create_orders_app<S: OrderStore + 'static>(
    state: Arc<OrdersState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let router = Router::new()
        .route("/health", get(routes::health::check))
        .route("/orders", post(routes::orders::create::<S>))
        .route("/orders", get(routes::orders::list::<S>))
        .route("/orders/{id}", get(routes::orders::get::<S>))
        .with_state(state)
        .merge(metrics_router(metrics_handle));

    with_layers(router)
}

/// Creates the payments service router.
pub fn create_payments_app<S: AccountStore + 'static>(
    state: Arc<PaymentsState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let router = Router::new()
        .route("/health", get(routes::health::check))
        .route("/accounts", post(routes::accounts::create::<S>))
        .route("/accounts/deposit", post(routes::accounts::deposit::<S>))
        .route("/accounts/{user_id}", get(routes::accounts::get::<S>))
        .with_state(state)
        .merge(metrics_router(metrics_handle));

    with_layers(router)
}

/// Stores and transport of the single-process demo topology.
#[derive(Clone, Default)]
pub struct DemoState {
    pub order_store: MemoryOrderStore,
    pub account_store: MemoryAccountStore,
    pub transport: InMemoryTransport,
}

impl DemoState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Spawns the background machinery of the saga: one outbox dispatcher per
/// service and one consumer per topic. Subscriptions are opened before any
/// dispatcher starts so no event can slip past a consumer.
pub async fn spawn_workers(
    demo: &DemoState,
    config: &Config,
    shutdown: watch::Receiver<bool>,
) -> Result<Vec<JoinHandle<()>>, TransportError> {
    let payment_requests = demo.transport.subscribe(PAYMENT_REQUESTED_TOPIC).await?;
    let payment_results = demo.transport.subscribe(PAYMENT_PROCESSED_TOPIC).await?;

    let mut handles = Vec::new();

    let dispatcher = Dispatcher::new(
        demo.order_store.clone(),
        demo.transport.clone(),
        config.dispatcher_config(PAYMENT_REQUESTED_TOPIC),
    );
    let rx = shutdown.clone();
    handles.push(tokio::spawn(async move { dispatcher.run(rx).await }));

    let dispatcher = Dispatcher::new(
        demo.account_store.clone(),
        demo.transport.clone(),
        config.dispatcher_config(PAYMENT_PROCESSED_TOPIC),
    );
    let rx = shutdown.clone();
    handles.push(tokio::spawn(async move { dispatcher.run(rx).await }));

    let consumer = PaymentRequestedConsumer::new(demo.account_store.clone());
    let rx = shutdown.clone();
    handles.push(tokio::spawn(async move {
        consumer.run(payment_requests, rx).await;
    }));

    let consumer = PaymentProcessedConsumer::new(demo.order_store.clone());
    let rx = shutdown.clone();
    handles.push(tokio::spawn(async move {
        consumer.run(payment_results, rx).await;
    }));

    if let Some(retention) = config.retention {
        let order_store = demo.order_store.clone();
        let account_store = demo.account_store.clone();
        handles.push(tokio::spawn(async move {
            inbox_sweeper(order_store, account_store, retention, shutdown).await;
        }));
    }

    Ok(handles)
}

/// Periodically prunes consumed-message records past the retention horizon.
/// Safe because the transports' redelivery window is far shorter.
async fn inbox_sweeper(
    order_store: MemoryOrderStore,
    account_store: MemoryAccountStore,
    retention: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let horizon = chrono::Utc::now()
                    - chrono::Duration::from_std(retention).unwrap_or_default();
                if let Err(e) = order_store.prune_consumed(horizon).await {
                    tracing::warn!(error = %e, "orders inbox sweep failed");
                }
                if let Err(e) = account_store.prune_consumed(horizon).await {
                    tracing::warn!(error = %e, "payments inbox sweep failed");
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}
