//! Demo topology entry point: both services in one process.

use std::sync::Arc;

use api::config::Config;
use api::{OrdersState, PaymentsState};
use orders::OrderService;
use payments::AccountService;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

async fn serve(
    listener: tokio::net::TcpListener,
    app: axum::Router,
    mut shutdown: watch::Receiver<bool>,
) {
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
        .expect("server error");
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let prometheus_builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let metrics_handle = prometheus_builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // In-memory stores and transport; the saga machinery runs as background
    // tasks in this process.
    let demo = api::DemoState::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = api::spawn_workers(&demo, &config, shutdown_rx.clone())
        .await
        .expect("transport subscribe failed");

    let orders_state = Arc::new(OrdersState {
        service: OrderService::new(demo.order_store.clone()),
    });
    let payments_state = Arc::new(PaymentsState {
        service: AccountService::new(demo.account_store.clone()),
    });

    let orders_app = api::create_orders_app(orders_state, metrics_handle.clone());
    let payments_app = api::create_payments_app(payments_state, metrics_handle);

    let orders_listener = tokio::net::TcpListener::bind(config.orders_addr())
        .await
        .expect("failed to bind orders address");
    let payments_listener = tokio::net::TcpListener::bind(config.payments_addr())
        .await
        .expect("failed to bind payments address");
    tracing::info!(
        orders = %config.orders_addr(),
        payments = %config.payments_addr(),
        "starting servers"
    );

    let orders_server = tokio::spawn(serve(orders_listener, orders_app, shutdown_rx.clone()));
    let payments_server = tokio::spawn(serve(payments_listener, payments_app, shutdown_rx));

    shutdown_signal().await;
    shutdown_tx.send(true).expect("shutdown channel closed");

    for handle in [orders_server, payments_server]
        .into_iter()
        .chain(workers)
    {
        let _ = handle.await;
    }

    tracing::info!("shut down gracefully");
}
