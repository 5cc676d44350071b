//! End-to-end saga tests: both services, dispatchers, and consumers wired
//! over the in-memory transport, driven through the HTTP routers.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use metrics_exporter_prometheus::PrometheusHandle;
use orders::OrderService;
use payments::AccountService;
use tokio::sync::watch;
use tower::ServiceExt;

use api::config::Config;
use api::{DemoState, OrdersState, PaymentsState};

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            metrics_exporter_prometheus::PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

struct Topology {
    orders_app: axum::Router,
    payments_app: axum::Router,
    demo: DemoState,
    shutdown: watch::Sender<bool>,
}

impl Topology {
    /// Brings up the full demo topology with a fast dispatcher poll.
    async fn start() -> Self {
        let demo = DemoState::new();
        let config = Config {
            poll_interval: Duration::from_millis(10),
            ..Config::default()
        };

        let (shutdown, shutdown_rx) = watch::channel(false);
        api::spawn_workers(&demo, &config, shutdown_rx)
            .await
            .expect("transport subscribe failed");

        let orders_state = Arc::new(OrdersState {
            service: OrderService::new(demo.order_store.clone()),
        });
        let payments_state = Arc::new(PaymentsState {
            service: AccountService::new(demo.account_store.clone()),
        });

        Self {
            orders_app: api::create_orders_app(orders_state, get_metrics_handle()),
            payments_app: api::create_payments_app(payments_state, get_metrics_handle()),
            demo,
            shutdown,
        }
    }

    async fn open_account(&self, user_id: uuid::Uuid, deposit_cents: i64) {
        let (status, _) = send_json(
            &self.payments_app,
            "/accounts",
            serde_json::json!({ "user_id": user_id }),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        if deposit_cents > 0 {
            let (status, _) = send_json(
                &self.payments_app,
                "/accounts/deposit",
                serde_json::json!({ "user_id": user_id, "amount_cents": deposit_cents }),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }
    }

    async fn place_order(&self, user_id: uuid::Uuid, amount_cents: i64) -> String {
        let (status, json) = send_json(
            &self.orders_app,
            "/orders",
            serde_json::json!({ "user_id": user_id, "amount_cents": amount_cents }),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        json["id"].as_str().unwrap().to_string()
    }

    /// Polls the order until it leaves Pending.
    async fn settled_order(&self, order_id: &str) -> serde_json::Value {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let (status, order) = send_get(&self.orders_app, &format!("/orders/{order_id}")).await;
            assert_eq!(status, StatusCode::OK);
            if order["status"] != "Pending" {
                return order;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("order {order_id} never settled");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn balance_cents(&self, user_id: uuid::Uuid) -> i64 {
        let (status, account) = send_get(&self.payments_app, &format!("/accounts/{user_id}")).await;
        assert_eq!(status, StatusCode::OK);
        account["balance_cents"].as_i64().unwrap()
    }
}

impl Drop for Topology {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

async fn send_json(
    app: &axum::Router,
    uri: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_string(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

async fn send_get(app: &axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

#[tokio::test]
async fn order_with_sufficient_funds_ends_paid() {
    let topology = Topology::start().await;
    let user_id = uuid::Uuid::new_v4();

    topology.open_account(user_id, 10_000).await;
    let order_id = topology.place_order(user_id, 4000).await;

    let order = topology.settled_order(&order_id).await;
    assert_eq!(order["status"], "Paid");
    assert!(order["failure_reason"].is_null());
    assert_eq!(topology.balance_cents(user_id).await, 6000);
}

#[tokio::test]
async fn order_with_insufficient_funds_ends_failed() {
    let topology = Topology::start().await;
    let user_id = uuid::Uuid::new_v4();

    topology.open_account(user_id, 3000).await;
    let order_id = topology.place_order(user_id, 4000).await;

    let order = topology.settled_order(&order_id).await;
    assert_eq!(order["status"], "Failed");
    assert_eq!(order["failure_reason"], "Insufficient funds");
    // Nothing was debited.
    assert_eq!(topology.balance_cents(user_id).await, 3000);
}

#[tokio::test]
async fn order_for_user_without_account_ends_failed() {
    let topology = Topology::start().await;
    let user_id = uuid::Uuid::new_v4();

    let order_id = topology.place_order(user_id, 4000).await;

    let order = topology.settled_order(&order_id).await;
    assert_eq!(order["status"], "Failed");
    assert_eq!(order["failure_reason"], "No account");
}

#[tokio::test]
async fn duplicate_deliveries_settle_and_debit_exactly_once() {
    let topology = Topology::start().await;
    topology.demo.transport.set_duplicate_deliveries(true);
    let user_id = uuid::Uuid::new_v4();

    topology.open_account(user_id, 10_000).await;
    let order_id = topology.place_order(user_id, 4000).await;

    let order = topology.settled_order(&order_id).await;
    assert_eq!(order["status"], "Paid");

    // Both topics were delivered twice; the inboxes absorbed the duplicates.
    assert_eq!(topology.balance_cents(user_id).await, 6000);
    assert_eq!(topology.demo.account_store.consumed_count(), 1);
    assert_eq!(topology.demo.order_store.consumed_count(), 1);
}

#[tokio::test]
async fn sequential_orders_drain_the_balance_in_order() {
    let topology = Topology::start().await;
    let user_id = uuid::Uuid::new_v4();

    topology.open_account(user_id, 10_000).await;

    let first = topology.place_order(user_id, 6000).await;
    let second = topology.place_order(user_id, 6000).await;

    let first = topology.settled_order(&first).await;
    let second = topology.settled_order(&second).await;

    // Only one of the two can fit the balance.
    assert_eq!(first["status"], "Paid");
    assert_eq!(second["status"], "Failed");
    assert_eq!(second["failure_reason"], "Insufficient funds");
    assert_eq!(topology.balance_cents(user_id).await, 4000);
}
