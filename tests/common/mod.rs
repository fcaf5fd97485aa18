//! Shared utilities for integration tests.
//!
//! Provides an in-process accrual service double built on axum and an
//! in-memory SQLite order store.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tokio::sync::RwLock;

use loyalty_accrual::config::AccrualConfig;
use loyalty_accrual::storage::SqliteOrderStore;
use loyalty_accrual::{HttpAccrualClient, OrderNumber};

/// One canned reply of the mock accrual service.
#[derive(Debug, Clone)]
pub enum Canned {
    /// 200 with this JSON body.
    Json(serde_json::Value),
    /// 200 with this raw body.
    Raw(&'static str),
    /// 204, order unknown.
    NoContent,
    /// 429, optionally with `Retry-After` seconds.
    TooManyRequests(Option<u64>),
    /// Any other status with an empty body.
    Status(u16),
    /// Answer 204 after sleeping.
    Slow(Duration),
}

#[derive(Default)]
struct AccrualState {
    scripts: HashMap<String, VecDeque<Canned>>,
    fallback: Option<Canned>,
    hits: HashMap<String, usize>,
}

/// Accrual service double listening on a random local port.
pub struct MockAccrualService {
    state: Arc<RwLock<AccrualState>>,
    pub address: String,
}

impl MockAccrualService {
    pub async fn start() -> Self {
        let state = Arc::new(RwLock::new(AccrualState::default()));

        let app = Router::new()
            .route("/api/orders/:number", get(order_verdict))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind mock accrual service");
        let address = listener.local_addr().expect("no local addr").to_string();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .await
                .expect("mock accrual service failed");
        });

        Self { state, address }
    }

    /// Queue a reply for one order. Queued replies are used in order.
    pub async fn push(&self, number: OrderNumber, reply: Canned) {
        self.state
            .write()
            .await
            .scripts
            .entry(number.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Reply for any order whose queue is empty. Defaults to 204.
    pub async fn set_default(&self, reply: Canned) {
        self.state.write().await.fallback = Some(reply);
    }

    pub async fn hits(&self, number: OrderNumber) -> usize {
        self.state
            .read()
            .await
            .hits
            .get(&number.to_string())
            .copied()
            .unwrap_or(0)
    }

    pub fn config(&self) -> AccrualConfig {
        AccrualConfig {
            address: self.address.clone(),
            timeout_ms: 500,
        }
    }

    pub fn client(&self) -> HttpAccrualClient {
        HttpAccrualClient::new(&self.config()).expect("failed to build accrual client")
    }
}

async fn order_verdict(
    State(state): State<Arc<RwLock<AccrualState>>>,
    Path(number): Path<String>,
) -> Response {
    let reply = {
        let mut state = state.write().await;
        *state.hits.entry(number.clone()).or_default() += 1;
        let scripted = state
            .scripts
            .get_mut(&number)
            .and_then(|queue| queue.pop_front());
        scripted
            .or_else(|| state.fallback.clone())
            .unwrap_or(Canned::NoContent)
    };

    match reply {
        Canned::Json(body) => (StatusCode::OK, Json(body)).into_response(),
        Canned::Raw(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response(),
        Canned::NoContent => StatusCode::NO_CONTENT.into_response(),
        Canned::TooManyRequests(Some(seconds)) => (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, seconds.to_string())],
            "No more than 60 requests per minute allowed",
        )
            .into_response(),
        Canned::TooManyRequests(None) => StatusCode::TOO_MANY_REQUESTS.into_response(),
        Canned::Status(code) => StatusCode::from_u16(code)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            .into_response(),
        Canned::Slow(delay) => {
            tokio::time::sleep(delay).await;
            StatusCode::NO_CONTENT.into_response()
        }
    }
}

/// Verdict body as the accrual service sends it.
pub fn verdict_body(number: OrderNumber, status: &str, accrual: Option<f64>) -> Canned {
    let mut body = serde_json::json!({ "order": number.to_string(), "status": status });
    if let Some(accrual) = accrual {
        body["accrual"] = serde_json::json!(accrual);
    }
    Canned::Json(body)
}

/// Fresh in-memory SQLite order store.
pub async fn sqlite_store() -> Arc<SqliteOrderStore> {
    let opts = SqliteConnectOptions::new()
        .filename(":memory:")
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(opts)
        .await
        .expect("failed to create in-memory pool");

    let store = SqliteOrderStore::new(pool);
    store.init().await.expect("failed to init schema");
    Arc::new(store)
}

pub fn number(n: i64) -> OrderNumber {
    OrderNumber::new(n).expect("test order number must be Luhn-valid")
}
