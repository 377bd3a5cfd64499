//! Readiness endpoint.
//!
//! Ready means the record schema is fully migrated and a read through the
//! live record store answers inside its deadline.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use pocketbook_core::records::{RecordKey, RecordStore, StoreError};
use pocketbook_db::{migrations, DbPool};
use serde::Serialize;
use tracing::{error, info, warn};

const READINESS_USER: &str = "pocketbook-health";
const READINESS_TEAM: &str = "readiness";

#[derive(Clone)]
pub struct ReadinessState {
    db_pool: DbPool,
    store: Arc<dyn RecordStore>,
}

impl ReadinessState {
    pub fn new(db_pool: DbPool, store: Arc<dyn RecordStore>) -> Self {
        Self { db_pool, store }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ComponentCheck {
    pub ready: bool,
    pub detail: String,
}

impl ComponentCheck {
    fn ready(detail: impl Into<String>) -> Self {
        Self { ready: true, detail: detail.into() }
    }

    fn degraded(detail: impl Into<String>) -> Self {
        Self { ready: false, detail: detail.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReadinessReport {
    pub status: &'static str,
    pub schema: ComponentCheck,
    pub records: ComponentCheck,
    pub checked_at: String,
}

pub fn router(state: ReadinessState) -> Router {
    Router::new().route("/health", get(readiness)).with_state(state)
}

pub async fn spawn(bind_address: &str, port: u16, state: ReadinessState) -> std::io::Result<()> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(
        event_name = "system.health.start",
        correlation_id = "bootstrap",
        bind_address = %address,
        "readiness endpoint listening"
    );

    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, router(state)).await {
            error!(
                event_name = "system.health.error",
                correlation_id = "bootstrap",
                error = %error,
                "readiness endpoint terminated unexpectedly"
            );
        }
    });

    Ok(())
}

pub async fn readiness(
    State(state): State<ReadinessState>,
) -> (StatusCode, Json<ReadinessReport>) {
    let schema = schema_check(&state.db_pool).await;
    let records = records_check(state.store.as_ref()).await;

    if !(schema.ready && records.ready) {
        warn!(
            event_name = "system.health.degraded",
            correlation_id = "health",
            schema = %schema.detail,
            records = %records.detail,
            "readiness check degraded"
        );
        let report = report("degraded", schema, records);
        return (StatusCode::SERVICE_UNAVAILABLE, Json(report));
    }

    (StatusCode::OK, Json(report("ready", schema, records)))
}

fn report(
    status: &'static str,
    schema: ComponentCheck,
    records: ComponentCheck,
) -> ReadinessReport {
    ReadinessReport { status, schema, records, checked_at: Utc::now().to_rfc3339() }
}

async fn schema_check(pool: &DbPool) -> ComponentCheck {
    match migrations::pending_versions(pool).await {
        Ok(pending) if pending.is_empty() => ComponentCheck::ready("record schema is current"),
        Ok(pending) => ComponentCheck::degraded(format!("pending migrations: {pending:?}")),
        Err(error) => ComponentCheck::degraded(format!("migration ledger unreadable: {error}")),
    }
}

async fn records_check(store: &dyn RecordStore) -> ComponentCheck {
    match store.get(&RecordKey::new(READINESS_USER, READINESS_TEAM)).await {
        Ok(_) | Err(StoreError::NotFound) => ComponentCheck::ready("record store answered"),
        Err(StoreError::Unavailable(reason)) => ComponentCheck::degraded(reason),
    }
}
