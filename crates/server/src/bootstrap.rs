use std::sync::Arc;
use std::time::Duration;

use pocketbook_core::config::AppConfig;
use pocketbook_core::records::{RecordStore, ResilientRecordStore};
use pocketbook_db::{connect_with_config, migrations, DbPool, SqlRecordStore};
use pocketbook_slack::callback::{CallbackError, HttpCallbackResponder};
use pocketbook_slack::events::default_dispatcher;
use pocketbook_slack::socket::SocketModeRunner;
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub store: Arc<dyn RecordStore>,
    pub slack_runner: SocketModeRunner,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("callback client could not be built: {0}")]
    CallbackClient(#[source] CallbackError),
}

pub async fn bootstrap(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        max_connections = config.database.max_connections,
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let store: Arc<dyn RecordStore> = Arc::new(ResilientRecordStore::new(
        SqlRecordStore::new(db_pool.clone()),
        config.store.policy(),
    ));
    let responder = HttpCallbackResponder::new(Duration::from_secs(config.callback.timeout_secs))
        .map_err(BootstrapError::CallbackClient)?;
    let dispatcher =
        default_dispatcher(Arc::clone(&store), Arc::new(responder), &config.slack.command);

    info!(
        event_name = "system.bootstrap.dispatcher_ready",
        correlation_id = "bootstrap",
        command = %config.slack.command,
        handlers = dispatcher.handler_count(),
        "slack dispatcher wired"
    );

    Ok(Application {
        config,
        db_pool,
        store,
        slack_runner: SocketModeRunner::with_noop_transport(dispatcher),
    })
}
