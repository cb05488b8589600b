use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use tutorpay::config::AppConfig;
use tutorpay::db::{Database, schema};
use tutorpay::directory::StaticDirectory;
use tutorpay::gateway::{self, state::AppState};
use tutorpay::ledger::{LedgerStore, MemoryStore, PgStore};
use tutorpay::notify::TracingNotifier;
use tutorpay::payment::ReqwestTransport;

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

/// Get port override from command line (--port argument)
fn get_port_override() -> Option<u16> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if args[i] == "--port" && i + 1 < args.len() {
            return args[i + 1].parse().ok();
        }
    }
    None
}

async fn open_store(config: &AppConfig) -> anyhow::Result<Arc<dyn LedgerStore>> {
    match &config.postgres_url {
        Some(url) => {
            let db = Database::connect(url)
                .await
                .context("Failed to connect to PostgreSQL")?;
            schema::init_schema(db.pool()).await?;
            Ok(Arc::new(PgStore::new(db.pool().clone())))
        }
        None => {
            tracing::warn!("No postgres_url configured; using the in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let app_config = AppConfig::load(&env)?;
    let _log_guard = tutorpay::logging::init_logging(&app_config);

    tracing::info!(version = env!("GIT_HASH"), "Starting TutorPay in {} mode", env);

    let store = open_store(&app_config).await?;
    let directory = Arc::new(StaticDirectory::from_config(&app_config.directory));
    let client_timeout = app_config.momo.timeout_ms.max(app_config.payos.timeout_ms);
    let transport = Arc::new(
        ReqwestTransport::new(Duration::from_millis(client_timeout))
            .context("Failed to build provider HTTP client")?,
    );

    let state = Arc::new(AppState::new(
        &app_config,
        store,
        directory,
        Arc::new(TracingNotifier),
        transport,
    ));

    let port = get_port_override().unwrap_or(app_config.gateway.port);
    gateway::run_server(&app_config.gateway.host, port, state).await
}
