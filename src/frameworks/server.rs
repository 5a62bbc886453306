// Framework bootstrap for the simulation engine runtime.

use crate::domain::games::builtin_definitions;
use crate::domain::InstanceStore;
use crate::frameworks::{config, db};
use crate::interface_adapters::http::app;
use crate::interface_adapters::inbound::spawn_inbound_pump;
use crate::interface_adapters::state::AppState;
use crate::interface_adapters::store::{InMemoryInstanceStore, PostgresInstanceStore};
use crate::interface_adapters::topic_hub::TopicHub;
use crate::use_cases::{GameModuleRegistry, Supervisor};

use std::io::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;

fn init_runtime() {
    let _ = dotenvy::dotenv();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = matches!(std::env::var("LOG_FORMAT").as_deref(), Ok("json"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init();
    }

    std::panic::set_hook(Box::new(|info| {
        let backtrace = std::backtrace::Backtrace::capture();
        tracing::error!(%info, ?backtrace, "panic");
    }));
}

pub async fn run(listener: tokio::net::TcpListener) -> Result<()> {
    let address = listener.local_addr()?;
    let state = build_state().await?;
    let app = app(state);

    tracing::info!(%address, "listening");

    // Serve app and report errors rather than panicking
    axum::serve(listener, app).await.inspect_err(|e| {
        tracing::error!(error = %e, "server error");
    })
}

pub async fn run_with_config() -> Result<()> {
    init_runtime();

    let address = SocketAddr::from(([127, 0, 0, 1], config::http_port()));

    let listener = tokio::net::TcpListener::bind(address)
        .await
        .inspect_err(|e| {
            tracing::error!(%address, error = %e, "failed to bind");
        })?;

    run(listener).await
}

async fn build_store() -> Result<Arc<dyn InstanceStore>> {
    let Some(database_url) = config::database_url() else {
        tracing::warn!("DATABASE_URL not set; using in-memory instance store");
        return Ok(Arc::new(InMemoryInstanceStore::with_definitions(
            builtin_definitions(),
        )));
    };

    let pool = db::connect_pool(&database_url)
        .await
        .map_err(|e| std::io::Error::other(format!("failed to connect to database: {e}")))?;
    db::run_migrations(&pool)
        .await
        .map_err(|e| std::io::Error::other(format!("failed to run migrations: {e}")))?;
    tracing::debug!("postgres instance store ready");
    Ok(Arc::new(PostgresInstanceStore::new(pool)))
}

async fn build_state() -> Result<AppState> {
    let store = build_store().await?;
    let topics = Arc::new(TopicHub::new(config::TOPIC_CHANNEL_CAPACITY));

    // The supervisor owns the live-instance table; router and gateway hang off it.
    let supervisor = Supervisor::new(
        config::supervisor_settings(),
        store,
        GameModuleRegistry::with_builtin(),
        topics.clone(),
    );

    let (inbound_tx, inbound_rx) = mpsc::channel(config::INBOUND_CHANNEL_CAPACITY);
    spawn_inbound_pump(inbound_rx, supervisor.router());

    supervisor.start();

    Ok(AppState {
        supervisor,
        topics,
        inbound_tx,
    })
}
