//! issue-watch binary entrypoint.
//! Loads settings and the source registry, starts the poll engine and
//! serves the status/control API until Ctrl-C.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use issue_watch::activity::{ActivityLog, Level};
use issue_watch::api::{self, AppState};
use issue_watch::config::{load_sources_default, Settings};
use issue_watch::metrics::Metrics;
use issue_watch::model::Source;
use issue_watch::poll::providers::JiraExecutor;
use issue_watch::secrets::EnvTokenStore;
use issue_watch::{CycleExecutor, NotifierMux, PollEngine, StateStore};

/// `LOG_FORMAT=json` switches to JSON lines; filter comes from `RUST_LOG`.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("issue_watch=info,warn"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

/// One-off credential check per enabled source; failures only warn.
async fn check_connections(jira: Arc<JiraExecutor>, sources: Vec<Source>, activity: Arc<ActivityLog>) {
    for source in sources {
        match jira.test_connection(&source).await {
            Ok(true) => tracing::info!(source = %source.name, "tracker connection ok"),
            Ok(false) => activity.record(
                Level::Warning,
                format!("Connection check for {} failed: credentials rejected", source.name),
                Some(source.id),
                None,
            ),
            Err(e) => activity.record(
                Level::Warning,
                format!("Connection check for {} failed: {e}", source.name),
                Some(source.id),
                None,
            ),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let settings = Settings::from_env();
    tracing::info!(?settings, "starting issue-watch");

    let metrics = if settings.metrics_enabled {
        Some(Metrics::init()?)
    } else {
        None
    };

    // Without a working store the engine cannot keep its once-per-change promise.
    let store = Arc::new(
        StateStore::open(&settings.db_path)
            .with_context(|| format!("opening state store at {}", settings.db_path.display()))?,
    );
    let sources = load_sources_default().context("loading source registry")?;
    if sources.is_empty() {
        tracing::warn!("no sources configured; set ISSUE_WATCH_SOURCES_PATH or add config/sources.toml");
    }

    let notifier = NotifierMux::from_env();
    tracing::info!(sinks = ?notifier.sink_names(), "notification sinks ready");

    let jira = Arc::new(JiraExecutor::new(Arc::new(EnvTokenStore)));
    let activity = Arc::new(ActivityLog::with_capacity(settings.activity_capacity));
    tokio::spawn(check_connections(
        Arc::clone(&jira),
        sources.iter().filter(|s| s.enabled).cloned().collect(),
        Arc::clone(&activity),
    ));

    let cycles = CycleExecutor::new(store, jira, Arc::new(notifier), activity);
    let engine = Arc::new(PollEngine::new(cycles, sources, settings.cadence_unit));
    engine.start();

    let mut app = api::router(AppState::new(Arc::clone(&engine)));
    if let Some(m) = &metrics {
        app = app.merge(m.router());
    }

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("binding {}", settings.bind_addr))?;
    tracing::info!(addr = %settings.bind_addr, "http listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("http server")?;

    engine.stop();
    tracing::info!("bye");
    Ok(())
}
