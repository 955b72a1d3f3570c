use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use anyhow::{Context, Result};
use shared::protocol::BROWSER_TYPE_ENV;
use bonjour_browserd::config::{Config, Descriptor};
use bonjour_browserd::logger::{DiagnosticSink, FileSink, LogLevel, TracingSink};
use bonjour_browserd::mdns::browser::{create_daemon, DiscoverySource};
use bonjour_browserd::registry::store::ServiceRegistry;
use bonjour_browserd::registry_manager::{self, RegistryHandle, ServiceSnapshot};
use bonjour_browserd::{api, presenter};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("bonjour_browserd=info"))
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/bonjour-browser/browserd.toml".to_string());

    let config = Config::load_or_default(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    let log: Arc<dyn DiagnosticSink> = if config.log.enabled {
        let sink = FileSink::open(config.log.resolved_path())?;
        sink.log(LogLevel::Info, "=== Bonjour Service Browser Starting ===");
        sink.log(
            LogLevel::Info,
            &format!("Log file location: {}", sink.path().display()),
        );
        Arc::new(sink)
    } else {
        let sink = TracingSink;
        sink.log(LogLevel::Info, "=== Bonjour Service Browser Starting ===");
        Arc::new(sink)
    };

    // Registry thread, publishing snapshots to the presenter and API
    let (snapshot_tx, snapshot_rx) = watch::channel(ServiceSnapshot::empty());
    let registry = RegistryHandle::spawn(ServiceRegistry::new(log.clone()), snapshot_tx);

    // Discovery source, configured once at construction
    let descriptor = Descriptor::resolve(
        config.browser.descriptor,
        std::env::var(BROWSER_TYPE_ENV).ok().as_deref(),
    );
    let daemon = create_daemon(config.browser.interface.as_deref())
        .context("Failed to set up mDNS")?;
    let source = DiscoverySource::new(
        daemon.clone(),
        config.browser.clone(),
        descriptor,
        log.clone(),
    );
    let source_rx = source.state();

    let cancel = CancellationToken::new();

    let (update_tx, update_rx) = mpsc::channel(256);
    let source_cancel = cancel.clone();
    let source_handle = tokio::spawn(async move {
        if let Err(e) = source.run(update_tx, source_cancel).await {
            tracing::error!("Discovery source error: {}", e);
        }
    });
    log.log(LogLevel::Info, "Browser started on background task");

    let bridge_cancel = cancel.clone();
    let bridge_registry = registry.clone();
    let bridge_state = source_rx.clone();
    let bridge_log = log.clone();
    let bridge_handle = tokio::spawn(async move {
        if let Err(e) = registry_manager::run(
            bridge_registry,
            update_rx,
            bridge_state,
            bridge_log,
            bridge_cancel,
        )
        .await
        {
            tracing::error!("Registry bridge error: {}", e);
        }
    });

    let presenter_handle = if config.presenter.enabled {
        let presenter_rx = snapshot_rx.clone();
        let presenter_log = log.clone();
        let presenter_cancel = cancel.clone();
        Some(tokio::spawn(async move {
            presenter::run(presenter_rx, presenter_log, presenter_cancel).await;
        }))
    } else {
        None
    };

    let server_handle = if config.api.enabled {
        let app_state = api::routes::AppState {
            registry: registry.clone(),
            snapshot_rx: snapshot_rx.clone(),
            source_rx: source_rx.clone(),
            config: Arc::new(config.browser.clone()),
            descriptor,
        };
        let app = api::routes::router(app_state);

        let listener = tokio::net::TcpListener::bind(&config.api.listen)
            .await
            .with_context(|| format!("Failed to bind to {}", config.api.listen))?;
        tracing::info!("API listening on {}", config.api.listen);

        let server_cancel = cancel.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async move { server_cancel.cancelled().await })
                .await
            {
                tracing::error!("Server error: {}", e);
            }
        }))
    } else {
        None
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    log.log(LogLevel::Info, "ServiceBrowser shutting down, cancelling browser");
    cancel.cancel();

    // Source first, so no batch is in flight once the bridge stops
    let _ = source_handle.await;
    let _ = bridge_handle.await;
    if let Some(handle) = presenter_handle {
        let _ = handle.await;
    }
    if let Some(handle) = server_handle {
        let _ = handle.await;
    }

    if let Err(e) = registry.shutdown().await {
        tracing::error!("Failed to shutdown registry: {}", e);
    }

    if let Err(e) = daemon.shutdown() {
        tracing::error!("Failed to shutdown mDNS daemon: {}", e);
    }

    log.log(LogLevel::Info, "Shutdown complete");
    log.flush();
    Ok(())
}
