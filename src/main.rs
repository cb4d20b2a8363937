use bridge_reconciler::config::Config;
use bridge_reconciler::watchers::WatcherManager;
use bridge_reconciler::{api, db};
use eyre::WrapErr;
use tokio::sync::watch;

fn main() -> eyre::Result<()> {
    // Install color-eyre for better error reporting
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> eyre::Result<()> {
    init_logging();

    tracing::info!("Starting bridge reconciler");

    let config = Config::load()?;
    tracing::info!(
        l1_rpc = %config.l1.rpc_url,
        l2_rpc = %config.l2.rpc_url,
        l1_bridge = %config.l1.bridge_address,
        l2_bridge = %config.l2.bridge_address,
        chunk_size = config.scan.chunk_size,
        "Configuration loaded"
    );

    let db = db::create_pool(&config.database.url).await?;
    tracing::info!("Database connected");

    db::run_migrations(&db)
        .await
        .wrap_err("Failed to run database migrations")?;
    tracing::info!("Database migrations complete");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let mut api_task = if config.api.enabled {
        let api_addr = config.api.socket_addr()?;
        Some(tokio::spawn(api::start_api_server(api_addr, db.clone())))
    } else {
        None
    };

    let watcher_manager = WatcherManager::new(&config, db.clone())?;
    let backfill = watcher_manager.run(shutdown_rx.clone());
    tokio::pin!(backfill);

    // A dead API server ends the process like a failed scan does
    let summaries = tokio::select! {
        result = &mut backfill => match result {
            Ok(summaries) => summaries,
            Err(e) => {
                tracing::error!(error = %e, "Backfill failed");
                return Err(e);
            }
        },
        e = api::server_exit(&mut api_task) => {
            tracing::error!(error = %e, "API server failed, stopping backfill");
            return Err(e);
        }
    };

    let cancelled = summaries.iter().any(|s| s.cancelled);
    for summary in &summaries {
        tracing::info!(
            event = %summary.kind,
            chunks = summary.chunks_processed,
            events = summary.events_inserted,
            matches = summary.matches,
            lowest_block = summary.final_cursor,
            "Backfill summary"
        );
    }

    // Keep serving the collected data until asked to stop
    if api_task.is_some() && !cancelled {
        tracing::info!("Backfill complete, API still serving until shutdown");
        let mut shutdown = shutdown_rx;
        tokio::select! {
            _ = shutdown.wait_for(|stop| *stop) => {}
            e = api::server_exit(&mut api_task) => {
                tracing::error!(error = %e, "API server failed");
                return Err(e);
            }
        }
    }

    tracing::info!("Bridge reconciler stopped");
    Ok(())
}

/// Initialize tracing/logging with structured output
fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,bridge_reconciler=debug"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(true))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .with(filter)
            .init();
    }
}

/// Wait for shutdown signals (SIGINT/SIGTERM)
async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
