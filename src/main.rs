use std::{process, sync::Arc};

use tokio::{sync::watch, try_join};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;
use watchlazy::{
    application::{
        catalog::CatalogService,
        error::AppError,
        ingest::Ingestor,
        refresh::RefreshCoordinator,
        repos::{CuratedListsRepo, MoviesRepo, MoviesWriteRepo},
        scheduler::spawn_incremental_schedule,
    },
    cache::{CacheConfig, CacheTier},
    config,
    infra::{
        db::PostgresRepositories,
        error::InfraError,
        feeds::HttpFeedSource,
        http::{self, AppState},
        snapshot::SnapshotStore,
        telemetry,
    },
};

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli().map_err(|err| {
        InfraError::configuration(format!("failed to load configuration: {err}"))
    })?;

    telemetry::init(&settings.logging)?;

    let app = build_application_context(&settings).await?;

    match cli_args.command {
        None | Some(config::Command::Serve(_)) => run_serve(&settings, app).await,
        Some(config::Command::Refresh(_)) => run_refresh(app).await,
        Some(config::Command::Incremental(_)) => run_incremental(app).await,
    }
}

struct ApplicationContext {
    catalog: Arc<CatalogService>,
    refresh: Arc<RefreshCoordinator>,
}

struct Repositories {
    movies: Arc<dyn MoviesRepo>,
    writer: Arc<dyn MoviesWriteRepo>,
    lists: Arc<dyn CuratedListsRepo>,
}

async fn build_application_context(
    settings: &config::Settings,
) -> Result<ApplicationContext, AppError> {
    let cache = CacheTier::connect(CacheConfig::from(&settings.cache)).await;
    let repositories = init_repositories(settings).await;

    let sources = HttpFeedSource::from_settings(&settings.sources)?;
    if sources.is_empty() {
        warn!(target = "watchlazy::startup", "No feeds configured, refreshes will fetch nothing");
    }
    let snapshot = Arc::new(SnapshotStore::open(
        settings.snapshot.path.clone(),
        settings.snapshot.ttl,
    ));
    let ingestor = Arc::new(Ingestor::new(
        sources,
        snapshot,
        settings.sources.fetch_limit.get() as usize,
    ));
    info!(
        target = "watchlazy::startup",
        cache_backend = cache.backend_name(),
        snapshot_path = %ingestor.snapshot().path().display(),
        sources = ?ingestor.source_names(),
        "Catalog assembled"
    );

    let (movies, writer, lists) = match repositories {
        Some(repos) => (Some(repos.movies), Some(repos.writer), Some(repos.lists)),
        None => (None, None, None),
    };

    let catalog = Arc::new(CatalogService::new(
        cache.clone(),
        movies,
        lists.clone(),
        Arc::clone(&ingestor),
    ));
    let refresh = Arc::new(RefreshCoordinator::new(cache, writer, lists, ingestor));

    Ok(ApplicationContext { catalog, refresh })
}

/// An absent or unreachable database leaves the catalog on cache and snapshot.
async fn init_repositories(settings: &config::Settings) -> Option<Repositories> {
    let repositories =
        Arc::new(PostgresRepositories::connect_or_degrade(&settings.database).await?);
    Some(Repositories {
        movies: repositories.clone(),
        writer: repositories.clone(),
        lists: repositories,
    })
}

async fn run_serve(settings: &config::Settings, app: ApplicationContext) -> Result<(), AppError> {
    let schedule_handle = settings.scheduler.enabled.then(|| {
        info!(
            target = "watchlazy::scheduler",
            cadence_secs = settings.scheduler.incremental_cadence.as_secs(),
            "Starting incremental schedule"
        );
        spawn_incremental_schedule(app.refresh.clone(), settings.scheduler.incremental_cadence)
    });

    let state = AppState {
        catalog: app.catalog,
        refresh: app.refresh,
    };
    let result = serve_http(settings, state).await;

    if let Some(handle) = schedule_handle {
        handle.abort();
        let _ = handle.await;
    }

    result
}

async fn run_refresh(app: ApplicationContext) -> Result<(), AppError> {
    let report = app.refresh.bulk_refresh().await?.into_inner();
    info!(
        target = "watchlazy::refresh",
        fetched = report.fetched,
        written = report.written,
        failed_sources = ?report.failed_sources,
        snapshot_persisted = report.snapshot_persisted,
        invalidated = report.invalidated,
        "Refresh completed"
    );
    Ok(())
}

async fn run_incremental(app: ApplicationContext) -> Result<(), AppError> {
    let report = app.refresh.incremental_update().await?.into_inner();
    info!(
        target = "watchlazy::refresh",
        fetched = report.fetched,
        inserted = report.inserted,
        skipped = report.skipped,
        failed_sources = ?report.failed_sources,
        invalidated = report.invalidated,
        "Incremental update completed"
    );
    Ok(())
}

async fn serve_http(settings: &config::Settings, state: AppState) -> Result<(), AppError> {
    let public_router = http::build_public_router(state.clone());
    let admin_router = http::build_admin_router(state);

    let public_listener = tokio::net::TcpListener::bind(settings.server.public_addr)
        .await
        .map_err(InfraError::from)?;
    let admin_listener = tokio::net::TcpListener::bind(settings.server.admin_addr)
        .await
        .map_err(InfraError::from)?;

    info!(
        target = "watchlazy::http",
        public = %settings.server.public_addr,
        admin = %settings.server.admin_addr,
        "Listening"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let public_server = axum::serve(public_listener, public_router.into_make_service())
        .with_graceful_shutdown(wait_for(shutdown_rx.clone()));
    let admin_server = axum::serve(admin_listener, admin_router.into_make_service())
        .with_graceful_shutdown(wait_for(shutdown_rx.clone()));

    let grace = settings.server.graceful_shutdown;
    let deadline = async move {
        wait_for(shutdown_rx).await;
        tokio::time::sleep(grace).await;
    };

    tokio::select! {
        result = async { try_join!(public_server, admin_server) } => {
            result.map_err(InfraError::from)?;
        }
        _ = deadline => {
            warn!(
                target = "watchlazy::http",
                grace_secs = grace.as_secs(),
                "In-flight requests did not drain in time"
            );
        }
    }

    info!(target = "watchlazy::http", "Servers stopped");
    Ok(())
}

async fn wait_for(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stopping| *stopping).await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(target = "watchlazy::http", error = %err, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(target = "watchlazy::http", error = %err, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!(target = "watchlazy::http", "Shutdown signal received");
}
