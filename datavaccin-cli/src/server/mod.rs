pub mod auth;
pub mod config;
pub mod error;
pub mod metrics;
pub mod routes;
pub mod scheduler;
pub mod state;

use std::process;
use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use datavaccin_lib::{DataSource, OpenDataSource, RefreshJob, SharedStore};
use tower_http::compression::CompressionLayer;
use tracing::{error, info, warn};

use self::config::DvConfig;
use self::metrics::{handle_health_check, handle_metrics, handle_readyz, metrics, track_metrics};
use self::routes::*;
use self::scheduler::run_scheduler;
use self::state::AppState;

/// Command-line values that take precedence over the config file.
#[derive(Debug, Default)]
pub struct ServeOverrides {
    pub port: Option<u16>,
    pub hostname: Option<String>,
    pub data_file: Option<String>,
    pub no_refresh: bool,
}

impl ServeOverrides {
    pub fn apply(self, config: &mut DvConfig) {
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(hostname) = self.hostname {
            config.server.hostname = hostname;
        }
        if let Some(data_file) = self.data_file {
            config.server.data_file = data_file;
        }
        if self.no_refresh {
            config.refresh.enabled = false;
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handle_health_check))
        .route("/readyz", get(handle_readyz))
        .route("/metrics", get(handle_metrics))
        .route("/records", get(list_records).post(create_record))
        .route(
            "/records/{id}",
            get(get_record).put(update_record).delete(delete_record),
        )
        .route(
            "/records/filter/{municipality}",
            get(list_by_municipality)
                .post(create_in_municipality)
                .put(update_in_filter),
        )
        .route("/records/filter/{municipality}/weeks", get(list_weeks))
        .route(
            "/records/filter/{municipality}/week/{week}",
            get(list_by_week).post(create_in_week).put(update_in_filter),
        )
        .route("/records/filter/{municipality}/week/{week}/ages", get(list_ages))
        .route(
            "/records/filter/{municipality}/week/{week}/age/{age}",
            get(list_by_age).post(create_in_age).put(update_in_filter),
        )
        .route("/municipalities", get(list_municipalities))
        .route("/refresh", post(trigger_refresh))
        .layer(middleware::from_fn(track_metrics))
        .layer(CompressionLayer::new())
        .with_state(state)
}

pub async fn run_serve(config_path: &str, overrides: ServeOverrides) {
    let mut config = DvConfig::load(config_path);
    config.apply_env_overrides();
    overrides.apply(&mut config);

    let store = match SharedStore::open(&config.server.data_file) {
        Ok(store) => store,
        Err(e) => {
            error!(path = %config.server.data_file, error = %e, "failed to load records");
            process::exit(1);
        }
    };
    metrics().records_total.set(store.len().await as i64);

    if config.auth.write_tokens.is_empty() {
        warn!("no write tokens configured, write routes are open");
    }

    let source: Arc<dyn DataSource> = match OpenDataSource::new(
        &config.remote.base_url,
        &config.remote.dataset,
        config.remote.timeout(),
    ) {
        Ok(source) => Arc::new(source),
        Err(e) => {
            error!(error = %e, "failed to build remote client");
            process::exit(1);
        }
    };

    if config.refresh.enabled {
        let job = RefreshJob::starting_at(config.refresh.start_week, config.refresh.duplicates);
        tokio::spawn(run_scheduler(
            job,
            source.clone(),
            store.clone(),
            config.refresh.interval(),
        ));
    } else {
        info!("refresh scheduler disabled");
    }

    let addr = format!("{}:{}", config.server.hostname, config.server.port);
    let data_file = config.server.data_file.clone();
    let app = build_router(AppState::new(store, config, source));

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %addr, error = %e, "failed to bind");
            process::exit(1);
        }
    };
    info!(addr = %addr, data_file = %data_file, "serving records");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "server error");
        process::exit(1);
    }

    info!("server stopped");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received, finishing in-flight requests");
}
