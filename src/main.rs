//! Translation Recommender Service - Main entry point.
//!
//! Recommends Wikipedia articles and sections that are missing in a target
//! language, from popularity, search, or curated page collections.

mod config;
mod error;
mod models;
mod recommenders;
mod routers;
mod services;

use axum::{
    body::Body,
    http::{Request, Response},
    middleware::{self, Next},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::get_settings;
use crate::recommenders::RecommenderContext;
use crate::routers::recommend::AppState;
use crate::routers::router;
use crate::services::cache::RecommendationCache;
use crate::services::collections::{follow_shared_snapshots, run_periodic_refresh, CollectionRefresher};
use crate::services::events::EventLogger;
use crate::services::fetcher::{HttpFetcher, JsonFetcher};
use crate::services::lead_section::LeadSectionSizer;
use crate::services::sections::SectionSuggester;
use crate::services::sitematrix::SiteDirectory;
use crate::services::wiki::WikiApi;

/// One access-log line per request, with the language pair when present
async fn access_log_middleware(req: Request<Body>, next: Next) -> Response<Body> {
    let start = std::time::Instant::now();

    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let languages = language_pair(req.uri().query().unwrap_or_default());
    let client_ip = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| "127.0.0.1".to_string());

    let response = next.run(req).await;

    tracing::info!(
        "{} {} {} [{}] {} in {}ms",
        client_ip,
        method,
        path,
        languages.as_deref().unwrap_or("-"),
        response.status().as_u16(),
        start.elapsed().as_millis()
    );

    response
}

/// `source>target` from a recommendation query string
fn language_pair(query: &str) -> Option<String> {
    let mut source = None;
    let mut target = None;
    for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
        match name.as_ref() {
            "source" => source = Some(value.into_owned()),
            "target" => target = Some(value.into_owned()),
            _ => {}
        }
    }
    Some(format!("{}>{}", source?, target?))
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Could not listen for Ctrl+C: {}", e);
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
                tracing::error!("Could not listen for SIGTERM: {}", e);
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

    tracing::info!("Stopping: draining requests, then closing the cache");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "translation_recommender=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::time())
        )
        .init();

    let settings = get_settings();

    tracing::info!(
        "Starting Translation Recommender Service v{}",
        settings.service_version
    );
    tracing::info!("Wikipedia API: {}", settings.wikipedia_api);
    tracing::info!("Cache database: {}", settings.cache_db_path);

    // Restore the snapshots of the previous run before serving
    let cache = Arc::new(RecommendationCache::connect(&settings.cache_db_path).await?);
    cache.load().await?;
    tracing::info!("Cache initialized successfully");

    let fetcher: Arc<dyn JsonFetcher> = Arc::new(HttpFetcher::new(settings)?);
    let wiki = Arc::new(WikiApi::new(fetcher.clone(), settings));
    let sites = Arc::new(SiteDirectory::new(wiki.clone(), cache.clone()));

    let recommenders = Arc::new(RecommenderContext {
        wiki: wiki.clone(),
        cache: cache.clone(),
        sections: Arc::new(SectionSuggester::new(
            wiki.clone(),
            cache.clone(),
            settings.size_thresholds,
            settings.api_concurrency_limit,
        )),
        lead_sections: Arc::new(LeadSectionSizer::new(wiki.clone(), settings.api_concurrency_limit)),
        thresholds: settings.size_thresholds,
    });

    if settings.event_logging_enabled {
        tracing::info!("Event logging enabled: {}", settings.event_logger_api);
    }
    let events = Arc::new(EventLogger::new(fetcher, settings));

    if settings.collection_refresh_enabled {
        let refresher = Arc::new(CollectionRefresher::new(
            wiki.clone(),
            cache.clone(),
            sites.clone(),
            settings,
        ));
        let holder = format!("{}-{:016x}", std::process::id(), rand::random::<u64>());
        let interval = Duration::from_secs(settings.collection_refresh_interval_seconds);
        tracing::info!(
            "Page collection refresh every {} seconds (runner id {})",
            interval.as_secs(),
            holder
        );
        tokio::spawn(run_periodic_refresh(refresher, cache.clone(), holder, interval));
    } else {
        tracing::warn!("Page collection refresh disabled in this process, following the shared cache");
        let sites = sites.clone();
        tokio::spawn(async move { sites.bootstrap().await });
        tokio::spawn(follow_shared_snapshots(
            cache.clone(),
            Duration::from_secs(settings.collection_refresh_interval_seconds),
        ));
    }

    let cache_for_shutdown = cache.clone();

    let state = AppState {
        cache,
        recommenders,
        sites,
        events,
    };

    let app = router(state)
        .layer(middleware::from_fn(access_log_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let addr = format!("{}:{}", settings.host, settings.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Checkpoint and close the SQLite store
    if let Err(e) = cache_for_shutdown.close().await {
        tracing::error!("Error during cache shutdown: {}", e);
    }

    tracing::info!("Server shutdown complete");

    Ok(())
}
