pub mod recommend;

use axum::{routing::get, Router};

use recommend::{
    cache_stats, collection_membership, health_check, page_collection_groups, page_collections,
    recommend_articles, recommend_sections, root, AppState,
};

/// All routes, without the logging and CORS layers added at startup
pub fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/translation", get(recommend_articles))
        .route("/translation/sections", get(recommend_sections))
        .route("/translation/page-collections", get(page_collections))
        .route("/translation/page-collection-groups", get(page_collection_groups))
        .route("/translation/page-collections/membership", get(collection_membership))
        .route("/cache/stats", get(cache_stats));

    Router::new()
        .route("/", get(root))
        .route("/api/health", get(health_check))
        .nest("/api/v1", api_routes)
        .with_state(state)
}
