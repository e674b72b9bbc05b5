pub mod api;
pub mod config;
pub mod entities;
pub mod infrastructure;
pub mod services;
pub mod utils;

use crate::config::StorageConfig;
use crate::services::file_processor::FileStore;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::from_fn,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::file_sets::save_file_set,
        api::handlers::file_sets::destroy_file_set,
        api::handlers::file_sets::get_file_set,
        api::handlers::file_sets::download_file,
        api::handlers::file_sets::download_thumbnails,
        api::handlers::file_sets::download_image,
        api::handlers::health::health_check,
    ),
    components(
        schemas(
            services::file_processor::FileProcessResult,
            services::file_processor::FileProcessCmd,
            services::file_processor::ProcessWorkType,
            api::handlers::file_sets::FileResponse,
            api::handlers::file_sets::FileSetResponse,
            api::handlers::health::HealthResponse,
        )
    ),
    tags(
        (name = "file-sets", description = "Transactional file set operations"),
        (name = "system", description = "Service status")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub file_store: FileStore,
    pub config: StorageConfig,
}

pub fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(api::handlers::health::health_check))
        .route(
            "/file-sets",
            post(api::handlers::file_sets::save_file_set)
                .layer(DefaultBodyLimit::max(state.config.max_request_size)),
        )
        .route(
            "/file-sets/:id",
            get(api::handlers::file_sets::get_file_set)
                .delete(api::handlers::file_sets::destroy_file_set),
        )
        .route(
            "/file-sets/:id/thumbnails",
            get(api::handlers::file_sets::download_thumbnails),
        )
        .route(
            "/files/:id/download",
            get(api::handlers::file_sets::download_file),
        )
        .route(
            "/files/:id/image",
            get(api::handlers::file_sets::download_image),
        )
        .layer(from_fn(api::middleware::request_id::request_id_middleware))
        .layer(cors)
        .with_state(state)
}
