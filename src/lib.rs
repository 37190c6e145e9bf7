pub mod api;
pub mod config;
pub mod models;
pub mod services;
pub mod utils;

use crate::api::handlers;
use crate::api::middleware::{request_id::request_id_middleware, signed::signed_request_middleware};
use crate::config::{FolderConfig, FolderMode};
use crate::services::chunk::ChunkAssembler;
use crate::services::folder::{FolderService, LocalFolderStore};
use crate::services::remote::RemoteDelegate;
use crate::utils::auth::TokenAuthenticator;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::HeaderValue,
    middleware::from_fn,
    routing::{get, post},
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health_check,
        handlers::folders::list_folder,
        handlers::folders::upload_files,
        handlers::folders::upload_part,
        handlers::folders::rename_file,
        handlers::folders::delete_file,
        handlers::remote::list,
        handlers::remote::upload,
        handlers::remote::rename,
        handlers::remote::delete,
    ),
    components(
        schemas(
            handlers::health::HealthResponse,
            handlers::folders::RenameForm,
            handlers::folders::DeleteForm,
            handlers::folders::RenameResponse,
            handlers::folders::PartResponse,
            models::FolderError,
            models::ResultBody,
            models::ListingBody,
            models::StoredFile,
        )
    ),
    tags(
        (name = "folders", description = "Folder operations for clients"),
        (name = "remote", description = "Signed folder operations called by delegating instances"),
        (name = "system", description = "Health")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub config: FolderConfig,
    /// Backs the client-facing routes: the local store or a remote delegate.
    pub folders: Arc<dyn FolderService>,
    /// Backs the signed routes.
    pub local: Arc<LocalFolderStore>,
    /// Present in local mode only.
    pub assembler: Option<Arc<ChunkAssembler>>,
    pub auth: TokenAuthenticator,
}

impl AppState {
    pub fn from_config(config: FolderConfig) -> anyhow::Result<Self> {
        config.validate()?;

        let auth = TokenAuthenticator::new(config.secret_key.clone(), config.token_timeout_ms);
        let local = Arc::new(LocalFolderStore::new(
            config.folder_root.clone(),
            config.slugify_names,
        ));

        let (folders, assembler) = match config.mode {
            FolderMode::Local => {
                let assembler = Arc::new(ChunkAssembler::new(
                    config.folder_root.clone(),
                    config.staging_dir.clone(),
                ));
                (local.clone() as Arc<dyn FolderService>, Some(assembler))
            }
            FolderMode::Delegate => {
                let endpoint = config
                    .remote_endpoint
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("REMOTE_ENDPOINT is required in delegate mode"))?;
                let delegate = RemoteDelegate::new(endpoint, auth.clone())?;
                (Arc::new(delegate) as Arc<dyn FolderService>, None)
            }
        };

        Ok(Self {
            config,
            folders,
            local,
            assembler,
            auth,
        })
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(Any);

    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

pub fn create_app(state: AppState) -> Router {
    let signed = Router::new()
        .route("/remote/list/*key", get(handlers::remote::list))
        .route("/remote/upload/*key", post(handlers::remote::upload))
        .route("/remote/rename/*key", post(handlers::remote::rename))
        .route("/remote/delete/*key", post(handlers::remote::delete))
        .layer(from_fn(signed_request_middleware));

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(handlers::health::health_check))
        .route("/folders/list/*key", get(handlers::folders::list_folder))
        .route("/folders/upload/*key", post(handlers::folders::upload_files))
        .route("/folders/parts/*key", post(handlers::folders::upload_part))
        .route("/folders/rename/*key", post(handlers::folders::rename_file))
        .route("/folders/delete/*key", post(handlers::folders::delete_file))
        .merge(signed)
        .layer(from_fn(request_id_middleware))
        .layer(cors_layer(&state.config.allowed_origins))
        .layer(DefaultBodyLimit::max(state.config.max_upload_size))
        .with_state(state)
}

/// Wraps `app` in the HTTP trace span. The request id is assigned outside
/// the span so every span carries one.
pub fn with_request_tracing(app: Router) -> Router {
    app.layer(
        TraceLayer::new_for_http()
            .make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(api::middleware::request_id::REQUEST_ID_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("unknown");
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %request_id,
                )
            })
            .on_request(|request: &axum::http::Request<_>, _span: &tracing::Span| {
                tracing::info!("📥 {} {}", request.method(), request.uri());
            })
            .on_response(
                |response: &axum::http::Response<_>, latency: Duration, _span: &tracing::Span| {
                    tracing::info!(
                        "📤 Finished in {:?} with status {}",
                        latency,
                        response.status()
                    );
                },
            ),
    )
    .layer(from_fn(request_id_middleware))
}
