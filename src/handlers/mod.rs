// handlers/mod.rs - HTTP binding of the object storage surface
//
// Every route takes and returns JSON. Tenant scope travels in the request
// body (`appId`, optional `groupId`); the tag is the path segment.

pub mod objs;
pub mod system;

use axum::{
    extract::Extension,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::services::ObjService;

/// Build the application router around one shared service
pub fn app(service: Arc<ObjService>) -> Router {
    let request_logging = service.config().api.enable_request_logging;

    let router = Router::new()
        .route("/", get(system::root))
        .route("/health", get(system::health))
        .merge(obj_routes())
        .layer(Extension(service))
        .layer(CorsLayer::permissive());

    if request_logging {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

fn obj_routes() -> Router {
    Router::new()
        .route("/objs/:tag/set", post(objs::objs_set))
        .route("/objs/:tag/update", post(objs::objs_update))
        .route("/objs/:tag/delete", post(objs::objs_delete))
        .route("/objs/:tag/get", post(objs::objs_get))
        .route("/objs/:tag/fields", post(objs::fields_list))
        .route("/objs/:tag/fields/values", post(objs::field_values))
}
