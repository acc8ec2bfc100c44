//! # HTTP Handlers
//!
//! Thin adapters between the gateway's webhooks and the session relay.
//!
//! ## Routes:
//! - `POST /connect`, `DELETE /disconnect`: session lifecycle
//! - `POST /msg`: telephony media frames
//! - `POST /raw`: arbitrary backend events
//! - `GET /health`, `/api/v1/health`, `/api/v1/metrics`, `/api/v1/config`: operations
//!
//! Every route answers a wrong method with a 405 carrying the structured error body.

pub mod config;
pub mod lifecycle;
pub mod media;

pub use self::config::get_config;
pub use lifecycle::{connect, disconnect};
pub use media::{on_media_message, on_raw_message};

use crate::error::AppError;
use crate::health;
use actix_web::{web, HttpRequest};
use serde::Deserialize;

/// Register every route on an `App` or scope.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/connect")
            .route(web::post().to(connect))
            .default_service(web::to(method_not_allowed)),
    )
    .service(
        web::resource("/disconnect")
            .route(web::delete().to(disconnect))
            .default_service(web::to(method_not_allowed)),
    )
    .service(
        web::resource("/msg")
            .route(web::post().to(on_media_message))
            .default_service(web::to(method_not_allowed)),
    )
    .service(
        web::resource("/raw")
            .route(web::post().to(on_raw_message))
            .default_service(web::to(method_not_allowed)),
    )
    .service(
        web::resource("/health")
            .route(web::get().to(health::health_check))
            .default_service(web::to(method_not_allowed)),
    )
    .service(
        web::scope("/api/v1")
            .service(read_only("/health", web::get().to(health::health_check)))
            .service(read_only("/metrics", web::get().to(health::detailed_metrics)))
            .service(read_only("/config", web::get().to(get_config))),
    );
}

fn read_only(path: &str, route: actix_web::Route) -> actix_web::Resource {
    web::resource(path)
        .route(route)
        .default_service(web::to(method_not_allowed))
}

async fn method_not_allowed(req: HttpRequest) -> Result<&'static str, AppError> {
    Err(AppError::MethodNotAllowed(format!("{} {}", req.method(), req.path())))
}

/// `{"connectionId": "..."}`, the body of every lifecycle webhook.
#[derive(Debug, Deserialize)]
pub struct ConnectionRequest {
    #[serde(rename = "connectionId")]
    pub connection_id: String,
}

fn require_connection_id(connection_id: &str) -> Result<(), AppError> {
    if connection_id.is_empty() {
        return Err(AppError::ValidationError("connectionId must not be empty".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::configure;
    use crate::state::test_support::{state_with, valid_config};
    use actix_web::http::StatusCode;
    use actix_web::{test, web, App};

    #[actix_web::test]
    async fn test_wrong_method_is_405() {
        let (state, _, _) = state_with(valid_config());
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(configure)).await;

        for req in [
            test::TestRequest::get().uri("/connect"),
            test::TestRequest::post().uri("/disconnect"),
            test::TestRequest::get().uri("/msg"),
            test::TestRequest::put().uri("/raw"),
            test::TestRequest::post().uri("/health"),
            test::TestRequest::post().uri("/api/v1/health"),
            test::TestRequest::delete().uri("/api/v1/metrics"),
            test::TestRequest::put().uri("/api/v1/config"),
        ] {
            let req = req.to_request();
            let path = req.path().to_string();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED, "{path}");
            let body: serde_json::Value = test::read_body_json(resp).await;
            assert_eq!(body["error"]["type"], "method_not_allowed");
        }
    }

    #[actix_web::test]
    async fn test_health_routes() {
        let (state, _, _) = state_with(valid_config());
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(configure)).await;

        for uri in ["/health", "/api/v1/health", "/api/v1/metrics", "/api/v1/config"] {
            let resp = test::call_service(&app, test::TestRequest::get().uri(uri).to_request()).await;
            assert_eq!(resp.status(), StatusCode::OK, "{uri}");
        }
    }
}
