use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// `GET /api/v1/config`: the running configuration, minus secrets.
pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = &state.config;

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": {
            "server": {
                "host": config.server.host,
                "port": config.server.port
            },
            "gateway": {
                "kind": config.gateway.kind.as_str(),
                "endpoint": config.gateway.endpoint,
                "region": config.gateway.region,
                "request_timeout_ms": config.gateway.request_timeout_ms,
                "auth_token_set": config.gateway.auth_token.is_some()
            },
            "backend": {
                "url": config.backend.url,
                "beta_header": config.backend.beta_header,
                "connect_timeout_ms": config.backend.connect_timeout_ms,
                "api_key_set": !config.backend.api_key.is_empty()
            },
            "session": config.session,
            "relay": config.relay
        }
    })))
}
