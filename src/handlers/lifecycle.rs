use super::{require_connection_id, ConnectionRequest};
use crate::error::AppError;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

/// `POST /connect`: open (or replace) the backend session for a client connection.
pub async fn connect(state: web::Data<AppState>, body: web::Bytes) -> Result<HttpResponse, AppError> {
    let request: ConnectionRequest = serde_json::from_slice(&body)?;
    require_connection_id(&request.connection_id)?;

    let session = state.relay.connect(&request.connection_id).await?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "connected",
        "connectionId": session.connection_id,
        "sessionId": session.session_id,
        "replaced": session.replaced
    })))
}

/// `DELETE /disconnect`: succeeds whether or not a session existed.
pub async fn disconnect(state: web::Data<AppState>, body: web::Bytes) -> Result<HttpResponse, AppError> {
    let request: ConnectionRequest = serde_json::from_slice(&body)?;
    require_connection_id(&request.connection_id)?;

    state.relay.disconnect(&request.connection_id).await;

    Ok(HttpResponse::Ok().json(json!({
        "status": "disconnected",
        "connectionId": request.connection_id
    })))
}
