//! Media webhooks.
//!
//! Both routes take the same envelope, `{"connectionId": "...", "body": <json>}`.
//! `/msg` decodes `body` as a telephony frame; `/raw` hands it to the backend as is.

use super::require_connection_id;
use crate::error::AppError;
use crate::protocol::TelephonyFrame;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
struct MessageEnvelope {
    #[serde(rename = "connectionId")]
    connection_id: String,
    body: Value,
}

impl MessageEnvelope {
    fn parse(raw: &[u8]) -> Result<Self, AppError> {
        let envelope: MessageEnvelope = serde_json::from_slice(raw)?;
        require_connection_id(&envelope.connection_id)?;
        Ok(envelope)
    }
}

/// `POST /msg`
pub async fn on_media_message(state: web::Data<AppState>, body: web::Bytes) -> Result<HttpResponse, AppError> {
    let envelope = MessageEnvelope::parse(&body)?;
    let frame = TelephonyFrame::from_value(envelope.body)?;

    state.relay.on_media_frame(&envelope.connection_id, &frame).await?;

    Ok(HttpResponse::Ok().json(json!({ "status": "ok", "event": frame.event })))
}

/// `POST /raw`
pub async fn on_raw_message(state: web::Data<AppState>, body: web::Bytes) -> Result<HttpResponse, AppError> {
    let envelope = MessageEnvelope::parse(&body)?;
    let payload = serde_json::to_string(&envelope.body)?;

    state.relay.on_raw_message(&envelope.connection_id, payload).await?;

    Ok(HttpResponse::Ok().json(json!({ "status": "ok" })))
}

#[cfg(test)]
mod tests {
    use crate::handlers::configure;
    use crate::state::test_support::{state_with, valid_config};
    use actix_web::http::StatusCode;
    use actix_web::{test, web, App};
    use serde_json::json;

    #[actix_web::test]
    async fn test_start_then_media_reaches_backend() {
        let (state, dialer, _) = state_with(valid_config());
        let relay = state.relay.clone();
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(configure)).await;

        relay.connect("abc").await.unwrap();
        let mut backend = dialer.take_backend();
        backend.next_sent().await; // session.update

        let req = test::TestRequest::post()
            .uri("/msg")
            .set_json(json!({"connectionId": "abc", "body": {"event": "start", "streamSid": "SID1", "start": {"tracks": ["inbound"]}}}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
        assert_eq!(relay.streams().resolve("abc").as_deref(), Some("SID1"));

        let req = test::TestRequest::post()
            .uri("/msg")
            .set_json(json!({"connectionId": "abc", "body": {"event": "media", "streamSid": "SID1", "media": {"track": "inbound", "payload": "QUJD"}}}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
        assert_eq!(
            backend.next_sent().await.unwrap(),
            r#"{"type":"input_audio_buffer.append","audio":"QUJD"}"#
        );
    }

    #[actix_web::test]
    async fn test_media_without_session_is_410() {
        let (state, _, _) = state_with(valid_config());
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/msg")
            .set_json(json!({"connectionId": "ghost", "body": {"event": "media", "media": {"payload": "QUJD"}}}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::GONE);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["type"], "session_not_found");
    }

    #[actix_web::test]
    async fn test_malformed_frames_are_400() {
        let (state, _, _) = state_with(valid_config());
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(configure)).await;

        for body in [
            json!({"connectionId": "abc"}),
            json!({"connectionId": "abc", "body": {"streamSid": "SID1"}}),
            json!({"connectionId": "abc", "body": {"event": "media", "media": {"track": "inbound"}}}),
            json!({"connectionId": "abc", "body": {"event": "start"}}),
        ] {
            let req = test::TestRequest::post().uri("/msg").set_json(&body).to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{body}");
        }
    }

    #[actix_web::test]
    async fn test_control_frames_are_accepted() {
        let (state, _, _) = state_with(valid_config());
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/msg")
            .set_json(json!({"connectionId": "abc", "body": {"event": "mark", "mark": {"name": "m1"}}}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn test_raw_body_is_forwarded() {
        let (state, dialer, _) = state_with(valid_config());
        let relay = state.relay.clone();
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(configure)).await;

        relay.connect("abc").await.unwrap();
        let mut backend = dialer.take_backend();
        backend.next_sent().await;

        let req = test::TestRequest::post()
            .uri("/raw")
            .set_json(json!({"connectionId": "abc", "body": {"type": "response.create"}}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
        assert_eq!(backend.next_sent().await.unwrap(), r#"{"type":"response.create"}"#);
    }
}
