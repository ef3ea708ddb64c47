use crate::config::LockScope;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let config = &state.config;
    let metrics = state.metrics.snapshot();
    let server_lock = state.server_lock_status();
    let lock_scope = match config.stream.lock_scope {
        LockScope::Connection => "connection",
        LockScope::Server => "server",
    };

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port,
            "ws_path": config.server.ws_path
        },
        "stream": {
            "sink": state.sink.describe(),
            "sink_bytes_written": state.sink.bytes_written(),
            "lock_scope": lock_scope,
            "server_lock_held": server_lock.is_some_and(|status| status.held),
            "server_lock": server_lock,
            "binary_frames_are_audio": config.stream.binary_frames_are_audio
        },
        "metrics": metrics
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::stream::sink::MemorySink;
    use actix_web::{test, App};
    use std::sync::Arc;

    #[actix_web::test]
    async fn test_health_reports_stream_state() {
        let state = AppState::new(AppConfig::default(), Arc::new(MemorySink::default()));
        state.metrics.connection_opened();
        state.metrics.record_audio(4);

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/health", web::get().to(health_check)),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"]["port"], 8001);
        assert_eq!(body["stream"]["lock_scope"], "connection");
        assert_eq!(body["stream"]["server_lock_held"], false);
        assert_eq!(body["metrics"]["active_connections"], 1);
        assert_eq!(body["metrics"]["audio_bytes"], 4);
        assert!(body["stream"]["server_lock"].is_null());
    }

    #[actix_web::test]
    async fn test_health_reports_server_lock_owner() {
        let mut config = AppConfig::default();
        config.stream.lock_scope = LockScope::Server;
        let state = AppState::new(config, Arc::new(MemorySink::default()));

        let owner = uuid::Uuid::new_v4();
        let mut dispatcher = state.new_dispatcher(owner);
        dispatcher.session_mut().lock().unwrap();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/health", web::get().to(health_check)),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["stream"]["lock_scope"], "server");
        assert_eq!(body["stream"]["server_lock_held"], true);
        assert_eq!(body["stream"]["server_lock"]["owner"], owner.to_string());
        assert!(body["stream"]["server_lock"]["locked_at"].is_string());
    }
}
