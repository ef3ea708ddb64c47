//! # Connection Server
//!
//! Binds the HTTP listener that serves `/health` and upgrades WebSocket
//! connections on the configured path. Every accepted connection runs its own
//! `StreamSocket` actor; nothing but the sink (and, in server lock scope, the
//! lock slot) is shared between them.

use crate::health;
use crate::middleware::RequestLogging;
use crate::state::AppState;
use crate::websocket;

use actix_cors::Cors;
use actix_web::dev::Server;
use actix_web::{web, App, HttpServer};
use std::net::SocketAddr;
use tracing_actix_web::TracingLogger;

/// Bind the listener and return the (not yet polled) server with the
/// addresses it is bound to.
pub fn bind(state: AppState) -> std::io::Result<(Server, Vec<SocketAddr>)> {
    let host = state.config.server.host.clone();
    let port = state.config.server.port;
    let workers = state.config.server.workers;
    let ws_path = state.config.server.ws_path.clone();
    let data = web::Data::new(state);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(data.clone())
            .wrap(cors)
            .wrap(TracingLogger::default())
            .wrap(RequestLogging)
            // /health is registered first so it wins when ws_path is "/"
            .route("/health", web::get().to(health::health_check))
            .route(&ws_path, web::get().to(websocket::stream_websocket))
    })
    .workers(workers)
    .bind((host, port))?;

    let addrs = server.addrs();
    Ok((server.run(), addrs))
}
