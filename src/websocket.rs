//! # WebSocket Audio Streaming Handler
//!
//! Each upgraded connection becomes one `StreamSocket` actor that owns a
//! [`Dispatcher`]. Frames are handled one at a time by the actor, and the
//! reply to a frame is queued on the connection before the next frame is
//! read, so responses leave in the order requests arrived.
//!
//! ## Connection Lifecycle:
//! 1. **Upgrade**: `GET <ws_path>` is upgraded by [`stream_websocket`]
//! 2. **Started**: the actor registers the connection and starts heartbeats
//! 3. **Frames**: text and binary frames go through the dispatcher
//! 4. **Stopped**: the session is torn down and any lock it holds is released
//!
//! ## Heartbeat:
//! The server sends WebSocket ping frames every `heartbeat_interval_secs` and
//! stops the actor when nothing has arrived for `client_timeout_secs`.
//! Protocol-level ping/pong frames never produce a `{type,data}` response.
//!
//! ## Fragmented messages:
//! A message split over continuation frames is buffered and dispatched once,
//! when its last fragment arrives. The reassembled message is held to the same
//! `max_frame_bytes` limit as a single frame; going over it closes the
//! connection with code 1009.

use crate::state::{AppState, StreamMetrics};
use crate::stream::codec::FrameKind;
use crate::stream::dispatcher::Dispatcher;

use actix::prelude::*;
use actix_http::ws::Item;
use actix_web::web::{Bytes, BytesMut};
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// WebSocket actor for one streaming connection.
pub struct StreamSocket {
    /// Unique ID for this connection, used in logs
    connection_id: Uuid,

    /// Protocol state for this connection
    dispatcher: Dispatcher,

    metrics: Arc<StreamMetrics>,

    heartbeat_interval: Duration,
    client_timeout: Duration,

    /// Last time any frame arrived from the client
    last_heartbeat: Instant,

    /// Largest accepted message, single frame or reassembled
    max_message_bytes: usize,

    /// Fragmented message being reassembled
    fragment: Option<(FrameKind, BytesMut)>,
}

impl StreamSocket {
    pub fn new(state: &AppState) -> Self {
        let connection_id = Uuid::new_v4();
        let connection = &state.config.connection;

        Self {
            connection_id,
            dispatcher: state.new_dispatcher(connection_id),
            metrics: state.metrics.clone(),
            heartbeat_interval: Duration::from_secs(connection.heartbeat_interval_secs),
            client_timeout: Duration::from_secs(connection.client_timeout_secs),
            last_heartbeat: Instant::now(),
            max_message_bytes: connection.max_frame_bytes,
            fragment: None,
        }
    }

    fn start_heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(self.heartbeat_interval, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > act.client_timeout {
                warn!(connection_id = %act.connection_id, "WebSocket heartbeat timeout, closing connection");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    /// Dispatch one inbound unit and write its reply.
    fn handle_unit(&mut self, frame: FrameKind, payload: Bytes, ctx: &mut ws::WebsocketContext<Self>) {
        let dispatch = self.dispatcher.dispatch(frame, payload);

        match dispatch.response.encode() {
            Ok(json) => ctx.text(json),
            Err(err) => {
                error!(connection_id = %self.connection_id, error = %err, "Failed to encode response");
                ctx.stop();
                return;
            }
        }

        if dispatch.close {
            ctx.close(Some(ws::CloseReason {
                code: ws::CloseCode::Error,
                description: Some("audio sink failure".to_string()),
            }));
            ctx.stop();
        }
    }

    /// Buffer one fragment; the unit is dispatched on the last fragment.
    fn handle_fragment(&mut self, item: Item, ctx: &mut ws::WebsocketContext<Self>) {
        let (first, data, last) = match item {
            Item::FirstText(data) => (Some(FrameKind::Text), data, false),
            Item::FirstBinary(data) => (Some(FrameKind::Binary), data, false),
            Item::Continue(data) => (None, data, false),
            Item::Last(data) => (None, data, true),
        };

        match (first, self.fragment.is_some()) {
            (Some(kind), false) => self.fragment = Some((kind, BytesMut::new())),
            (None, true) => {}
            (Some(_), true) | (None, false) => {
                warn!(connection_id = %self.connection_id, "Out of order continuation frame");
                self.close_with(ws::CloseCode::Protocol, ctx);
                return;
            }
        }

        let buffered = self.fragment.as_ref().map_or(0, |(_, buffer)| buffer.len());
        if buffered + data.len() > self.max_message_bytes {
            warn!(
                connection_id = %self.connection_id,
                limit = self.max_message_bytes,
                "Fragmented message exceeds size limit"
            );
            self.close_with(ws::CloseCode::Size, ctx);
            return;
        }

        if let Some((_, buffer)) = self.fragment.as_mut() {
            buffer.extend_from_slice(&data);
        }

        if last {
            if let Some((kind, buffer)) = self.fragment.take() {
                self.handle_unit(kind, buffer.freeze(), ctx);
            }
        }
    }

    fn close_with(&mut self, code: ws::CloseCode, ctx: &mut ws::WebsocketContext<Self>) {
        self.fragment = None;
        ctx.close(Some(code.into()));
        ctx.stop();
    }
}

impl Actor for StreamSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.metrics.connection_opened();
        info!(connection_id = %self.connection_id, "WebSocket connection started");
        self.start_heartbeat(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.dispatcher.close();
        self.metrics.connection_closed();
        info!(connection_id = %self.connection_id, "WebSocket connection stopped");
    }
}

/// Handle incoming WebSocket frames.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for StreamSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        self.last_heartbeat = Instant::now();

        match msg {
            Ok(ws::Message::Text(text)) => {
                self.handle_unit(FrameKind::Text, text.into_bytes(), ctx);
            }
            Ok(ws::Message::Binary(data)) => {
                self.handle_unit(FrameKind::Binary, data, ctx);
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {}
            Ok(ws::Message::Close(reason)) => {
                info!(connection_id = %self.connection_id, reason = ?reason, "WebSocket closed by client");
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(item)) => {
                self.handle_fragment(item, ctx);
            }
            Ok(ws::Message::Nop) => {}
            Err(ws::ProtocolError::Overflow) => {
                warn!(
                    connection_id = %self.connection_id,
                    limit = self.max_message_bytes,
                    "Frame exceeds size limit"
                );
                self.close_with(ws::CloseCode::Size, ctx);
            }
            Err(err @ (ws::ProtocolError::ContinuationNotStarted | ws::ProtocolError::ContinuationStarted)) => {
                warn!(connection_id = %self.connection_id, error = %err, "Out of order continuation frame");
                self.close_with(ws::CloseCode::Protocol, ctx);
            }
            Err(err) => {
                error!(connection_id = %self.connection_id, error = %err, "WebSocket protocol error");
                ctx.stop();
            }
        }
    }
}

/// WebSocket endpoint handler.
///
/// Upgrades the HTTP request and hands the connection to a new
/// [`StreamSocket`] actor.
pub async fn stream_websocket(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    debug!(peer = ?req.connection_info().peer_addr(), "New WebSocket connection request");

    let socket = StreamSocket::new(&state);
    ws::WsResponseBuilder::new(socket, &req, stream)
        .frame_size(state.config.connection.max_frame_bytes)
        .start()
}
