//! # Application State Management
//!
//! Shared state handed to every HTTP handler and WebSocket connection.
//!
//! ## What is shared:
//! - **config**: read-only after startup, so a plain `Arc` is enough
//! - **sink**: the audio destination every connection appends to
//! - **lock_slot**: the server-wide lock, used only in `server` lock scope
//! - **metrics**: stream counters updated by connections, read by `/health`
//!
//! ## Metrics
//! Each counter is an independent `AtomicU64`. Readers may see counters from
//! slightly different instants.

use crate::config::{AppConfig, LockScope};
use crate::stream::dispatcher::Dispatcher;
use crate::stream::session::{lock_slot, LockSlotStatus, SessionHandle, SharedLockSlot};
use crate::stream::sink::AudioSink;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// The state shared by all connections.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub sink: Arc<dyn AudioSink>,
    pub lock_slot: SharedLockSlot,
    pub metrics: Arc<StreamMetrics>,
    /// When the server started
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: AppConfig, sink: Arc<dyn AudioSink>) -> Self {
        Self {
            config: Arc::new(config),
            sink,
            lock_slot: SharedLockSlot::default(),
            metrics: Arc::new(StreamMetrics::default()),
            start_time: Instant::now(),
        }
    }

    /// Build the dispatcher for a newly accepted connection.
    ///
    /// ## Lock scope:
    /// - `connection`: the dispatcher gets its own fresh session
    /// - `server`: the dispatcher acts on the shared slot
    pub fn new_dispatcher(&self, connection_id: Uuid) -> Dispatcher {
        let session = match self.config.stream.lock_scope {
            LockScope::Connection => SessionHandle::for_connection(),
            LockScope::Server => SessionHandle::shared(self.lock_slot.clone(), connection_id),
        };

        Dispatcher::new(
            connection_id,
            session,
            self.sink.clone(),
            self.config.stream.binary_frames_are_audio,
            self.metrics.clone(),
        )
    }

    /// State of the server-wide slot. `None` in connection scope, where no
    /// lock outlives its connection.
    pub fn server_lock_status(&self) -> Option<LockSlotStatus> {
        match self.config.stream.lock_scope {
            LockScope::Connection => None,
            LockScope::Server => Some(lock_slot(&self.lock_slot).status()),
        }
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// Counters describing stream activity since server start.
#[derive(Debug, Default)]
pub struct StreamMetrics {
    active_connections: AtomicU64,
    total_connections: AtomicU64,
    audio_chunks: AtomicU64,
    audio_bytes: AtomicU64,
    locks_granted: AtomicU64,
    protocol_errors: AtomicU64,
    sink_failures: AtomicU64,
}

/// Point-in-time copy of [`StreamMetrics`] for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StreamMetricsSnapshot {
    pub active_connections: u64,
    pub total_connections: u64,
    pub audio_chunks: u64,
    pub audio_bytes: u64,
    pub locks_granted: u64,
    pub protocol_errors: u64,
    pub sink_failures: u64,
}

impl StreamMetrics {
    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Underflow-safe: a stray close never wraps the gauge around.
    pub fn connection_closed(&self) {
        let _ = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn record_audio(&self, bytes: usize) {
        self.audio_chunks.fetch_add(1, Ordering::Relaxed);
        self.audio_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_lock(&self) {
        self.locks_granted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sink_failure(&self) {
        self.sink_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StreamMetricsSnapshot {
        StreamMetricsSnapshot {
            active_connections: self.active_connections.load(Ordering::Relaxed),
            total_connections: self.total_connections.load(Ordering::Relaxed),
            audio_chunks: self.audio_chunks.load(Ordering::Relaxed),
            audio_bytes: self.audio_bytes.load(Ordering::Relaxed),
            locks_granted: self.locks_granted.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::sink::MemorySink;

    fn server_lock_held(state: &AppState) -> bool {
        state.server_lock_status().is_some_and(|status| status.held)
    }

    #[test]
    fn test_connection_gauge_never_underflows() {
        let metrics = StreamMetrics::default();
        metrics.connection_closed();
        assert_eq!(metrics.snapshot().active_connections, 0);

        metrics.connection_opened();
        metrics.connection_opened();
        metrics.connection_closed();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.active_connections, 1);
        assert_eq!(snapshot.total_connections, 2);
    }

    #[test]
    fn test_dispatchers_follow_lock_scope() {
        let mut config = AppConfig::default();
        config.stream.lock_scope = LockScope::Server;
        let state = AppState::new(config, Arc::new(MemorySink::default()));

        let mut first = state.new_dispatcher(Uuid::new_v4());
        let second = state.new_dispatcher(Uuid::new_v4());
        assert!(!server_lock_held(&state));

        first.session_mut().lock().unwrap();
        assert!(server_lock_held(&state));
        assert!(second.session().is_locked());
        assert!(state.server_lock_status().and_then(|status| status.owner).is_some());

        let state = AppState::new(AppConfig::default(), Arc::new(MemorySink::default()));
        let mut first = state.new_dispatcher(Uuid::new_v4());
        let second = state.new_dispatcher(Uuid::new_v4());
        first.session_mut().lock().unwrap();
        assert!(!second.session().is_locked());
        assert!(!server_lock_held(&state));
        assert_eq!(state.server_lock_status(), None);
    }
}
