//! Observability and Metrics
//!
//! Driver-wide counters for connections, handshakes, authentication,
//! commands and cursor traffic.
//!
//! Uses atomic counters for thread-safe metrics collection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// Global metrics collector for driver operations
#[derive(Debug)]
pub struct Metrics {
    /// Total connections established
    pub connections_total: AtomicU64,
    /// Currently open connections
    pub connections_active: AtomicU64,
    /// Failed connect attempts and invalidated handles
    pub connection_errors: AtomicU64,
    /// Connection handshakes (`hello`/`isMaster`) sent
    pub handshakes_total: AtomicU64,
    pub handshakes_failed: AtomicU64,
    /// SCRAM conversations started
    pub auth_total: AtomicU64,
    pub auth_success: AtomicU64,
    pub auth_failed: AtomicU64,
    /// Commands sent through the executor
    pub commands_total: AtomicU64,
    /// Commands answered with `ok: 0` or write errors
    pub commands_failed: AtomicU64,
    pub messages_sent: AtomicU64,
    pub messages_received: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,
    /// Messages sent wrapped in `OP_COMPRESSED`
    pub messages_compressed: AtomicU64,
    pub get_mores: AtomicU64,
    pub cursors_killed: AtomicU64,
    /// Malformed frames or replies
    pub protocol_errors: AtomicU64,
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            connection_errors: AtomicU64::new(0),
            handshakes_total: AtomicU64::new(0),
            handshakes_failed: AtomicU64::new(0),
            auth_total: AtomicU64::new(0),
            auth_success: AtomicU64::new(0),
            auth_failed: AtomicU64::new(0),
            commands_total: AtomicU64::new(0),
            commands_failed: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            messages_compressed: AtomicU64::new(0),
            get_mores: AtomicU64::new(0),
            cursors_killed: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn connection_established(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn connection_error(&self) {
        self.connection_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_attempt(&self) {
        self.handshakes_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_failed(&self) {
        self.handshakes_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn auth_attempt(&self) {
        self.auth_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn auth_success(&self) {
        self.auth_success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn auth_failed(&self) {
        self.auth_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn command_sent(&self) {
        self.commands_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn command_failed(&self) {
        self.commands_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a message sent
    pub fn message_sent(&self, byte_count: u64, compressed: bool) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
        if compressed {
            self.messages_compressed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a message received
    pub fn message_received(&self, byte_count: u64) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn get_more(&self) {
        self.get_mores.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cursor_killed(&self) {
        self.cursors_killed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            connection_errors: self.connection_errors.load(Ordering::Relaxed),
            handshakes_total: self.handshakes_total.load(Ordering::Relaxed),
            handshakes_failed: self.handshakes_failed.load(Ordering::Relaxed),
            auth_total: self.auth_total.load(Ordering::Relaxed),
            auth_success: self.auth_success.load(Ordering::Relaxed),
            auth_failed: self.auth_failed.load(Ordering::Relaxed),
            commands_total: self.commands_total.load(Ordering::Relaxed),
            commands_failed: self.commands_failed.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            messages_compressed: self.messages_compressed.load(Ordering::Relaxed),
            get_mores: self.get_mores.load(Ordering::Relaxed),
            cursors_killed: self.cursors_killed.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let s = self.snapshot();
        info!(
            connections_total = s.connections_total,
            connections_active = s.connections_active,
            connection_errors = s.connection_errors,
            handshakes_total = s.handshakes_total,
            handshakes_failed = s.handshakes_failed,
            auth_total = s.auth_total,
            auth_success = s.auth_success,
            auth_failed = s.auth_failed,
            commands_total = s.commands_total,
            commands_failed = s.commands_failed,
            bytes_sent = s.bytes_sent,
            bytes_received = s.bytes_received,
            messages_compressed = s.messages_compressed,
            get_mores = s.get_mores,
            cursors_killed = s.cursors_killed,
            protocol_errors = s.protocol_errors,
            uptime_seconds = s.uptime_seconds,
            "Driver metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub connection_errors: u64,
    pub handshakes_total: u64,
    pub handshakes_failed: u64,
    pub auth_total: u64,
    pub auth_success: u64,
    pub auth_failed: u64,
    pub commands_total: u64,
    pub commands_failed: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub messages_compressed: u64,
    pub get_mores: u64,
    pub cursors_killed: u64,
    pub protocol_errors: u64,
    pub uptime_seconds: u64,
}

static METRICS: once_cell::sync::Lazy<Metrics> = once_cell::sync::Lazy::new(Metrics::new);

/// Get the global metrics instance
pub fn global_metrics() -> &'static Metrics {
    &METRICS
}

/// Timer for measuring operation duration; logs on drop
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.start.elapsed().as_millis()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        debug!(
            operation = self.operation,
            duration_ms = self.start.elapsed().as_millis() as u64,
            "Operation completed"
        );
    }
}
