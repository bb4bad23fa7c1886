//! Connection counters for the admin query surface.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

pub struct ConnectionStats {
    total_connections: AtomicU64,
    total_disconnections: AtomicU64,
    total_errors: AtomicU64,
    started_at: DateTime<Utc>,
}

/// Point-in-time view of the counters.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StatsSnapshot {
    pub active_connections: usize,
    pub total_connections: u64,
    pub total_disconnections: u64,
    pub total_errors: u64,
    pub started_at: DateTime<Utc>,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self {
            total_connections: AtomicU64::new(0),
            total_disconnections: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            started_at: Utc::now(),
        }
    }

    pub fn record_connect(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disconnect(&self) {
        self.total_disconnections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.total_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// `active_connections` comes from the registry, which is the source of
    /// truth for who is online.
    pub fn snapshot(&self, active_connections: usize) -> StatsSnapshot {
        StatsSnapshot {
            active_connections,
            total_connections: self.total_connections.load(Ordering::Relaxed),
            total_disconnections: self.total_disconnections.load(Ordering::Relaxed),
            total_errors: self.total_errors.load(Ordering::Relaxed),
            started_at: self.started_at,
        }
    }
}

impl Default for ConnectionStats {
    fn default() -> Self {
        Self::new()
    }
}
