use std::time::Duration;

/// Presence hub configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Redis connection string. When unset, credentials live in memory.
    pub redis_url: Option<String>,
    /// Capacity of each session's outbound queue.
    pub outbound_queue_capacity: usize,
    /// Maximum number of chat messages retained in history.
    pub history_capacity: usize,
    /// Hard cap applied to history requests.
    pub history_limit_cap: usize,
    /// Capacity of the hub's event intake queue.
    pub hub_event_capacity: usize,
    /// Chat messages buffered for the transcript sink before new ones are
    /// dropped.
    pub transcript_queue_capacity: usize,
    /// Period of the writer's WebSocket ping.
    pub heartbeat_interval: Duration,
    /// A connection with no inbound frame for this long is closed.
    pub idle_timeout: Duration,
    /// Bound on handling the upgrade request.
    pub handshake_timeout: Duration,
    /// Worker bits for the message ID generator.
    pub worker_id: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 4003,
            redis_url: None,
            outbound_queue_capacity: 256,
            history_capacity: 1000,
            history_limit_cap: 100,
            hub_event_capacity: 1024,
            transcript_queue_capacity: 1024,
            heartbeat_interval: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(90),
            handshake_timeout: Duration::from_secs(10),
            worker_id: 0,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Every variable is optional; unparseable values fall back to the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: parsed_var("PORT").unwrap_or(defaults.port),
            redis_url: std::env::var("REDIS_URL").ok().filter(|s| !s.is_empty()),
            outbound_queue_capacity: capacity_var(
                "OUTBOUND_QUEUE_CAPACITY",
                defaults.outbound_queue_capacity,
            ),
            history_capacity: capacity_var("HISTORY_CAPACITY", defaults.history_capacity),
            history_limit_cap: capacity_var("HISTORY_LIMIT_CAP", defaults.history_limit_cap),
            hub_event_capacity: capacity_var("HUB_EVENT_CAPACITY", defaults.hub_event_capacity),
            transcript_queue_capacity: capacity_var(
                "TRANSCRIPT_QUEUE_CAPACITY",
                defaults.transcript_queue_capacity,
            ),
            heartbeat_interval: secs_var("HEARTBEAT_INTERVAL_SECS")
                .unwrap_or(defaults.heartbeat_interval),
            idle_timeout: secs_var("IDLE_TIMEOUT_SECS").unwrap_or(defaults.idle_timeout),
            handshake_timeout: secs_var("HANDSHAKE_TIMEOUT_SECS")
                .unwrap_or(defaults.handshake_timeout),
            worker_id: parsed_var("WORKER_ID").unwrap_or(defaults.worker_id),
        }
    }
}

fn parsed_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

// Zero-sized queues would turn every enqueue into a disconnect.
fn capacity_var(name: &str, default: usize) -> usize {
    parsed_var(name).unwrap_or(default).max(1)
}

fn secs_var(name: &str) -> Option<Duration> {
    parsed_var::<u64>(name)
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
}
