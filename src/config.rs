//! Application configuration, loaded from the environment.

use std::time::Duration;

/// Process-wide configuration. Every field has a sane default so the demo
/// binary runs unconfigured; production deployments override via env vars.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub port: u16,
    pub database_path: String,
    pub jwt_secret: String,

    /// Bound send buffer depth for a single SSE subscription (spec.md §4.I).
    pub sse_channel_capacity: usize,
    /// Size ceiling for the HTML chunk cache, enforced by the cleanup
    /// worker's LRU pass (spec.md §4.J).
    pub html_chunk_cache_capacity: usize,

    /// Session lifetime from creation (spec.md §3, `SessionData`).
    pub session_ttl: Duration,
    /// Window under which an existing visit is reused (spec.md §4.D).
    pub visit_ttl: Duration,
    /// Idle window after which a fingerprint with no live sessions is
    /// evicted (spec.md §4.J).
    pub fingerprint_idle_ttl: Duration,

    /// Cleanup worker tick interval (spec.md §4.J).
    pub cleanup_tick: Duration,
    /// Deadline applied to repository calls by default (spec.md §5).
    pub repository_deadline: Duration,

    /// Per-IP request ceiling before the rate limiter starts rejecting
    /// (spec.md §1 AMBIENT — a public HTTP surface needs abuse protection
    /// even though the spec never names it).
    pub rate_limit_max_requests: u32,
    /// Sliding window the request ceiling above applies to.
    pub rate_limit_window_secs: u64,
    /// Extra requests allowed above the ceiling before a hard reject.
    pub rate_limit_burst: u32,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let bind_addr =
            std::env::var("TRACTCORE_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port = std::env::var("TRACTCORE_PORT")
            .unwrap_or_else(|_| "8787".to_string())
            .parse()
            .unwrap_or(8787);

        let database_path = std::env::var("TRACTCORE_DATABASE_PATH")
            .unwrap_or_else(|_| "./tractcore.db".to_string());

        let jwt_secret = std::env::var("TRACTCORE_JWT_SECRET")
            .unwrap_or_else(|_| "dev-secret-change-in-production-minimum-32-characters".to_string());

        let sse_channel_capacity = std::env::var("TRACTCORE_SSE_CHANNEL_CAPACITY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(32);

        let html_chunk_cache_capacity = std::env::var("TRACTCORE_HTML_CHUNK_CACHE_CAPACITY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10_000);

        let session_ttl_hours: u64 = std::env::var("TRACTCORE_SESSION_TTL_HOURS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(24);

        let visit_ttl_hours: u64 = std::env::var("TRACTCORE_VISIT_TTL_HOURS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(2);

        let fingerprint_idle_ttl_days: u64 = std::env::var("TRACTCORE_FINGERPRINT_IDLE_TTL_DAYS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);

        let cleanup_tick_secs: u64 = std::env::var("TRACTCORE_CLEANUP_TICK_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60);

        let repository_deadline_secs: u64 = std::env::var("TRACTCORE_REPOSITORY_DEADLINE_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);

        let rate_limit_max_requests = std::env::var("TRACTCORE_RATE_LIMIT_MAX_REQUESTS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(100);

        let rate_limit_window_secs = std::env::var("TRACTCORE_RATE_LIMIT_WINDOW_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60);

        let rate_limit_burst = std::env::var("TRACTCORE_RATE_LIMIT_BURST")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(20);

        Ok(Self {
            bind_addr,
            port,
            database_path,
            jwt_secret,
            sse_channel_capacity,
            html_chunk_cache_capacity,
            session_ttl: Duration::from_secs(session_ttl_hours * 3600),
            visit_ttl: Duration::from_secs(visit_ttl_hours * 3600),
            fingerprint_idle_ttl: Duration::from_secs(fingerprint_idle_ttl_days * 86400),
            cleanup_tick: Duration::from_secs(cleanup_tick_secs),
            repository_deadline: Duration::from_secs(repository_deadline_secs),
            rate_limit_max_requests,
            rate_limit_window_secs,
            rate_limit_burst,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 8787,
            database_path: "./tractcore.db".to_string(),
            jwt_secret: "dev-secret-change-in-production-minimum-32-characters".to_string(),
            sse_channel_capacity: 32,
            html_chunk_cache_capacity: 10_000,
            session_ttl: Duration::from_secs(24 * 3600),
            visit_ttl: Duration::from_secs(2 * 3600),
            fingerprint_idle_ttl: Duration::from_secs(30 * 86400),
            cleanup_tick: Duration::from_secs(60),
            repository_deadline: Duration::from_secs(5),
            rate_limit_max_requests: 100,
            rate_limit_window_secs: 60,
            rate_limit_burst: 20,
        }
    }
}
