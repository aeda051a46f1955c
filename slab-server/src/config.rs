//! Server configuration, loaded from environment variables at startup
//! (SPEC_FULL.md §10.3).

/// Runtime configuration for slab-server.
///
/// Every field has a sensible default so the server works out-of-the-box
/// without any environment variables set.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default: `"0.0.0.0:3000"`).
    pub bind_address: String,

    /// Path prefix under which every inference and admin route is nested
    /// (`<p>` throughout SPEC_FULL.md), e.g. `<p>/v1/chat/completions`.
    pub inference_prefix: String,

    /// Slot pool size: the maximum number of runners alive at once.
    pub slot_pool_size: usize,

    /// Name of the backend used when a route omits `{backend}`.
    pub default_backend: String,

    /// Keep-alive applied when a configure request doesn't specify one.
    pub default_keep_alive: String,

    /// Maximum accepted request body size, in bytes.
    pub max_body_bytes: usize,

    /// Directory holding per-slot UDS socket files.
    pub uds_dir: std::path::PathBuf,

    /// First loopback TCP port handed to a `UsesTCP` backend's slot 0;
    /// subsequent slots use consecutive ports.
    pub tcp_base_port: u16,

    /// Number of recent request/response records the recorder retains.
    pub recorder_capacity: usize,

    /// Root directory the filesystem model manager scans for model files.
    pub models_dir: std::path::PathBuf,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    /// Comma-separated list of allowed CORS origins, e.g.
    /// `"https://app.example.com,https://admin.example.com"`.
    /// When `None` (default), all origins are allowed.
    pub cors_allowed_origins: Option<String>,
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            bind_address: env_or("SLAB_BIND", "0.0.0.0:3000"),
            inference_prefix: env_or("SLAB_INFERENCE_PREFIX", "/engines"),
            slot_pool_size: parse_env("SLAB_SLOT_POOL_SIZE", 4usize),
            default_backend: env_or("SLAB_DEFAULT_BACKEND", "llama-cpp"),
            default_keep_alive: env_or("SLAB_DEFAULT_KEEP_ALIVE", "5m"),
            max_body_bytes: parse_env("SLAB_MAX_BODY_BYTES", 10 * 1024 * 1024usize),
            uds_dir: std::path::PathBuf::from(env_or("SLAB_UDS_DIR", "/tmp/slab-runners")),
            tcp_base_port: parse_env("SLAB_TCP_BASE_PORT", 18_100u16),
            recorder_capacity: parse_env("SLAB_RECORDER_CAPACITY", 200usize),
            models_dir: std::path::PathBuf::from(env_or(
                "SLAB_MODELS_DIR",
                "/var/lib/slab/models",
            )),
            log_level: env_or("SLAB_LOG", "info"),
            log_json: std::env::var("SLAB_LOG_JSON")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            cors_allowed_origins: std::env::var("SLAB_CORS_ORIGINS").ok(),
        }
    }

    /// Parse [`Config::default_keep_alive`], falling back to the component
    /// default (5 minutes) if the configured string doesn't parse.
    pub fn default_keep_alive(&self) -> slab_core::KeepAlive {
        slab_core::KeepAlive::parse(&self.default_keep_alive).unwrap_or_default()
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane_with_no_env() {
        // Can't safely mutate process env in parallel tests; just check the
        // struct builds and the keep-alive default parses.
        let cfg = Config {
            bind_address: "0.0.0.0:3000".to_owned(),
            inference_prefix: "/engines".to_owned(),
            slot_pool_size: 4,
            default_backend: "llama-cpp".to_owned(),
            default_keep_alive: "5m".to_owned(),
            max_body_bytes: 10 * 1024 * 1024,
            uds_dir: "/tmp/slab-runners".into(),
            tcp_base_port: 18_100,
            recorder_capacity: 200,
            models_dir: "/var/lib/slab/models".into(),
            log_level: "info".to_owned(),
            log_json: false,
            cors_allowed_origins: None,
        };
        assert_eq!(
            cfg.default_keep_alive(),
            slab_core::KeepAlive::After(std::time::Duration::from_secs(300))
        );
    }
}
