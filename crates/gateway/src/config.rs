// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

/// Configuration for the gateway, resolved from flags and environment.
#[derive(Debug, Clone, clap::Args)]
pub struct GatewayConfig {
    /// Port to listen on.
    #[arg(long, default_value_t = 8000, env = "PORT")]
    pub port: u16,

    /// Hue Bridge host or IP (no scheme). May also be set at runtime via
    /// `bridge.set_host`, which persists it in the gateway store.
    #[arg(long, env = "HUE_BRIDGE_HOST")]
    pub bridge_host: Option<String>,

    /// Hue application key. May also be created via `bridge.pair`.
    #[arg(long, env = "HUE_APPLICATION_KEY")]
    pub application_key: Option<String>,

    /// Comma-separated bearer tokens accepted by the gateway.
    #[arg(long, env = "GATEWAY_AUTH_TOKENS", value_delimiter = ',')]
    pub auth_tokens: Vec<String>,

    /// Comma-separated API keys accepted via `X-API-Key`.
    #[arg(long, env = "GATEWAY_API_KEYS", value_delimiter = ',')]
    pub api_keys: Vec<String>,

    /// Full inventory resync interval in seconds.
    #[arg(long, default_value_t = 300, env = "CACHE_RESYNC_SECONDS")]
    pub cache_resync_seconds: u64,

    /// Minimum similarity for a confident single match.
    #[arg(long, default_value_t = 0.90, env = "FUZZY_MATCH_THRESHOLD")]
    pub fuzzy_match_threshold: f64,

    /// Similarity at which the best match wins outright.
    #[arg(long, default_value_t = 0.95, env = "FUZZY_MATCH_AUTOPICK_THRESHOLD")]
    pub fuzzy_match_autopick_threshold: f64,

    /// Required gap between the best and second-best match.
    #[arg(long, default_value_t = 0.05, env = "FUZZY_MATCH_MARGIN")]
    pub fuzzy_match_margin: f64,

    /// Token refill rate per credential, per second.
    #[arg(long, default_value_t = 5.0, env = "RATE_LIMIT_RPS")]
    pub rate_limit_rps: f64,

    /// Token bucket capacity per credential.
    #[arg(long, default_value_t = 10, env = "RATE_LIMIT_BURST")]
    pub rate_limit_burst: u32,

    /// Max attempts for retryable bridge requests.
    #[arg(long, default_value_t = 3, env = "RETRY_MAX_ATTEMPTS")]
    pub retry_max_attempts: u32,

    /// Base delay for retry backoff, in milliseconds.
    #[arg(long, default_value_t = 200, env = "RETRY_BASE_DELAY_MS")]
    pub retry_base_delay_ms: u64,

    /// SQLite database path. Defaults to /data/hue-gateway.db when /data is
    /// writable, else <cwd>/.data/hue-gateway.db.
    #[arg(long, env = "DB_PATH")]
    pub db_path: Option<PathBuf>,
}

impl GatewayConfig {
    pub fn resync_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.cache_resync_seconds)
    }

    /// Trim credential lists and drop empty entries left by trailing commas.
    pub fn sanitize_credentials(&mut self) {
        for list in [&mut self.auth_tokens, &mut self.api_keys] {
            *list = list
                .iter()
                .map(|item| item.trim().to_owned())
                .filter(|item| !item.is_empty())
                .collect();
        }
    }

    /// Resolve the effective database path.
    pub fn resolved_db_path(&self) -> PathBuf {
        if let Some(ref path) = self.db_path {
            return path.clone();
        }
        let preferred = std::path::Path::new("/data");
        if preferred.is_dir() && dir_is_writable(preferred) {
            return preferred.join("hue-gateway.db");
        }
        std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")).join(".data/hue-gateway.db")
    }
}

fn dir_is_writable(dir: &std::path::Path) -> bool {
    let probe = dir.join(".hue-gateway-write-probe");
    match std::fs::OpenOptions::new().create(true).append(true).open(&probe) {
        Ok(_) => {
            let _ = std::fs::remove_file(&probe);
            true
        }
        Err(_) => false,
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
