use chrono_tz::Tz;
use std::env;
use std::time::Duration;

/// Service configuration, read from the environment with defaults.
#[derive(Clone, Debug)]
pub struct Config {
    pub database: DatabaseConfig,
    pub poller: PollerConfig,
    pub upstream: UpstreamConfig,
    pub syncer: SyncerConfig,
    pub server: ServerConfig,
    pub timezone: String,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_open_connections: u32,
    pub min_idle_connections: u32,
    pub connection_max_lifetime: Duration,
    pub connection_max_idle_time: Duration,
}

#[derive(Clone, Debug)]
pub struct PollerConfig {
    pub concurrency: usize,
    pub window: Duration,
    pub proxy_url: Option<String>,
    pub static_error_threshold: i64,
    pub total_error_threshold: i64,
}

#[derive(Clone, Debug)]
pub struct UpstreamConfig {
    pub rate_period: Duration,
    pub rate_burst: usize,
}

#[derive(Clone, Debug)]
pub struct SyncerConfig {
    pub concurrency: usize,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub addr: String,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub idle_timeout: Duration,
    pub shutdown_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Config {
        Config {
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", ""),
                max_open_connections: get_env_parsed("DB_MAX_OPEN_CONNS", 25),
                min_idle_connections: get_env_parsed("DB_MIN_IDLE_CONNS", 5),
                connection_max_lifetime: get_env_secs("DB_CONN_MAX_LIFETIME", 300),
                connection_max_idle_time: get_env_secs("DB_CONN_MAX_IDLE_TIME", 60),
            },
            poller: PollerConfig {
                concurrency: get_env_parsed("POLLER_CONCURRENCY", 50),
                window: get_env_secs("POLLER_WINDOW", 60),
                proxy_url: env::var("PROXY_URL").ok().filter(|v| !v.is_empty()),
                static_error_threshold: get_env_parsed("POLLER_STATIC_ERROR_THRESHOLD", 10),
                total_error_threshold: get_env_parsed("POLLER_TOTAL_ERROR_THRESHOLD", 5),
            },
            upstream: UpstreamConfig {
                rate_period: get_env_secs("UPSTREAM_RATE_PERIOD", 10),
                rate_burst: get_env_parsed("UPSTREAM_RATE_BURST", 15),
            },
            syncer: SyncerConfig {
                concurrency: get_env_parsed("SYNCER_CONCURRENCY", 4),
            },
            server: ServerConfig {
                addr: get_env("SERVER_ADDR", "0.0.0.0:8080"),
                read_timeout: get_env_secs("SERVER_READ_TIMEOUT", 10),
                write_timeout: get_env_secs("SERVER_WRITE_TIMEOUT", 20),
                idle_timeout: get_env_secs("SERVER_IDLE_TIMEOUT", 60),
                shutdown_timeout: get_env_secs("SERVER_SHUTDOWN_TIMEOUT", 10),
            },
            timezone: get_env("TIMEZONE", "Asia/Kolkata"),
        }
    }

    /// Parse the configured IANA timezone. All wall-clock comparisons in the
    /// poller and expander happen in this zone.
    pub fn tz(&self) -> Result<Tz, String> {
        self.timezone.parse::<Tz>().map_err(|err| err.to_string())
    }
}

fn get_env(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(value) if !value.is_empty() => value,
        _ => default.to_string(),
    }
}

fn get_env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn get_env_secs(key: &str, default_secs: u64) -> Duration {
    Duration::from_secs(get_env_parsed(key, default_secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        // not set in the test environment, so the defaults apply
        let cfg = Config::from_env();
        assert_eq!(cfg.poller.concurrency, 50);
        assert_eq!(cfg.poller.window, Duration::from_secs(60));
        assert_eq!(cfg.poller.static_error_threshold, 10);
        assert_eq!(cfg.poller.total_error_threshold, 5);
        assert_eq!(cfg.timezone, "Asia/Kolkata");
        assert_eq!(cfg.upstream.rate_burst, 15);
    }

    #[test]
    fn timezone_parses() {
        let cfg = Config::from_env();
        let tz = cfg.tz().unwrap();
        assert_eq!(tz, chrono_tz::Asia::Kolkata);
    }
}
