//! Control-plane settings, loaded once at startup from the env-var surface
//! in spec.md §6.4.

use thiserror::Error;

/// Failure to build a [`Config`] from the process environment.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

/// Sentinel value meaning "disabled" for the idle/lifetime reap thresholds.
pub const DISABLED: i64 = -1;

/// Closed set of recognized settings (spec.md §6.4).
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub control_plane_url: String,
    pub internal_api_token: String,
    pub default_timeout_secs: u32,
    pub max_timeout_secs: u32,
    pub idle_threshold_minutes: i64,
    pub max_lifetime_hours: i64,
    pub cleanup_interval_secs: u64,
    pub disable_bwrap: bool,
    pub workspace_path: String,
    pub executor_port: u16,
    pub backend_selector: BackendSelector,
    pub log_level: String,
}

/// The two Backend Adapter Port implementations selectable at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendSelector {
    Local,
    Cluster,
}

impl Config {
    /// Load settings from the process environment, applying the defaults
    /// documented in spec.md §6.4 for everything but `DATABASE_URL` and
    /// `INTERNAL_API_TOKEN`, which are required.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = required("DATABASE_URL")?;
        let internal_api_token = required("INTERNAL_API_TOKEN")?;

        let control_plane_url = std::env::var("CONTROL_PLANE_URL")
            .unwrap_or_else(|_| "http://localhost:8080".to_string());

        let default_timeout_secs = parse_env("DEFAULT_TIMEOUT", 300)?;
        let max_timeout_secs = parse_env("MAX_TIMEOUT", 3600)?;
        let idle_threshold_minutes = parse_env("IDLE_THRESHOLD_MINUTES", 30)?;
        let max_lifetime_hours = parse_env("MAX_LIFETIME_HOURS", 6)?;
        let cleanup_interval_secs = parse_env("CLEANUP_INTERVAL_SECONDS", 300)?;

        let disable_bwrap = std::env::var("DISABLE_BWRAP")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(cfg!(debug_assertions));

        let workspace_path =
            std::env::var("WORKSPACE_PATH").unwrap_or_else(|_| "/workspace".to_string());
        let executor_port = parse_env("EXECUTOR_PORT", 8900u16)?;

        let backend_selector = match std::env::var("BACKEND_SELECTOR")
            .unwrap_or_else(|_| "local".to_string())
            .to_lowercase()
            .as_str()
        {
            "local" => BackendSelector::Local,
            "cluster" => BackendSelector::Cluster,
            other => {
                return Err(ConfigError::InvalidValue {
                    name: "BACKEND_SELECTOR",
                    value: other.to_string(),
                });
            }
        };

        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            database_url,
            control_plane_url,
            internal_api_token,
            default_timeout_secs,
            max_timeout_secs,
            idle_threshold_minutes,
            max_lifetime_hours,
            cleanup_interval_secs,
            disable_bwrap,
            workspace_path,
            executor_port,
            backend_selector,
            log_level,
        })
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnvVar(name))
}

fn parse_env<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    match std::env::var(name) {
        Ok(v) => v.parse().map_err(|_| ConfigError::InvalidValue {
            name,
            value: v,
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Records the prior value of each env var it touches and restores it on drop.
    struct EnvGuard {
        saved: Vec<(&'static str, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            Self { saved: Vec::new() }
        }

        fn set(&mut self, key: &'static str, value: &str) {
            self.saved.push((key, std::env::var(key).ok()));
            // SAFETY: serialized by ENV_MUTEX; no other thread touches these vars concurrently.
            unsafe { std::env::set_var(key, value) };
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.saved.drain(..) {
                match value {
                    // SAFETY: serialized by ENV_MUTEX.
                    Some(v) => unsafe { std::env::set_var(key, v) },
                    // SAFETY: serialized by ENV_MUTEX.
                    None => unsafe { std::env::remove_var(key) },
                }
            }
        }
    }

    #[test]
    fn missing_database_url_is_an_error() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.set("INTERNAL_API_TOKEN", "tok");
        // SAFETY: serialized by ENV_MUTEX.
        unsafe { std::env::remove_var("DATABASE_URL") };

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar("DATABASE_URL")));
    }

    #[test]
    fn defaults_apply_when_unset() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.set("DATABASE_URL", "postgres://localhost/test");
        guard.set("INTERNAL_API_TOKEN", "tok");
        // SAFETY: serialized by ENV_MUTEX.
        unsafe { std::env::remove_var("IDLE_THRESHOLD_MINUTES") };

        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.idle_threshold_minutes, 30);
        assert_eq!(cfg.default_timeout_secs, 300);
        assert_eq!(cfg.backend_selector, BackendSelector::Local);
    }

    #[test]
    fn disabled_sentinel_parses_as_negative_one() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.set("DATABASE_URL", "postgres://localhost/test");
        guard.set("INTERNAL_API_TOKEN", "tok");
        guard.set("IDLE_THRESHOLD_MINUTES", "-1");

        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.idle_threshold_minutes, DISABLED);
    }
}
