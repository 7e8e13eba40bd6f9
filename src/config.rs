//! Engine configuration.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::store::Page;

/// Configuration value could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid value for {var}: '{value}' ({reason})")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub reason: String,
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Deployment namespace; prefixes the job topic.
    pub namespace: String,
    /// Number of FireTask workers.
    pub fire_workers: usize,
    /// Maximum queued FireTasks.
    pub fire_queue_capacity: usize,
    /// Deadline for a single FireTask.
    pub fire_timeout: Duration,
    /// Page size when the caller does not ask for one.
    pub default_page_size: usize,
    /// Upper bound on any requested page size.
    pub max_page_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            namespace: "kyroalert".to_string(),
            fire_workers: 4,
            fire_queue_capacity: 1024,
            fire_timeout: Duration::from_secs(10),
            default_page_size: 20,
            max_page_size: 1000,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                         | Default     |
    /// |---------------------------------|-------------|
    /// | `KYROALERT_NAMESPACE`           | `kyroalert` |
    /// | `KYROALERT_FIRE_WORKERS`        | `4`         |
    /// | `KYROALERT_FIRE_QUEUE_CAPACITY` | `1024`      |
    /// | `KYROALERT_FIRE_TIMEOUT_MS`     | `10000`     |
    /// | `KYROALERT_PAGE_SIZE`           | `20`        |
    /// | `KYROALERT_MAX_PAGE_SIZE`       | `1000`      |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Self::from_env`] with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let namespace = match lookup("KYROALERT_NAMESPACE") {
            Some(ns) if ns.trim().is_empty() => {
                return Err(ConfigError {
                    var: "KYROALERT_NAMESPACE",
                    value: ns,
                    reason: "must not be empty".to_string(),
                })
            }
            Some(ns) => ns.trim().to_string(),
            None => defaults.namespace,
        };

        let fire_workers = parse_var(&lookup, "KYROALERT_FIRE_WORKERS", defaults.fire_workers)?;
        let fire_queue_capacity = parse_var(
            &lookup,
            "KYROALERT_FIRE_QUEUE_CAPACITY",
            defaults.fire_queue_capacity,
        )?;
        let fire_timeout_ms = parse_var(
            &lookup,
            "KYROALERT_FIRE_TIMEOUT_MS",
            u64::try_from(defaults.fire_timeout.as_millis()).unwrap_or(u64::MAX),
        )?;
        let default_page_size = parse_var(&lookup, "KYROALERT_PAGE_SIZE", defaults.default_page_size)?;
        let max_page_size = parse_var(&lookup, "KYROALERT_MAX_PAGE_SIZE", defaults.max_page_size)?;

        for (var, value) in [
            ("KYROALERT_FIRE_WORKERS", fire_workers),
            ("KYROALERT_FIRE_QUEUE_CAPACITY", fire_queue_capacity),
            ("KYROALERT_PAGE_SIZE", default_page_size),
            ("KYROALERT_MAX_PAGE_SIZE", max_page_size),
        ] {
            if value == 0 {
                return Err(ConfigError {
                    var,
                    value: value.to_string(),
                    reason: "must be positive".to_string(),
                });
            }
        }
        if fire_timeout_ms == 0 {
            return Err(ConfigError {
                var: "KYROALERT_FIRE_TIMEOUT_MS",
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }

        Ok(Self {
            namespace,
            fire_workers,
            fire_queue_capacity,
            fire_timeout: Duration::from_millis(fire_timeout_ms),
            default_page_size: default_page_size.min(max_page_size),
            max_page_size,
        })
    }

    /// Page from optional request parameters, clamped to `max_page_size`.
    #[must_use]
    pub fn page(&self, from: Option<usize>, size: Option<usize>) -> Page {
        Page::new(from.unwrap_or(0), size.unwrap_or(self.default_page_size)).clamped(self.max_page_size)
    }

    /// JobQueue topic for instantiated jobs.
    #[must_use]
    pub fn job_topic(&self) -> String {
        format!("{}.job-requests", self.namespace)
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError {
            var,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}
