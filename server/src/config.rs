use anyhow::{Context, Result};
use registry::{DEFAULT_DEBOUNCE, DEFAULT_INTERVAL};
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_MASTER_URL: &str = "https://master1.ddnet.org/ddnet/15/servers.json";

/// Server settings, read from the environment at startup
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub port: u16,
    pub master_urls: Vec<String>,
    /// Largest accepted request body in bytes
    pub body_limit: usize,
    pub reconcile_debounce: Duration,
    pub reconcile_interval: Duration,
    pub fetch_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let master_urls: Vec<String> = lookup("MASTER_URLS")
            .unwrap_or_else(|| DEFAULT_MASTER_URL.to_string())
            .split(',')
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string)
            .collect();
        if master_urls.is_empty() {
            anyhow::bail!("MASTER_URLS must name at least one master server");
        }

        Ok(Self {
            port: parse(&lookup, "PORT", 8080)?,
            master_urls,
            body_limit: parse(&lookup, "BODY_LIMIT", 3 * 1024)?,
            reconcile_debounce: Duration::from_millis(parse(&lookup, "RECONCILE_DEBOUNCE_MS", millis(DEFAULT_DEBOUNCE))?),
            reconcile_interval: Duration::from_millis(parse(&lookup, "RECONCILE_INTERVAL_MS", millis(DEFAULT_INTERVAL))?),
            fetch_timeout: Duration::from_millis(parse(&lookup, "FETCH_TIMEOUT_MS", 10_000)?),
        })
    }
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

fn parse<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}: {:?}", key, value)),
        None => Ok(default),
    }
}
