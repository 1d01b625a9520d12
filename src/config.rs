use crate::error::AppError;
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Pub/Sub channel shared by every relay instance in the same chat fabric.
pub const DEFAULT_CHAT_CHANNEL: &str = "chats";

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub redis_url: String,
    pub chat_channel: String,
    pub shutdown_timeout_secs: u64,
    pub http_workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8081,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            chat_channel: DEFAULT_CHAT_CHANNEL.to_string(),
            shutdown_timeout_secs: 10,
            http_workers: 2,
        }
    }
}

impl Config {
    fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T, AppError> {
        match env::var(name) {
            Ok(raw) => raw
                .trim()
                .parse()
                .map_err(|_| AppError::Config(format!("{name} has an invalid value: {raw}"))),
            Err(_) => Ok(default),
        }
    }

    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();
        let defaults = Self::default();

        let host = env::var("HOST").unwrap_or(defaults.host);
        let port = Self::parse_var("PORT", defaults.port)?;
        let redis_url = env::var("REDIS_URL").unwrap_or(defaults.redis_url);
        let chat_channel = env::var("CHAT_CHANNEL")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.chat_channel);
        let shutdown_timeout_secs =
            Self::parse_var("SHUTDOWN_TIMEOUT_SECS", defaults.shutdown_timeout_secs)?;
        let http_workers = Self::parse_var("HTTP_WORKERS", defaults.http_workers)?;

        if http_workers == 0 {
            return Err(AppError::Config("HTTP_WORKERS must be at least 1".into()));
        }

        Ok(Self {
            host,
            port,
            redis_url,
            chat_channel,
            shutdown_timeout_secs,
            http_workers,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
