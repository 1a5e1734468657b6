use crate::http::RelayConfig;
use crate::session::SessionConfig;
use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub nats: NatsConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub relay: RelayConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Deserialize)]
pub struct NatsConfig {
    pub url: String,
    /// Session subjects are `{subject_prefix}.{session_id}`
    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,
}

fn default_subject_prefix() -> String {
    "meetings.sync".to_string()
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()
            .with_context(|| format!("Failed to read config from {}", path))?;

        settings
            .try_deserialize()
            .context("Failed to parse config")
    }

    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.service.http.bind, self.service.http.port)
    }
}
