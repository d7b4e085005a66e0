use crate::error::AppError;
use serde::Deserialize;

/// Common configuration shared by every service.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    8080
}

impl Config {
    pub fn load() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let port = match std::env::var("APP_PORT") {
            Ok(raw) => raw.parse().map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!("Invalid APP_PORT '{}': {}", raw, e))
            })?,
            Err(_) => default_port(),
        };

        Ok(Self { port })
    }
}
