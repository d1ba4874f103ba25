use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub port: u16,
    pub workflows_dir: String,
    pub platforms_file: String,
    pub audit_output_root: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            workflows_dir: env::var("WORKFLOWS_DIR").unwrap_or_else(|_| "workflows".to_string()),
            platforms_file: env::var("PLATFORMS_FILE")
                .unwrap_or_else(|_| "platforms.yaml".to_string()),
            audit_output_root: env::var("AUDIT_OUTPUT_ROOT")
                .unwrap_or_else(|_| "logs/audit".to_string()),
        })
    }
}
