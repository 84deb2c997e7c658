use std::env;
use std::path::PathBuf;

use anyhow::{bail, Context};
use tracing::{info, warn};

use crate::rate_limit::RateLimitConfig;

pub const MIN_JWT_SECRET_LEN: usize = 32;

/// Process configuration read from the environment at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub frontend_url: String,
    pub database_url: Option<String>,
    pub data_dir: PathBuf,
    pub enable_hsts: bool,
    pub admin_usernames: Vec<String>,
    pub rate_limit_enabled: bool,
    pub rate_limits: RateLimitConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let secret = env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        if secret.len() < MIN_JWT_SECRET_LEN {
            bail!("JWT_SECRET must be at least {MIN_JWT_SECRET_LEN} characters long");
        }

        let cfg = Self {
            bind_addr: var_or("BIND_ADDR", "0.0.0.0:8080"),
            frontend_url: var_or("FRONTEND_URL", "http://localhost:5173"),
            database_url: env::var("DATABASE_URL").ok(),
            data_dir: PathBuf::from(var_or("ASKBOARD_DATA_DIR", "data")),
            enable_hsts: flag("ENABLE_HSTS", false),
            admin_usernames: list("BOOTSTRAP_ADMIN_USERNAMES"),
            rate_limit_enabled: flag("RATE_LIMIT_ENABLED", true),
            rate_limits: RateLimitConfig::from_env(),
        };
        if cfg.admin_usernames.is_empty() {
            warn!("BOOTSTRAP_ADMIN_USERNAMES is empty; nobody can moderate content");
        }
        Ok(cfg)
    }
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    })
}

pub(crate) fn flag(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

fn list(key: &str) -> Vec<String> {
    env::var(key)
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
