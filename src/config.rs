use std::path::Path;
use std::time::Duration;

use anyhow::Context;

use crate::error::{Result, TrackerError};
use crate::models::MAX_WINDOW_DAYS;

pub const DEFAULT_API_BASE: &str = "https://api.github.com";
const DEFAULT_TIMEOUT: Duration = Duration::from_millis(45_000);
const DEFAULT_PAGE_SIZE: u32 = 100;
const DEFAULT_SYNC_WINDOW_DAYS: i64 = 30;
const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub github_api_base: String,
    pub github_token: Option<String>,
    pub request_timeout: Duration,
    pub page_size: u32,
    pub sync_window_days: i64,
    pub sync_interval: Duration,
    pub auto_sync: bool,
    pub admin_token: Option<String>,
    pub db_transactions: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            github_api_base: DEFAULT_API_BASE.to_string(),
            github_token: None,
            request_timeout: DEFAULT_TIMEOUT,
            page_size: DEFAULT_PAGE_SIZE,
            sync_window_days: DEFAULT_SYNC_WINDOW_DAYS,
            sync_interval: DEFAULT_SYNC_INTERVAL,
            auto_sync: false,
            admin_token: None,
            db_transactions: true,
        }
    }
}

fn positive_u64(raw: &str) -> Option<u64> {
    raw.trim().parse::<u64>().ok().filter(|v| *v > 0)
}

fn non_empty(raw: String) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

impl Config {
    pub fn load<F>(path: Option<&Path>, env: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(path) = path {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            config.apply_toml(&raw)?;
        }

        config.apply_env(env);
        Ok(config)
    }

    fn apply_toml(&mut self, raw: &str) -> anyhow::Result<()> {
        let v: toml::Value = toml::from_str(raw).context("invalid TOML config")?;

        if let Some(url) = v.get("database_url").and_then(|x| x.as_str()) {
            self.database_url = non_empty(url.to_string());
        }
        if let Some(base) = v.get("github_api_base").and_then(|x| x.as_str()) {
            self.github_api_base = base.trim_end_matches('/').to_string();
        }
        if let Some(token) = v.get("github_token").and_then(|x| x.as_str()) {
            self.github_token = non_empty(token.to_string());
        }
        if let Some(ms) = v.get("request_timeout_ms").and_then(|x| x.as_integer()) {
            if ms > 0 {
                self.request_timeout = Duration::from_millis(ms as u64);
            }
        }
        if let Some(size) = v.get("page_size").and_then(|x| x.as_integer()) {
            if (1..=100).contains(&size) {
                self.page_size = size as u32;
            }
        }
        if let Some(days) = v.get("sync_window_days").and_then(|x| x.as_integer()) {
            if days > 0 {
                self.sync_window_days = days.min(MAX_WINDOW_DAYS);
            }
        }
        if let Some(secs) = v.get("sync_interval_secs").and_then(|x| x.as_integer()) {
            if secs > 0 {
                self.sync_interval = Duration::from_secs(secs as u64);
            }
        }
        if let Some(enabled) = v.get("auto_sync").and_then(|x| x.as_bool()) {
            self.auto_sync = enabled;
        }
        if let Some(token) = v.get("admin_token").and_then(|x| x.as_str()) {
            self.admin_token = non_empty(token.to_string());
        }
        if let Some(enabled) = v.get("db_transactions").and_then(|x| x.as_bool()) {
            self.db_transactions = enabled;
        }
        Ok(())
    }

    fn apply_env<F>(&mut self, env: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = env("DATABASE_URL").and_then(non_empty) {
            self.database_url = Some(url);
        }
        if let Some(base) = env("GITHUB_API_BASE").and_then(non_empty) {
            self.github_api_base = base.trim_end_matches('/').to_string();
        }
        if let Some(token) = env("GITHUB_TOKEN").and_then(non_empty) {
            self.github_token = Some(token);
        }
        if let Some(ms) = env("GITHUB_TIMEOUT_MS").as_deref().and_then(positive_u64) {
            self.request_timeout = Duration::from_millis(ms);
        }
        if let Some(days) = env("SYNC_WINDOW_DAYS").as_deref().and_then(positive_u64) {
            self.sync_window_days = days.min(MAX_WINDOW_DAYS as u64) as i64;
        }
        if let Some(secs) = env("SYNC_INTERVAL_SECS").as_deref().and_then(positive_u64) {
            self.sync_interval = Duration::from_secs(secs);
        }
        if let Some(flag) = env("ENABLE_AUTO_SYNC") {
            self.auto_sync = flag.trim().eq_ignore_ascii_case("true");
        }
        if let Some(token) = env("ADMIN_TOKEN").and_then(non_empty) {
            self.admin_token = Some(token);
        }
        if let Some(flag) = env("DB_TRANSACTIONS") {
            self.db_transactions = !flag.trim().eq_ignore_ascii_case("false");
        }
    }

    pub fn authorize(&self, presented: Option<&str>) -> Result<()> {
        match &self.admin_token {
            None => Ok(()),
            Some(expected) if presented.map(str::trim) == Some(expected.as_str()) => Ok(()),
            Some(_) => Err(TrackerError::Unauthorized),
        }
    }
}
