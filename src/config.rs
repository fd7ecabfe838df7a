use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;

pub const DEFAULT_BASE_URL: &str = "https://writeforcalifornia.com";
pub const DEFAULT_USER_AGENT: &str = "dbd-harvest/0.1";

const DB_FILE_NAME: &str = "dbd_history.db";
const CSV_FILE_NAME: &str = "dbd_history.csv";
const MONITOR_STATE_FILE_NAME: &str = "monitor_state";

/// Local time-of-day window, `[start, end)` in hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveHours {
    pub start: u32,
    pub end: u32,
}

impl ActiveHours {
    pub fn contains(&self, hour: u32) -> bool {
        self.start <= hour && hour < self.end
    }

    pub fn parse(value: &str) -> anyhow::Result<Self> {
        let (start, end) = value
            .split_once('-')
            .ok_or_else(|| anyhow::anyhow!("active hours must look like `6-18`: {value}"))?;
        let start: u32 = start
            .trim()
            .parse()
            .with_context(|| format!("parse active hours start: {value}"))?;
        let end: u32 = end
            .trim()
            .parse()
            .with_context(|| format!("parse active hours end: {value}"))?;
        if start >= end || end > 24 {
            anyhow::bail!("active hours must satisfy start < end <= 24: {value}");
        }
        Ok(Self { start, end })
    }
}

impl Default for ActiveHours {
    fn default() -> Self {
        Self { start: 6, end: 18 }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub state_dir: PathBuf,
    pub http_timeout: Duration,
    pub user_agent: String,
    pub active_hours: ActiveHours,
    pub check_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        let home = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            state_dir: home.join(".wfc"),
            http_timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            active_hours: ActiveHours::default(),
            check_interval: Duration::from_secs(300),
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Ok(base_url) = std::env::var("DBD_HARVEST_BASE_URL") {
            config.base_url = base_url;
        }
        if let Some(state_dir) = std::env::var_os("DBD_HARVEST_STATE_DIR") {
            config.state_dir = PathBuf::from(state_dir);
        }
        if let Ok(hours) = std::env::var("DBD_HARVEST_ACTIVE_HOURS") {
            config.active_hours =
                ActiveHours::parse(&hours).context("parse DBD_HARVEST_ACTIVE_HOURS")?;
        }
        if let Ok(secs) = std::env::var("DBD_HARVEST_CHECK_INTERVAL_SECS") {
            let secs: u64 = secs
                .trim()
                .parse()
                .context("parse DBD_HARVEST_CHECK_INTERVAL_SECS")?;
            config.check_interval = Duration::from_secs(secs);
        }

        config.base_url = config.base_url.trim_end_matches('/').to_owned();
        url::Url::parse(&config.base_url)
            .with_context(|| format!("base url is not a valid url: {}", config.base_url))?;

        Ok(config)
    }

    pub fn sitemap_url(&self) -> String {
        format!("{}/sitemap.xml", self.base())
    }

    pub fn archive_url(&self) -> String {
        format!("{}/archive", self.base())
    }

    pub fn post_url(&self, slug: &str) -> String {
        format!("{}/p/{slug}", self.base())
    }

    pub fn comments_url(&self, slug: &str) -> String {
        format!("{}/comments", self.post_url(slug))
    }

    /// `host[:port]` of the base url, as it appears in sitemap `<loc>` entries.
    pub fn authority(&self) -> anyhow::Result<String> {
        let url = url::Url::parse(self.base())
            .with_context(|| format!("parse base url: {}", self.base_url))?;
        let host = url
            .host_str()
            .ok_or_else(|| anyhow::anyhow!("base url must have host: {url}"))?;
        Ok(match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_owned(),
        })
    }

    pub fn db_path(&self) -> PathBuf {
        self.state_dir.join(DB_FILE_NAME)
    }

    pub fn csv_path(&self) -> PathBuf {
        self.state_dir.join(CSV_FILE_NAME)
    }

    pub fn monitor_state_path(&self) -> PathBuf {
        self.state_dir.join(MONITOR_STATE_FILE_NAME)
    }

    pub fn ensure_state_dir(&self) -> anyhow::Result<&Path> {
        std::fs::create_dir_all(&self.state_dir)
            .with_context(|| format!("create state dir: {}", self.state_dir.display()))?;
        Ok(&self.state_dir)
    }

    fn base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}
