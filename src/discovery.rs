use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::config::Config;
use crate::fetch::{FetchError, Fetcher};

/// `dbd-MM-DD-YYYY-subject`, as used in post URLs.
const SLUG_PATTERN: &str = r"dbd-\d{2}-\d{2}-(\d{4})-";

static ARCHIVE_SLUG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r#"/p/({SLUG_PATTERN}[^"'/?#<\s]+)"#)).expect("valid archive slug regex")
});
// Groups: 1 = authority, 2 = slug.
static SITEMAP_LOC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"https?://([^/<\s]+)/p/({SLUG_PATTERN}[^<\s]+)"))
        .expect("valid sitemap loc regex")
});
static SLUG_YEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!("^{SLUG_PATTERN}")).expect("valid slug year regex"));

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("fetch sitemap")]
    Sitemap(#[source] FetchError),
    #[error("fetch archive")]
    Archive(#[source] FetchError),
    #[error("invalid base url: {0}")]
    BaseUrl(String),
}

pub struct Discovery<'a> {
    config: &'a Config,
    fetcher: &'a Fetcher,
}

impl<'a> Discovery<'a> {
    pub fn new(config: &'a Config, fetcher: &'a Fetcher) -> Self {
        Self { config, fetcher }
    }

    /// All recurring-post slugs in the sitemap, deduplicated and sorted.
    pub async fn list_slugs(&self) -> Result<Vec<String>, DiscoveryError> {
        let authority = self
            .config
            .authority()
            .map_err(|err| DiscoveryError::BaseUrl(format!("{err:#}")))?;
        let sitemap_url = self.config.sitemap_url();
        tracing::debug!(url = %sitemap_url, "fetching sitemap");
        let sitemap = self
            .fetcher
            .fetch(&sitemap_url)
            .await
            .map_err(DiscoveryError::Sitemap)?;
        Ok(slugs_from_sitemap(&sitemap, &authority))
    }

    pub async fn list_slugs_for_year(&self, year: i32) -> Result<Vec<String>, DiscoveryError> {
        let slugs = self.list_slugs().await?;
        Ok(filter_year(slugs, year))
    }

    /// The most recent slug on the archive listing, which is ordered newest-first.
    pub async fn latest_slug(&self) -> Result<Option<String>, DiscoveryError> {
        let archive = self
            .fetcher
            .fetch(&self.config.archive_url())
            .await
            .map_err(DiscoveryError::Archive)?;
        Ok(latest_from_archive(&archive))
    }
}

/// Slugs of `<loc>` entries on `authority` (`host[:port]`, case-insensitive).
pub fn slugs_from_sitemap(sitemap: &str, authority: &str) -> Vec<String> {
    SITEMAP_LOC_RE
        .captures_iter(sitemap)
        .filter(|caps| {
            caps.get(1)
                .is_some_and(|host| host.as_str().eq_ignore_ascii_case(authority))
        })
        .filter_map(|caps| caps.get(2))
        .map(|m| m.as_str().to_owned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub fn latest_from_archive(archive_html: &str) -> Option<String> {
    ARCHIVE_SLUG_RE
        .captures(archive_html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_owned())
}

pub fn slug_year(slug: &str) -> Option<i32> {
    SLUG_YEAR_RE
        .captures(slug)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

pub fn filter_year(slugs: Vec<String>, year: i32) -> Vec<String> {
    slugs
        .into_iter()
        .filter(|slug| slug_year(slug) == Some(year))
        .collect()
}
