use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CACHE_CONTROL, PRAGMA, USER_AGENT};

use crate::config::Config;

pub const MAX_ATTEMPTS: u32 = 3;
pub const BACKOFF_STEP: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("GET {url} failed")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("GET {url}: still rate limited after {attempts} attempts")]
    RateLimited { url: String, attempts: u32 },
    #[error("GET {url}: HTTP {status}")]
    Http { url: String, status: u16 },
}

#[async_trait::async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait::async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// HTTP GET with rate-limit backoff. Pacing between independent fetches is the caller's job.
#[derive(Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    user_agent: String,
    sleeper: Arc<dyn Sleeper>,
}

impl Fetcher {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("build http client")?;

        Ok(Self {
            client,
            user_agent: config.user_agent.clone(),
            sleeper: Arc::new(TokioSleeper),
        })
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn sleeper(&self) -> &Arc<dyn Sleeper> {
        &self.sleeper
    }

    pub async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        self.get_with_backoff(url, false).await
    }

    /// Like [`Fetcher::fetch`], but defeats intermediary caches with no-cache headers and a
    /// `t=<unix seconds>` query parameter.
    pub async fn fetch_fresh(&self, url: &str) -> Result<String, FetchError> {
        self.get_with_backoff(url, true).await
    }

    async fn get_with_backoff(&self, url: &str, fresh: bool) -> Result<String, FetchError> {
        for attempt in 1..=MAX_ATTEMPTS {
            let response = self
                .request(url, fresh)
                .send()
                .await
                .map_err(|source| FetchError::Network {
                    url: url.to_owned(),
                    source,
                })?;

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                if attempt == MAX_ATTEMPTS {
                    break;
                }
                let wait = BACKOFF_STEP * attempt;
                tracing::warn!(url, attempt, wait_secs = wait.as_secs(), "rate limited; backing off");
                self.sleeper.sleep(wait).await;
                continue;
            }

            if !status.is_success() {
                return Err(FetchError::Http {
                    url: url.to_owned(),
                    status: status.as_u16(),
                });
            }

            return response.text().await.map_err(|source| FetchError::Network {
                url: url.to_owned(),
                source,
            });
        }

        Err(FetchError::RateLimited {
            url: url.to_owned(),
            attempts: MAX_ATTEMPTS,
        })
    }

    fn request(&self, url: &str, fresh: bool) -> reqwest::RequestBuilder {
        let request = self
            .client
            .get(url)
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT, "text/html,application/xhtml+xml;q=0.9,*/*;q=0.8");
        if !fresh {
            return request;
        }

        request
            .header(CACHE_CONTROL, "no-cache")
            .header(PRAGMA, "no-cache")
            .query(&[("t", chrono::Utc::now().timestamp())])
    }
}
