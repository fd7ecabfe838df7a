use std::fmt;
use std::time::Duration;

use anyhow::Context as _;
use chrono::Datelike as _;

use crate::cli::IngestArgs;
use crate::comments::{CommenterTally, aggregate_payload, release_payload};
use crate::config::Config;
use crate::discovery::Discovery;
use crate::extract::{PostFields, extract, find_poll_id};
use crate::fetch::Fetcher;
use crate::formats::{LeaderboardRow, PostRecord};
use crate::report::{self, DateRange};
use crate::store::Store;

pub async fn run(config: &Config, args: IngestArgs) -> anyhow::Result<()> {
    config.ensure_state_dir()?;
    let db_path = config.db_path();
    let mut store =
        Store::open(&db_path).with_context(|| format!("open store: {}", db_path.display()))?;

    if let Some(limit) = args.top_commenters {
        let rows = report::top_commenters(&store, DateRange::all(), limit)
            .context("query top commenters")?;
        print_leaderboard(limit, &rows);
        return Ok(());
    }

    if !args.delay_secs.is_finite() || args.delay_secs < 0.0 {
        anyhow::bail!("--delay-secs must be a non-negative number: {}", args.delay_secs);
    }
    let options = IngestOptions {
        delay: Duration::from_secs_f64(args.delay_secs),
        skip_existing: !args.refresh,
    };
    let year = args.year.unwrap_or_else(|| chrono::Local::now().year() - 1);

    let fetcher = Fetcher::new(config)?;
    Ingestor::new(config, &fetcher, &mut store, options)
        .ingest_year(year)
        .await?;
    tracing::info!(db = %db_path.display(), "data saved");

    if args.export {
        let csv_path = config.csv_path();
        let rows = report::export_csv(&store, &csv_path)?;
        tracing::info!(rows, out = %csv_path.display(), "exported posts");
    }

    Ok(())
}

fn print_leaderboard(limit: usize, rows: &[LeaderboardRow]) {
    println!("Top {limit} commenters:");
    println!("{}", "-".repeat(50));
    for row in rows {
        println!(
            "{}: {} comments across {} posts",
            row.username, row.total_comments, row.posts_participated
        );
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IngestOptions {
    /// Politeness pause after every slug, whatever its outcome.
    pub delay: Duration,
    pub skip_existing: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(1),
            skip_existing: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Lookup,
    Fetch,
    Extract,
    Persist,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Lookup => "lookup",
            Self::Fetch => "fetch",
            Self::Extract => "extract",
            Self::Persist => "persist",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlugOutcome {
    Persisted {
        comment_count: u64,
        unique_commenters: u64,
        comments_fetched: bool,
    },
    Skipped,
    Failed {
        stage: Stage,
        cause: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub persisted: usize,
    pub skipped: usize,
    pub failed: Vec<(String, Stage)>,
}

impl IngestReport {
    fn record(&mut self, slug: &str, outcome: &SlugOutcome) {
        match outcome {
            SlugOutcome::Persisted { .. } => self.persisted += 1,
            SlugOutcome::Skipped => self.skipped += 1,
            SlugOutcome::Failed { stage, .. } => self.failed.push((slug.to_owned(), *stage)),
        }
    }
}

/// Drives discovery, per-post scraping and persistence, one slug at a time.
pub struct Ingestor<'a> {
    config: &'a Config,
    fetcher: &'a Fetcher,
    store: &'a mut Store,
    options: IngestOptions,
}

impl<'a> Ingestor<'a> {
    pub fn new(
        config: &'a Config,
        fetcher: &'a Fetcher,
        store: &'a mut Store,
        options: IngestOptions,
    ) -> Self {
        Self {
            config,
            fetcher,
            store,
            options,
        }
    }

    /// Discovery failure aborts the run; every later failure is per slug.
    pub async fn ingest_year(&mut self, year: i32) -> anyhow::Result<IngestReport> {
        let slugs = Discovery::new(self.config, self.fetcher)
            .list_slugs_for_year(year)
            .await
            .with_context(|| format!("discover posts for {year}"))?;
        tracing::info!(year, posts = slugs.len(), "discovered posts");

        Ok(self.ingest_slugs(&slugs).await)
    }

    pub async fn ingest_slugs(&mut self, slugs: &[String]) -> IngestReport {
        let total = slugs.len();
        let mut report = IngestReport::default();

        for (index, slug) in slugs.iter().enumerate() {
            let position = index + 1;
            let outcome = self.ingest_slug(slug).await;
            match &outcome {
                SlugOutcome::Persisted {
                    comment_count,
                    unique_commenters,
                    comments_fetched,
                } => tracing::info!(
                    %slug,
                    comment_count,
                    unique_commenters,
                    comments_fetched,
                    "[{position}/{total}] persisted"
                ),
                SlugOutcome::Skipped => {
                    tracing::info!(%slug, "[{position}/{total}] skipped (already ingested)")
                }
                SlugOutcome::Failed { stage, cause } => {
                    tracing::warn!(%slug, %stage, %cause, "[{position}/{total}] failed")
                }
            }
            report.record(slug, &outcome);

            self.fetcher.sleeper().sleep(self.options.delay).await;
        }

        tracing::info!(
            persisted = report.persisted,
            skipped = report.skipped,
            failed = report.failed.len(),
            "ingestion finished"
        );
        report
    }

    pub async fn ingest_slug(&mut self, slug: &str) -> SlugOutcome {
        if self.options.skip_existing {
            match self.store.is_ingested(slug) {
                Ok(true) => return SlugOutcome::Skipped,
                Ok(false) => {}
                Err(err) => return failed(Stage::Lookup, &err),
            }
        }

        let html = match self.fetcher.fetch(&self.config.post_url(slug)).await {
            Ok(html) => html,
            Err(err) => return failed(Stage::Fetch, &err),
        };

        let fields = match extract(&html) {
            Ok(Some(payload)) => PostFields::from_payload(&payload),
            Ok(None) => {
                tracing::warn!(%slug, "post page carries no payload; recording empty fields");
                PostFields::default()
            }
            Err(err) => return failed(Stage::Extract, &err),
        };

        let (commenters, comments_fetched) = match self.fetch_commenters(slug).await {
            Ok(tally) => (tally, true),
            Err(err) => {
                tracing::warn!(
                    %slug,
                    error = %format!("{err:#}"),
                    "comments unavailable; recording zero unique commenters"
                );
                (CommenterTally::default(), false)
            }
        };

        let record = PostRecord {
            slug: slug.to_owned(),
            title: fields.title,
            post_date: fields.post_date,
            comment_count: fields.comment_count,
            unique_commenters: commenters.unique_commenters(),
            cover_image: fields.cover_image,
            poll_id: find_poll_id(&html),
            poll_total_votes: None,
            scraped_at: None,
        };

        if let Err(err) = self.store.save_post(&record, &commenters) {
            return failed(Stage::Persist, &err);
        }

        SlugOutcome::Persisted {
            comment_count: record.comment_count,
            unique_commenters: record.unique_commenters,
            comments_fetched,
        }
    }

    async fn fetch_commenters(&self, slug: &str) -> anyhow::Result<CommenterTally> {
        let html = self
            .fetcher
            .fetch(&self.config.comments_url(slug))
            .await
            .context("fetch comments page")?;
        match extract(&html).context("decode comments payload")? {
            Some(payload) => {
                let tally = aggregate_payload(&payload);
                release_payload(payload);
                Ok(tally)
            }
            None => {
                tracing::debug!(%slug, "comments page carries no payload");
                Ok(CommenterTally::default())
            }
        }
    }
}

fn failed(stage: Stage, err: &dyn std::error::Error) -> SlugOutcome {
    let mut cause = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        cause.push_str(": ");
        cause.push_str(&inner.to_string());
        source = inner.source();
    }
    SlugOutcome::Failed { stage, cause }
}
