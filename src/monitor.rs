use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use anyhow::Context as _;
use chrono::Timelike as _;

use crate::cli::WatchArgs;
use crate::config::Config;
use crate::discovery::Discovery;
use crate::extract::comment_count_from_markup;
use crate::fetch::Fetcher;

pub async fn run(config: &Config, args: WatchArgs) -> anyhow::Result<()> {
    let mut config = config.clone();
    if let Some(secs) = args.interval_secs {
        config.check_interval = std::time::Duration::from_secs(secs);
    }
    config.ensure_state_dir()?;

    let notifier: Arc<dyn Notifier> = match args.notify_command {
        Some(program) => Arc::new(CommandNotifier { program }),
        None => Arc::new(LogNotifier),
    };
    let fetcher = Fetcher::new(&config)?;
    Watcher::new(&config, &fetcher, notifier).run().await;
    Ok(())
}

/// Last watched post and its comment count, persisted between runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorState {
    pub target: String,
    pub count: u64,
}

impl MonitorState {
    /// Missing or unreadable state is treated as a fresh start.
    pub fn read(path: &Path) -> Self {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(err) => {
                tracing::warn!(path = %path.display(), %err, "cannot read monitor state; starting fresh");
                return Self::default();
            }
        };

        let mut lines = contents.lines();
        let target = lines.next().unwrap_or_default().trim();
        let count = lines.next().and_then(|line| line.trim().parse::<u64>().ok());
        match count {
            Some(count) if !target.is_empty() => Self {
                target: target.to_owned(),
                count,
            },
            _ => {
                tracing::warn!(path = %path.display(), "monitor state is garbled; starting fresh");
                Self::default()
            }
        }
    }

    /// Replaces the state file atomically (temp file + rename).
    pub fn write(&self, path: &Path) -> anyhow::Result<()> {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create monitor state dir: {}", dir.display()))?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir).context("create monitor state temp file")?;
        write!(tmp, "{}\n{}", self.target, self.count).context("write monitor state")?;
        tmp.flush().context("flush monitor state")?;
        tmp.persist(path)
            .with_context(|| format!("replace monitor state: {}", path.display()))?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    NewPost { url: String },
    NewComments { url: String, delta: u64, total: u64 },
}

impl Notification {
    pub fn title(&self) -> &'static str {
        match self {
            Self::NewPost { .. } => "New DBD Post",
            Self::NewComments { .. } => "Substack Update",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::NewPost { .. } => "New daily post available".to_owned(),
            Self::NewComments { delta, total, .. } => {
                format!("{delta} new comment(s) on DBD (now {total} total)")
            }
        }
    }

    /// Where "go to page" should land: the post's comment thread.
    pub fn link(&self) -> String {
        let url = match self {
            Self::NewPost { url } | Self::NewComments { url, .. } => url,
        };
        format!("{}/comments", url.trim_end_matches('/'))
    }
}

/// Delivery may block; the watcher calls it off the async runtime.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification) -> anyhow::Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        tracing::info!(
            title = notification.title(),
            link = %notification.link(),
            "{}",
            notification.message()
        );
        Ok(())
    }
}

/// Hands each notification to an external program (e.g. a desktop alert script).
#[derive(Debug, Clone)]
pub struct CommandNotifier {
    pub program: String,
}

impl Notifier for CommandNotifier {
    fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        let status = Command::new(&self.program)
            .env("DBD_HARVEST_NOTIFY_TITLE", notification.title())
            .env("DBD_HARVEST_NOTIFY_MESSAGE", notification.message())
            .env("DBD_HARVEST_NOTIFY_URL", notification.link())
            .status()
            .with_context(|| format!("spawn notify command: {}", self.program))?;
        if !status.success() {
            anyhow::bail!("notify command failed: {} ({status})", self.program);
        }
        Ok(())
    }
}

/// Comment-count baseline for the watched post.
#[derive(Debug, Clone, Default)]
pub struct Baseline {
    state: MonitorState,
    suppress_next: bool,
}

impl Baseline {
    pub fn resume(state: MonitorState) -> Self {
        Self {
            state,
            suppress_next: false,
        }
    }

    pub fn state(&self) -> &MonitorState {
        &self.state
    }

    /// Adopts `target`. A switch resets the count to zero and mutes the next increase, so
    /// adopting a post never reads as "+N new comments". Only a switch away from a known
    /// post is announced.
    pub fn observe_target(&mut self, target: &str) -> Option<Notification> {
        if self.state.target == target {
            return None;
        }

        let had_previous = !self.state.target.is_empty();
        self.state = MonitorState {
            target: target.to_owned(),
            count: 0,
        };
        self.suppress_next = true;

        had_previous.then(|| Notification::NewPost {
            url: target.to_owned(),
        })
    }

    /// Records `count`. The mute left by a switch is spent only by an actual increase.
    pub fn observe_count(&mut self, count: u64) -> Option<Notification> {
        let previous = self.state.count;
        self.state.count = count;

        if count <= previous || std::mem::take(&mut self.suppress_next) {
            return None;
        }
        Some(Notification::NewComments {
            url: self.state.target.clone(),
            delta: count - previous,
            total: count,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Inactive,
    TargetUnavailable,
    CountUnavailable { target: String },
    Checked {
        target: String,
        previous: u64,
        count: u64,
        notifications: Vec<Notification>,
    },
}

pub struct Watcher<'a> {
    config: &'a Config,
    fetcher: &'a Fetcher,
    notifier: Arc<dyn Notifier>,
    baseline: Baseline,
    state_path: PathBuf,
}

impl<'a> Watcher<'a> {
    pub fn new(config: &'a Config, fetcher: &'a Fetcher, notifier: Arc<dyn Notifier>) -> Self {
        let state_path = config.monitor_state_path();
        let baseline = Baseline::resume(MonitorState::read(&state_path));
        Self {
            config,
            fetcher,
            notifier,
            baseline,
            state_path,
        }
    }

    pub fn baseline(&self) -> &Baseline {
        &self.baseline
    }

    /// Polls forever; failures are logged and retried on the next cycle.
    pub async fn run(&mut self) {
        tracing::info!(
            interval_secs = self.config.check_interval.as_secs(),
            active_start = self.config.active_hours.start,
            active_end = self.config.active_hours.end,
            "watching for new comments"
        );
        loop {
            let hour = chrono::Local::now().hour();
            self.run_cycle(hour).await;
            self.fetcher.sleeper().sleep(self.config.check_interval).await;
        }
    }

    pub async fn run_cycle(&mut self, hour: u32) -> CycleOutcome {
        if !self.config.active_hours.contains(hour) {
            tracing::info!(hour, "outside active hours; sleeping");
            return CycleOutcome::Inactive;
        }

        let slug = match Discovery::new(self.config, self.fetcher).latest_slug().await {
            Ok(Some(slug)) => slug,
            Ok(None) => {
                tracing::warn!("archive lists no recurring post");
                return CycleOutcome::TargetUnavailable;
            }
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "failed to find latest post");
                return CycleOutcome::TargetUnavailable;
            }
        };
        let target = self.config.post_url(&slug);

        let mut notifications = Vec::new();
        if self.baseline.state().target != target {
            if let Some(notification) = self.baseline.observe_target(&target) {
                tracing::info!(%slug, "new post detected");
                self.emit(&notification).await;
                notifications.push(notification);
            }
            tracing::info!(%slug, "monitoring");
            self.persist();
        }

        let count = match self.fetcher.fetch_fresh(&self.config.comments_url(&slug)).await {
            Ok(html) => comment_count_from_markup(&html),
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "failed to fetch comment count");
                None
            }
        };
        let Some(count) = count else {
            return CycleOutcome::CountUnavailable { target };
        };

        let previous = self.baseline.state().count;
        if let Some(notification) = self.baseline.observe_count(count) {
            self.emit(&notification).await;
            notifications.push(notification);
        }
        if count > previous {
            tracing::info!(previous, count, delta = count - previous, "new comments");
        } else {
            tracing::info!(count, "no new comments");
        }
        self.persist();

        CycleOutcome::Checked {
            target,
            previous,
            count,
            notifications,
        }
    }

    async fn emit(&self, notification: &Notification) {
        let notifier = Arc::clone(&self.notifier);
        let notification = notification.clone();
        let delivered = tokio::task::spawn_blocking(move || notifier.notify(&notification))
            .await
            .context("join notifier task")
            .and_then(|result| result);
        if let Err(err) = delivered {
            tracing::warn!(error = %format!("{err:#}"), "notification failed");
        }
    }

    fn persist(&self) {
        if let Err(err) = self.baseline.state().write(&self.state_path) {
            tracing::warn!(error = %format!("{err:#}"), "failed to save monitor state");
        }
    }
}
