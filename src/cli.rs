use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Ingest(IngestArgs),
    Watch(WatchArgs),
    Export(ExportArgs),
    Report {
        #[command(subcommand)]
        command: ReportCommand,
    },
}

#[derive(Debug, Args)]
pub struct IngestArgs {
    /// Year to ingest (default: previous calendar year).
    #[arg(long)]
    pub year: Option<i32>,

    /// Delay between posts, in seconds (politeness).
    #[arg(long, default_value_t = 1.0)]
    pub delay_secs: f64,

    /// Export the posts table to CSV after ingesting.
    #[arg(long)]
    pub export: bool,

    /// Print the top N commenters and exit without ingesting.
    #[arg(long)]
    pub top_commenters: Option<usize>,

    /// Re-scrape posts that are already stored.
    #[arg(long)]
    pub refresh: bool,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Seconds between checks (default: DBD_HARVEST_CHECK_INTERVAL_SECS or 300).
    #[arg(long)]
    pub interval_secs: Option<u64>,

    /// Program to run for each notification (title/message/url passed via env).
    #[arg(long)]
    pub notify_command: Option<String>,
}

#[derive(Debug, Args)]
pub struct ExportArgs {
    /// Output CSV path (default: `dbd_history.csv` in the state dir).
    #[arg(long)]
    pub out: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum ReportCommand {
    /// Per-post daily series, oldest first.
    Daily(RangeArgs),
    /// Commenter leaderboard.
    Top(TopArgs),
    /// Aggregate statistics.
    Summary(RangeArgs),
}

#[derive(Debug, Clone, Args)]
pub struct RangeArgs {
    /// First date to include (YYYY-MM-DD).
    #[arg(long)]
    pub from: Option<String>,

    /// Last date to include (YYYY-MM-DD).
    #[arg(long)]
    pub to: Option<String>,
}

#[derive(Debug, Args)]
pub struct TopArgs {
    #[command(flatten)]
    pub range: RangeArgs,

    /// Maximum rows to print.
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}
