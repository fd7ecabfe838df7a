use std::io::Write as _;
use std::path::Path;

use anyhow::Context as _;
use chrono::NaiveDate;
use rusqlite::params_from_iter;
use rusqlite::types::Value as SqlValue;

use crate::cli::{ExportArgs, RangeArgs, ReportCommand};
use crate::config::Config;
use crate::formats::{DailyPoint, LeaderboardRow, PostRecord, Summary};
use crate::store::{Store, StoreError, from_sql_count, row_to_post};

pub fn run(config: &Config, command: ReportCommand) -> anyhow::Result<()> {
    let store = open_existing(config)?;
    let mut stdout = std::io::stdout().lock();

    match command {
        ReportCommand::Daily(range) => {
            for point in daily_series(&store, range_from_args(&range)?)? {
                write_json_line(&mut stdout, &point)?;
            }
        }
        ReportCommand::Top(args) => {
            for row in top_commenters(&store, range_from_args(&args.range)?, args.limit)? {
                write_json_line(&mut stdout, &row)?;
            }
        }
        ReportCommand::Summary(range) => {
            write_json_line(&mut stdout, &summary(&store, range_from_args(&range)?)?)?;
        }
    }

    stdout.flush().context("flush stdout")?;
    Ok(())
}

pub fn export(config: &Config, args: ExportArgs) -> anyhow::Result<()> {
    let store = open_existing(config)?;
    let out_path = args
        .out
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| config.csv_path());
    let rows = export_csv(&store, &out_path)?;
    tracing::info!(rows, out = %out_path.display(), "exported posts");
    Ok(())
}

fn open_existing(config: &Config) -> anyhow::Result<Store> {
    let db_path = config.db_path();
    if !db_path.exists() {
        anyhow::bail!("no database yet (run `ingest` first): {}", db_path.display());
    }
    Store::open(&db_path).with_context(|| format!("open store: {}", db_path.display()))
}

fn range_from_args(args: &RangeArgs) -> anyhow::Result<DateRange> {
    DateRange::parse(args.from.as_deref(), args.to.as_deref())
}

fn write_json_line<T: serde::Serialize>(
    out: &mut impl std::io::Write,
    value: &T,
) -> anyhow::Result<()> {
    serde_json::to_writer(&mut *out, value).context("serialize report row")?;
    out.write_all(b"\n").context("write report newline")?;
    Ok(())
}

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Inclusive calendar-date bounds, matched against the date prefix of `post_date`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn between(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    pub fn parse(start: Option<&str>, end: Option<&str>) -> anyhow::Result<Self> {
        let parse = |value: &str| {
            NaiveDate::parse_from_str(value.trim(), DATE_FORMAT)
                .with_context(|| format!("date must be YYYY-MM-DD: {value}"))
        };
        Ok(Self {
            start: start.map(parse).transpose()?,
            end: end.map(parse).transpose()?,
        })
    }

    /// `WHERE`-clause fragments (joined with AND) and their bound values.
    fn clauses(&self, column: &str) -> (Vec<String>, Vec<SqlValue>) {
        let mut clauses = Vec::new();
        let mut values = Vec::new();
        if let Some(start) = self.start {
            clauses.push(format!("substr({column}, 1, 10) >= ?"));
            values.push(SqlValue::Text(start.format(DATE_FORMAT).to_string()));
        }
        if let Some(end) = self.end {
            clauses.push(format!("substr({column}, 1, 10) <= ?"));
            values.push(SqlValue::Text(end.format(DATE_FORMAT).to_string()));
        }
        (clauses, values)
    }
}

fn where_sql(clauses: &[String]) -> String {
    if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    }
}

pub fn daily_series(store: &Store, range: DateRange) -> Result<Vec<DailyPoint>, StoreError> {
    let (clauses, values) = range.clauses("post_date");
    let sql = format!(
        "SELECT post_date, comment_count, unique_commenters, slug, title \
         FROM posts {} ORDER BY post_date",
        where_sql(&clauses)
    );

    let mut stmt = store.conn().prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values), |row| {
        Ok(DailyPoint {
            date: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
            comment_count: from_sql_count(row.get(1)?),
            unique_commenters: from_sql_count(row.get(2)?),
            slug: row.get(3)?,
            title: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        })
    })?;
    rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
}

pub fn top_commenters(
    store: &Store,
    range: DateRange,
    limit: usize,
) -> Result<Vec<LeaderboardRow>, StoreError> {
    let (clauses, mut values) = range.clauses("p.post_date");
    let sql = format!(
        "SELECT ca.username, \
                SUM(ca.comment_count) AS total_comments, \
                COUNT(DISTINCT ca.slug) AS posts_participated \
         FROM commenter_activity ca \
         JOIN posts p ON ca.slug = p.slug \
         {} \
         GROUP BY ca.username \
         ORDER BY total_comments DESC, ca.username ASC \
         LIMIT ?",
        where_sql(&clauses)
    );
    values.push(SqlValue::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));

    let mut stmt = store.conn().prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values), |row| {
        Ok(LeaderboardRow {
            username: row.get(0)?,
            total_comments: from_sql_count(row.get(1)?),
            posts_participated: from_sql_count(row.get(2)?),
        })
    })?;
    rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
}

pub fn summary(store: &Store, range: DateRange) -> Result<Summary, StoreError> {
    let conn = store.conn();
    let (clauses, values) = range.clauses("post_date");
    let posts_where = where_sql(&clauses);

    let (post_count, total_comments, avg_comments): (i64, Option<i64>, Option<f64>) = conn
        .query_row(
            &format!(
                "SELECT COUNT(*), SUM(comment_count), AVG(comment_count) FROM posts {posts_where}"
            ),
            params_from_iter(values.clone()),
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

    let mut nonzero = vec!["unique_commenters > 0".to_owned()];
    nonzero.extend(clauses);
    let avg_unique: Option<f64> = conn.query_row(
        &format!(
            "SELECT AVG(unique_commenters) FROM posts {}",
            where_sql(&nonzero)
        ),
        params_from_iter(values),
        |row| row.get(0),
    )?;

    let (joined_clauses, joined_values) = range.clauses("p.post_date");
    let distinct: i64 = conn.query_row(
        &format!(
            "SELECT COUNT(DISTINCT ca.username) \
             FROM commenter_activity ca JOIN posts p ON ca.slug = p.slug {}",
            where_sql(&joined_clauses)
        ),
        params_from_iter(joined_values),
        |row| row.get(0),
    )?;

    Ok(Summary {
        post_count: from_sql_count(Some(post_count)),
        total_comments: from_sql_count(total_comments),
        avg_comments: avg_comments.unwrap_or(0.0),
        avg_unique_commenters: avg_unique.unwrap_or(0.0),
        distinct_commenters: from_sql_count(Some(distinct)),
    })
}

pub fn all_posts_newest_first(store: &Store) -> Result<Vec<PostRecord>, StoreError> {
    let mut stmt = store.conn().prepare(
        "SELECT slug, title, post_date, comment_count, unique_commenters, \
         cover_image, poll_id, poll_total_votes, scraped_at \
         FROM posts ORDER BY post_date DESC, slug DESC",
    )?;
    let rows = stmt.query_map([], row_to_post)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
}

const CSV_COLUMNS: [&str; 9] = [
    "slug",
    "title",
    "post_date",
    "comment_count",
    "unique_commenters",
    "cover_image",
    "poll_id",
    "poll_total_votes",
    "scraped_at",
];

/// Writes every post, newest first. Returns the number of data rows.
pub fn export_csv(store: &Store, out_path: &Path) -> anyhow::Result<usize> {
    let posts = all_posts_newest_first(store).context("load posts for export")?;

    let mut out = tempfile::NamedTempFile::new_in(
        out_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new(".")),
    )
    .context("create csv temp file")?;

    writeln!(out, "{}", CSV_COLUMNS.join(",")).context("write csv header")?;
    for post in &posts {
        let fields = [
            csv_field(&post.slug),
            csv_field(&post.title),
            csv_field(&post.post_date),
            post.comment_count.to_string(),
            post.unique_commenters.to_string(),
            post.cover_image.as_deref().map(csv_field).unwrap_or_default(),
            post.poll_id.map(|id| id.to_string()).unwrap_or_default(),
            post.poll_total_votes
                .map(|votes| votes.to_string())
                .unwrap_or_default(),
            post.scraped_at.as_deref().map(csv_field).unwrap_or_default(),
        ];
        writeln!(out, "{}", fields.join(",")).context("write csv row")?;
    }
    out.flush().context("flush csv")?;
    out.persist(out_path)
        .with_context(|| format!("write csv: {}", out_path.display()))?;

    Ok(posts.len())
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_owned()
    }
}
