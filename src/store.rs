use std::collections::BTreeMap;
use std::path::Path;

use rusqlite::{Connection, OptionalExtension as _, params};

use crate::comments::CommenterTally;
use crate::formats::PostRecord;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS posts (
    slug TEXT PRIMARY KEY,
    title TEXT,
    post_date TEXT,
    comment_count INTEGER,
    unique_commenters INTEGER,
    cover_image TEXT,
    poll_id INTEGER,
    poll_total_votes INTEGER,
    scraped_at TEXT
);

CREATE TABLE IF NOT EXISTS commenter_activity (
    slug TEXT,
    username TEXT,
    comment_count INTEGER,
    PRIMARY KEY (slug, username),
    FOREIGN KEY (slug) REFERENCES posts(slug)
);

CREATE INDEX IF NOT EXISTS idx_posts_post_date ON posts(post_date);
"#;

// Upserts update in place so existing author rows keep a valid parent.
const UPSERT_POST_SQL: &str = r#"
INSERT INTO posts
    (slug, title, post_date, comment_count, unique_commenters,
     cover_image, poll_id, poll_total_votes, scraped_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
ON CONFLICT(slug) DO UPDATE SET
    title = excluded.title,
    post_date = excluded.post_date,
    comment_count = excluded.comment_count,
    unique_commenters = excluded.unique_commenters,
    cover_image = excluded.cover_image,
    poll_id = excluded.poll_id,
    poll_total_votes = excluded.poll_total_votes,
    scraped_at = excluded.scraped_at
"#;

const UPSERT_COMMENTER_SQL: &str = r#"
INSERT INTO commenter_activity (slug, username, comment_count)
VALUES (?1, ?2, ?3)
ON CONFLICT(slug, username) DO UPDATE SET comment_count = excluded.comment_count
"#;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error("create store dir {path}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// SQLite-backed owner of post and commenter records.
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                path: parent.display().to_string(),
                source,
            })?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn })
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Writes one post and its commenter rows as a single unit of work.
    ///
    /// Authors missing from `commenters` keep whatever row an earlier scrape left.
    pub fn save_post(
        &mut self,
        post: &PostRecord,
        commenters: &CommenterTally,
    ) -> Result<(), StoreError> {
        let scraped_at = post
            .scraped_at
            .clone()
            .unwrap_or_else(|| chrono::Utc::now().to_rfc3339());

        let tx = self.conn.transaction()?;
        tx.execute(
            UPSERT_POST_SQL,
            params![
                post.slug,
                post.title,
                post.post_date,
                to_sql_count(post.comment_count),
                to_sql_count(post.unique_commenters),
                post.cover_image,
                post.poll_id,
                post.poll_total_votes,
                scraped_at,
            ],
        )?;
        {
            let mut stmt = tx.prepare(UPSERT_COMMENTER_SQL)?;
            for (username, count) in commenters.counts() {
                stmt.execute(params![post.slug, username, to_sql_count(*count)])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Whether the slug has a `posts` row, regardless of commenter rows.
    pub fn is_ingested(&self, slug: &str) -> Result<bool, StoreError> {
        let found = self
            .conn
            .query_row("SELECT 1 FROM posts WHERE slug = ?1", params![slug], |_| {
                Ok(())
            })
            .optional()?;
        Ok(found.is_some())
    }

    pub fn get_post(&self, slug: &str) -> Result<Option<PostRecord>, StoreError> {
        let post = self
            .conn
            .query_row(
                "SELECT slug, title, post_date, comment_count, unique_commenters, \
                 cover_image, poll_id, poll_total_votes, scraped_at \
                 FROM posts WHERE slug = ?1",
                params![slug],
                row_to_post,
            )
            .optional()?;
        Ok(post)
    }

    pub fn commenter_counts(&self, slug: &str) -> Result<BTreeMap<String, u64>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT username, comment_count FROM commenter_activity WHERE slug = ?1",
        )?;
        let rows = stmt.query_map(params![slug], |row| {
            Ok((row.get::<_, String>(0)?, from_sql_count(row.get(1)?)))
        })?;
        let mut counts = BTreeMap::new();
        for row in rows {
            let (username, count) = row?;
            counts.insert(username, count);
        }
        Ok(counts)
    }

    pub fn post_count(&self) -> Result<u64, StoreError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM posts", [], |row| row.get(0))?;
        Ok(from_sql_count(Some(count)))
    }
}

pub(crate) fn row_to_post(row: &rusqlite::Row<'_>) -> rusqlite::Result<PostRecord> {
    Ok(PostRecord {
        slug: row.get(0)?,
        title: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        post_date: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        comment_count: from_sql_count(row.get(3)?),
        unique_commenters: from_sql_count(row.get(4)?),
        cover_image: row.get(5)?,
        poll_id: row.get(6)?,
        poll_total_votes: row.get(7)?,
        scraped_at: row.get(8)?,
    })
}

pub(crate) fn to_sql_count(count: u64) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}

pub(crate) fn from_sql_count(value: Option<i64>) -> u64 {
    value.and_then(|v| u64::try_from(v).ok()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comments::{CommentNode, aggregate};

    fn sample_post() -> PostRecord {
        PostRecord {
            slug: "dbd-01-15-2025-foo".to_owned(),
            title: "Foo".to_owned(),
            post_date: "2025-01-15T13:00:00+00:00".to_owned(),
            comment_count: 3,
            unique_commenters: 2,
            cover_image: Some("https://img.example/foo.png".to_owned()),
            poll_id: Some(123456),
            ..PostRecord::default()
        }
    }

    fn sample_tally() -> CommenterTally {
        aggregate(&[
            CommentNode::new("a"),
            CommentNode::new("b").with_children(vec![CommentNode::new("a")]),
        ])
    }

    #[test]
    fn reingesting_a_slug_is_idempotent() -> anyhow::Result<()> {
        let mut store = Store::open_in_memory()?;
        let post = sample_post();
        let tally = sample_tally();

        store.save_post(&post, &tally)?;
        store.save_post(&post, &tally)?;

        assert_eq!(store.post_count()?, 1);
        let counts = store.commenter_counts(&post.slug)?;
        assert_eq!(counts.values().sum::<u64>(), 3);
        assert_eq!(counts.get("a"), Some(&2));

        let stored = store.get_post(&post.slug)?.expect("stored post");
        assert_eq!(stored.title, "Foo");
        assert_eq!(stored.poll_id, Some(123456));
        assert_eq!(stored.poll_total_votes, None);
        assert!(stored.scraped_at.is_some());
        Ok(())
    }

    #[test]
    fn is_ingested_ignores_commenter_rows() -> anyhow::Result<()> {
        let mut store = Store::open_in_memory()?;
        assert!(!store.is_ingested("dbd-01-15-2025-foo")?);

        store.save_post(&sample_post(), &CommenterTally::default())?;
        assert!(store.is_ingested("dbd-01-15-2025-foo")?);
        assert!(store.commenter_counts("dbd-01-15-2025-foo")?.is_empty());
        Ok(())
    }

    #[test]
    fn rescrape_overwrites_post_and_keeps_departed_authors() -> anyhow::Result<()> {
        let mut store = Store::open_in_memory()?;
        store.save_post(&sample_post(), &sample_tally())?;

        let updated = PostRecord {
            comment_count: 1,
            unique_commenters: 1,
            ..sample_post()
        };
        store.save_post(&updated, &aggregate(&[CommentNode::new("a")]))?;

        let stored = store.get_post(&updated.slug)?.expect("stored post");
        assert_eq!(stored.comment_count, 1);
        let counts = store.commenter_counts(&updated.slug)?;
        assert_eq!(counts.get("a"), Some(&1));
        // Not deleted: stale rows are a known gap.
        assert_eq!(counts.get("b"), Some(&1));
        Ok(())
    }
}
