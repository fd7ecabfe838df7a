use serde::{Deserialize, Serialize};

/// One row of the `posts` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRecord {
    pub slug: String,
    pub title: String,
    pub post_date: String,
    pub comment_count: u64,
    /// Zero both when nobody commented and when the comments page could not be read.
    pub unique_commenters: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_id: Option<i64>,
    /// Needs authenticated access to the source; never populated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_total_votes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scraped_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyPoint {
    pub date: String,
    pub comment_count: u64,
    pub unique_commenters: u64,
    pub slug: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardRow {
    pub username: String,
    pub total_comments: u64,
    pub posts_participated: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub post_count: u64,
    pub total_comments: u64,
    pub avg_comments: f64,
    pub avg_unique_commenters: f64,
    pub distinct_commenters: u64,
}
