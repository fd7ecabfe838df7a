use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

pub const UNKNOWN_AUTHOR: &str = "Unknown";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CommentNode {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub children: Vec<CommentNode>,
}

impl CommentNode {
    pub fn new(name: &str) -> Self {
        Self {
            name: Some(name.to_owned()),
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<CommentNode>) -> Self {
        self.children = children;
        self
    }
}

trait CommentLike: Sized {
    fn author(&self) -> Option<&str>;
    fn replies(&self) -> &[Self];
}

impl CommentLike for CommentNode {
    fn author(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn replies(&self) -> &[Self] {
        &self.children
    }
}

// Raw payload nodes; anything that is not an object counts as an anonymous comment.
impl CommentLike for Value {
    fn author(&self) -> Option<&str> {
        self.get("name").and_then(Value::as_str)
    }

    fn replies(&self) -> &[Self] {
        self.get("children")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Per-author comment counts for one post.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommenterTally {
    counts: BTreeMap<String, u64>,
}

impl CommenterTally {
    pub fn counts(&self) -> &BTreeMap<String, u64> {
        &self.counts
    }

    pub fn get(&self, author: &str) -> u64 {
        self.counts.get(author).copied().unwrap_or(0)
    }

    pub fn unique_commenters(&self) -> u64 {
        self.counts.len() as u64
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    fn record(&mut self, author: Option<&str>) {
        let author = author.unwrap_or(UNKNOWN_AUTHOR);
        *self.counts.entry(author.to_owned()).or_insert(0) += 1;
    }
}

pub fn aggregate(tree: &[CommentNode]) -> CommenterTally {
    walk(tree)
}

/// Aggregates the `initialComments` array of a comments-page payload.
pub fn aggregate_payload(payload: &Value) -> CommenterTally {
    walk(initial_comments(payload))
}

/// Drops a payload without recursing, so deep reply chains cannot overflow on drop.
pub fn release_payload(payload: Value) {
    let mut pending = vec![payload];
    while let Some(mut value) = pending.pop() {
        match &mut value {
            Value::Array(items) => pending.append(items),
            Value::Object(map) => pending.extend(std::mem::take(map).into_iter().map(|(_, v)| v)),
            _ => {}
        }
    }
}

pub fn initial_comments(payload: &Value) -> &[Value] {
    payload
        .get("initialComments")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

// Pre-order, depth-first, with an explicit stack so reply depth never grows the call stack.
fn walk<T: CommentLike>(roots: &[T]) -> CommenterTally {
    let mut tally = CommenterTally::default();
    let mut stack: Vec<&T> = roots.iter().rev().collect();

    while let Some(node) = stack.pop() {
        tally.record(node.author());
        stack.extend(node.replies().iter().rev());
    }

    tally
}
