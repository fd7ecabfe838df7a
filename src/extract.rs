use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize as _;
use serde_json::Value;

static PAYLOAD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"JSON\.parse\("(.+?)"\)"#).expect("valid payload regex")
});
static POLL_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"poll-(\d{5,7})").expect("valid poll regex")
});
static COMMENT_COUNT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+)\s*[Cc]omments").expect("valid comment count regex")
});

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("decode embedded payload: {0}")]
    Decode(String),
    #[error("parse embedded payload json")]
    Json(#[from] serde_json::Error),
}

/// Returns the still-escaped argument of the first `JSON.parse("...")` call in the page.
pub fn find_payload(html: &str) -> Option<&str> {
    PAYLOAD_RE
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Locates and decodes the embedded payload. `Ok(None)` means the page carries none.
pub fn extract(html: &str) -> Result<Option<Value>, ExtractError> {
    let Some(raw) = find_payload(html) else {
        return Ok(None);
    };
    let decoded = decode_script_string(raw)?;
    Ok(Some(parse_payload(&decoded)?))
}

/// Parses without serde_json's nesting limit; reply chains can be arbitrarily deep, so the
/// parser grows its stack on the heap instead of the thread stack.
fn parse_payload(json: &str) -> Result<Value, serde_json::Error> {
    let mut de = serde_json::Deserializer::from_str(json);
    de.disable_recursion_limit();
    let value = Value::deserialize(serde_stacker::Deserializer::new(&mut de))?;
    de.end()?;
    Ok(value)
}

/// Undoes the JavaScript string-literal escaping applied to the payload.
///
/// A trailing run of backslashes (seen on comment pages) is dropped first, since it would
/// otherwise leave a dangling escape.
pub fn decode_script_string(raw: &str) -> Result<String, ExtractError> {
    let raw = raw.trim_end_matches('\\');
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();

    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }

        let escaped = chars
            .next()
            .ok_or_else(|| ExtractError::Decode("dangling escape at end of payload".to_owned()))?;
        match escaped {
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            'b' => out.push('\u{8}'),
            'f' => out.push('\u{c}'),
            'v' => out.push('\u{b}'),
            '0' => out.push('\0'),
            'x' => {
                let code = read_hex(&mut chars, 2)?;
                out.push(char_from_code(code)?);
            }
            'u' => {
                let high = read_hex(&mut chars, 4)?;
                if (0xD800..0xDC00).contains(&high) {
                    let mut lookahead = chars.clone();
                    if lookahead.next() != Some('\\') || lookahead.next() != Some('u') {
                        return Err(ExtractError::Decode(format!(
                            "unpaired surrogate \\u{high:04x}"
                        )));
                    }
                    let low = read_hex(&mut lookahead, 4)?;
                    if !(0xDC00..0xE000).contains(&low) {
                        return Err(ExtractError::Decode(format!(
                            "invalid low surrogate \\u{low:04x}"
                        )));
                    }
                    chars = lookahead;
                    let code = 0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
                    out.push(char_from_code(code)?);
                } else {
                    out.push(char_from_code(high)?);
                }
            }
            // `\"`, `\\`, `\/`, `\'` and any other escaped char stand for themselves.
            other => out.push(other),
        }
    }

    Ok(out)
}

fn read_hex(chars: &mut std::str::Chars<'_>, digits: usize) -> Result<u32, ExtractError> {
    let mut code = 0_u32;
    for _ in 0..digits {
        let digit = chars
            .next()
            .and_then(|c| c.to_digit(16))
            .ok_or_else(|| ExtractError::Decode(format!("expected {digits} hex digits")))?;
        code = code * 16 + digit;
    }
    Ok(code)
}

fn char_from_code(code: u32) -> Result<char, ExtractError> {
    char::from_u32(code)
        .ok_or_else(|| ExtractError::Decode(format!("invalid code point U+{code:04X}")))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostFields {
    pub title: String,
    pub post_date: String,
    pub comment_count: u64,
    pub cover_image: Option<String>,
}

impl PostFields {
    pub fn from_payload(payload: &Value) -> Self {
        let Some(post) = payload.get("post") else {
            return Self::default();
        };

        Self {
            title: post
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
            post_date: post
                .get("post_date")
                .and_then(Value::as_str)
                .map(normalize_post_date)
                .unwrap_or_default(),
            comment_count: post
                .get("comment_count")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            cover_image: post
                .get("cover_image")
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .map(str::to_owned),
        }
    }
}

/// Re-renders RFC 3339 timestamps with an explicit offset (`Z` becomes `+00:00`).
pub fn normalize_post_date(raw: &str) -> String {
    match chrono::DateTime::parse_from_rfc3339(raw.trim()) {
        Ok(parsed) => parsed.to_rfc3339(),
        Err(_) => raw.to_owned(),
    }
}

pub fn find_poll_id(html: &str) -> Option<i64> {
    POLL_ID_RE
        .captures(html)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

pub fn comment_count_from_markup(html: &str) -> Option<u64> {
    COMMENT_COUNT_RE
        .captures(html)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}
