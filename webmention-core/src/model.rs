use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Post meta key holding the outbound attempt log.
pub const OUTBOUND_META_KEY: &str = "_webmention";
/// Post meta key set once delivery for a post has finished.
pub const SENT_MARKER_KEY: &str = "_webmention_sent";

pub const REVISION_POST_TYPE: &str = "revision";
const AUTOSAVE_SUFFIX: &str = "-autosave";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Draft,
    Published,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Draft => "draft",
            PostStatus::Published => "published",
        }
    }
}

impl FromStr for PostStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(PostStatus::Draft),
            "published" => Ok(PostStatus::Published),
            other => Err(format!("unknown post status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub post_type: String,
    pub slug: String,
    pub title: String,
    pub status: PostStatus,
    pub content: String,
}

impl Post {
    pub fn is_published(&self) -> bool {
        self.status == PostStatus::Published
    }

    pub fn is_revision(&self) -> bool {
        self.post_type == REVISION_POST_TYPE
    }

    pub fn is_autosave(&self) -> bool {
        self.slug.ends_with(AUTOSAVE_SUFFIX)
    }
}

/// Inbound mention lifecycle. `Queued` is the only initial state; the
/// other three are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MentionStatus {
    Queued,
    Invalid,
    Duplicate,
    Complete,
}

impl MentionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MentionStatus::Queued => "queued",
            MentionStatus::Invalid => "invalid",
            MentionStatus::Duplicate => "duplicate",
            MentionStatus::Complete => "complete",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, MentionStatus::Queued)
    }
}

impl fmt::Display for MentionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MentionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(MentionStatus::Queued),
            "invalid" => Ok(MentionStatus::Invalid),
            "duplicate" => Ok(MentionStatus::Duplicate),
            "complete" => Ok(MentionStatus::Complete),
            other => Err(format!("unknown mention status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mention {
    pub id: i64,
    pub source: String,
    pub target: String,
    pub post_id: i64,
    pub ip: String,
    pub status: MentionStatus,
    pub fetch_attempts: u32,
    pub created_at: DateTime<Utc>,
}

/// A mention about to be queued.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMention {
    pub source: String,
    pub target: String,
    pub post_id: i64,
    pub ip: String,
    pub created_at: DateTime<Utc>,
}

/// Delivery state for one outgoing link of a post.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutboundAttempt {
    pub endpoint: String,
    #[serde(default)]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub next_attempt_at: Option<DateTime<Utc>>,
}

impl OutboundAttempt {
    pub fn is_sent(&self) -> bool {
        self.sent_at.is_some()
    }
}

/// Attempts keyed by target URL, stored as JSON under [`OUTBOUND_META_KEY`].
pub type OutboundLog = BTreeMap<String, OutboundAttempt>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MentionKind {
    Mention,
    Reply,
    Repost,
    Bookmark,
    Like,
}

impl MentionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MentionKind::Mention => "mention",
            MentionKind::Reply => "reply",
            MentionKind::Repost => "repost",
            MentionKind::Bookmark => "bookmark",
            MentionKind::Like => "like",
        }
    }
}

impl fmt::Display for MentionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MentionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mention" => Ok(MentionKind::Mention),
            "reply" => Ok(MentionKind::Reply),
            "repost" => Ok(MentionKind::Repost),
            "bookmark" => Ok(MentionKind::Bookmark),
            "like" => Ok(MentionKind::Like),
            other => Err(format!("unknown mention kind: {}", other)),
        }
    }
}

/// Comment fields handed to the host. Starts from defaults derived from the
/// source URL and is refined by the classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentDraft {
    pub post_id: i64,
    pub author_name: String,
    pub author_url: String,
    pub author_ip: String,
    pub date_local: NaiveDateTime,
    pub date_utc: NaiveDateTime,
    pub content: String,
    pub kind: Option<MentionKind>,
    pub source_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub post_id: i64,
    pub author_name: String,
    pub author_url: String,
    pub author_ip: String,
    pub date_local: NaiveDateTime,
    pub date_utc: NaiveDateTime,
    pub content: String,
    pub kind: Option<MentionKind>,
    pub source_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    SendWebmentions,
    ProcessMentions,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::SendWebmentions => "send_webmentions",
            TaskKind::ProcessMentions => "process_mentions",
        }
    }
}

impl FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "send_webmentions" => Ok(TaskKind::SendWebmentions),
            "process_mentions" => Ok(TaskKind::ProcessMentions),
            other => Err(format!("unknown task kind: {}", other)),
        }
    }
}

/// Persisted schedule entry. One-shot tasks have no interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: i64,
    pub kind: TaskKind,
    pub post_id: Option<i64>,
    pub due_at: DateTime<Utc>,
    pub interval_secs: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            MentionStatus::Queued,
            MentionStatus::Invalid,
            MentionStatus::Duplicate,
            MentionStatus::Complete,
        ] {
            assert_eq!(status.as_str().parse::<MentionStatus>(), Ok(status));
        }
        assert!("pending".parse::<MentionStatus>().is_err());
        assert!(!MentionStatus::Queued.is_terminal());
        assert!(MentionStatus::Duplicate.is_terminal());
    }

    #[test]
    fn test_revision_and_autosave() {
        let post = Post {
            id: 1,
            post_type: "post".to_string(),
            slug: "hello-autosave".to_string(),
            title: "Hello".to_string(),
            status: PostStatus::Published,
            content: String::new(),
        };
        assert!(post.is_autosave());
        assert!(!post.is_revision());
        assert!(post.is_published());
    }

    #[test]
    fn test_outbound_log_json_shape() {
        let mut log = OutboundLog::new();
        log.insert(
            "https://b.example/".to_string(),
            OutboundAttempt {
                endpoint: "https://b.example/wm".to_string(),
                retries: 2,
                ..OutboundAttempt::default()
            },
        );

        let json = serde_json::to_string(&log).unwrap();
        assert!(json.contains(r#""https://b.example/":{"endpoint":"https://b.example/wm""#));

        let parsed: OutboundLog =
            serde_json::from_str(r#"{"https://c.example/":{"endpoint":"https://c.example/wm"}}"#)
                .unwrap();
        let attempt = &parsed["https://c.example/"];
        assert_eq!(attempt.retries, 0);
        assert!(!attempt.is_sent());
    }
}
