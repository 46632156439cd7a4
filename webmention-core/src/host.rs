use crate::error::Result;
use crate::model::{
    CommentDraft, Mention, MentionStatus, NewMention, Post, ScheduledTask, TaskKind,
};
use chrono::{DateTime, Utc};

/// Everything the engines need from the hosting application: content,
/// per-post metadata, comments, the mention queue and a task schedule.
///
/// Implementations are called from async code but must not block for long;
/// every method is a short storage operation.
pub trait Host: Send + Sync {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    // Content
    fn post(&self, id: i64) -> Result<Option<Post>>;
    /// Any status; callers check publication themselves.
    fn find_post_by_slug(&self, slug: &str, post_types: &[String]) -> Result<Option<Post>>;
    fn permalink(&self, post: &Post) -> String;
    /// HTML that outgoing links are read from.
    fn render_content(&self, post: &Post) -> String {
        post.content.clone()
    }

    // Metadata
    fn get_meta(&self, post_id: i64, key: &str) -> Result<Option<String>>;
    fn set_meta(&self, post_id: i64, key: &str, value: &str) -> Result<()>;

    /// Fails with [`crate::Error::Duplicate`] when an identical comment exists.
    fn create_comment(&self, draft: &CommentDraft) -> Result<i64>;

    // Mention queue
    fn insert_mention(&self, mention: &NewMention) -> Result<i64>;
    fn queued_mentions(&self, limit: usize) -> Result<Vec<Mention>>;
    /// Moves a queued mention to `status`. Returns false if it was no longer queued.
    fn set_mention_status(&self, id: i64, status: MentionStatus) -> Result<bool>;
    /// Increments and returns the mention's fetch failure count.
    fn record_fetch_failure(&self, id: i64) -> Result<u32>;

    // Schedule
    fn schedule_task(
        &self,
        kind: TaskKind,
        post_id: Option<i64>,
        due_at: DateTime<Utc>,
        interval_secs: Option<i64>,
    ) -> Result<i64>;
    /// Creates the recurring task for `kind` unless one exists.
    fn ensure_recurring(
        &self,
        kind: TaskKind,
        interval_secs: i64,
        first_due: DateTime<Utc>,
    ) -> Result<()>;
    /// Removes the recurring task for `kind`. Returns false if there was none.
    fn remove_recurring(&self, kind: TaskKind) -> Result<bool>;
    fn due_tasks(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledTask>>;
    /// Deletes a one-shot task or moves a recurring one to `now + interval`.
    fn complete_task(&self, task: &ScheduledTask, now: DateTime<Utc>) -> Result<()>;
}
