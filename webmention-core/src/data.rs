use crate::config::Config;
use crate::error::{Error, Result};
use crate::host::Host;
use crate::model::{
    Comment, CommentDraft, Mention, MentionKind, MentionStatus, NewMention, Post, PostStatus,
    ScheduledTask, TaskKind,
};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};

const SCHEMA_VERSION: i32 = 1;
const NAIVE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// SQLite-backed [`Host`]: posts, post meta, comments, the mention queue
/// and scheduled tasks in one file.
pub struct Database {
    conn: Mutex<Connection>,
    site_url: String,
    path_prefix: String,
}

fn from_timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn parse_naive(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDateTime> {
    let raw: String = row.get(idx)?;
    NaiveDateTime::parse_from_str(&raw, NAIVE_FORMAT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn post_from_row(row: &Row<'_>) -> rusqlite::Result<Post> {
    Ok(Post {
        id: row.get(0)?,
        post_type: row.get(1)?,
        slug: row.get(2)?,
        title: row.get(3)?,
        status: parse_column(row, 4)?,
        content: row.get(5)?,
    })
}

fn mention_from_row(row: &Row<'_>) -> rusqlite::Result<Mention> {
    Ok(Mention {
        id: row.get(0)?,
        source: row.get(1)?,
        target: row.get(2)?,
        post_id: row.get(3)?,
        ip: row.get(4)?,
        status: parse_column(row, 5)?,
        fetch_attempts: row.get(6)?,
        created_at: from_timestamp(row.get(7)?),
    })
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<ScheduledTask> {
    Ok(ScheduledTask {
        id: row.get(0)?,
        kind: parse_column(row, 1)?,
        post_id: row.get(2)?,
        due_at: from_timestamp(row.get(3)?),
        interval_secs: row.get(4)?,
    })
}

fn comment_from_row(row: &Row<'_>) -> rusqlite::Result<Comment> {
    let kind: Option<String> = row.get(8)?;
    let kind = kind
        .map(|k| {
            MentionKind::from_str(&k)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, Type::Text, e.into()))
        })
        .transpose()?;

    Ok(Comment {
        id: row.get(0)?,
        post_id: row.get(1)?,
        author_name: row.get(2)?,
        author_url: row.get(3)?,
        author_ip: row.get(4)?,
        date_local: parse_naive(row, 5)?,
        date_utc: parse_naive(row, 6)?,
        content: row.get(7)?,
        kind,
        source_url: row.get(9)?,
    })
}

const POST_COLUMNS: &str = "id, post_type, slug, title, status, content";
const MENTION_COLUMNS: &str =
    "id, source, target, post_id, ip, status, fetch_attempts, created_at";
const TASK_COLUMNS: &str = "id, kind, post_id, due_at, interval_secs";

impl Database {
    pub fn drop(path: &Path) -> Result<()> {
        fs::remove_file(path)?;
        Ok(())
    }

    pub fn exists(path: &Path) -> bool {
        path.exists()
    }

    pub fn new(path: &Path, config: &Config) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -16000;  -- 16MB cache
            PRAGMA temp_store = MEMORY;
            PRAGMA foreign_keys = ON;
            ",
        )?;

        let prefix = config.path_prefix.trim_matches('/');
        let db = Database {
            conn: Mutex::new(conn),
            site_url: config.site_url.trim_end_matches('/').to_string(),
            path_prefix: if prefix.is_empty() {
                String::new()
            } else {
                format!("/{}", prefix)
            },
        };
        db.init_schema()?;
        Ok(db)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn();
        conn.execute_batch(
            "
            -- Site content
            CREATE TABLE IF NOT EXISTS posts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    post_type TEXT NOT NULL DEFAULT 'post',
    slug TEXT NOT NULL,
    title TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL CHECK(status IN ('draft', 'published')),
    content TEXT NOT NULL DEFAULT '',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_posts_slug ON posts(slug);

CREATE TABLE IF NOT EXISTS post_meta (
    post_id INTEGER NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY(post_id, key),
    FOREIGN KEY(post_id) REFERENCES posts(id) ON DELETE CASCADE
);

-- Comments derived from processed mentions
CREATE TABLE IF NOT EXISTS comments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    post_id INTEGER NOT NULL,
    author_name TEXT NOT NULL,
    author_url TEXT NOT NULL,
    author_ip TEXT NOT NULL,
    date_local TEXT NOT NULL,
    date_utc TEXT NOT NULL,
    content TEXT NOT NULL,
    kind TEXT CHECK(kind IN ('mention', 'reply', 'repost', 'bookmark', 'like')),
    source_url TEXT,
    created_at INTEGER NOT NULL,
    FOREIGN KEY(post_id) REFERENCES posts(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_comments_post ON comments(post_id);

-- Inbound queue
CREATE TABLE IF NOT EXISTS mentions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source TEXT NOT NULL,
    target TEXT NOT NULL,
    post_id INTEGER NOT NULL,
    ip TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL CHECK(status IN ('queued', 'invalid', 'duplicate', 'complete')),
    fetch_attempts INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    FOREIGN KEY(post_id) REFERENCES posts(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_mentions_status ON mentions(status, created_at);

CREATE TABLE IF NOT EXISTS scheduled_tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL CHECK(kind IN ('send_webmentions', 'process_mentions')),
    post_id INTEGER,
    due_at INTEGER NOT NULL,
    interval_secs INTEGER
);

CREATE INDEX IF NOT EXISTS idx_scheduled_tasks_due ON scheduled_tasks(due_at);
            ",
        )?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        Ok(())
    }

    pub fn schema_version(&self) -> Result<i32> {
        Ok(self
            .conn()
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    // Post management
    pub fn insert_post(
        &self,
        post_type: &str,
        slug: &str,
        title: &str,
        content: &str,
    ) -> Result<i64> {
        let timestamp = Utc::now().timestamp();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO posts (post_type, slug, title, status, content, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                post_type,
                slug,
                title,
                PostStatus::Draft.as_str(),
                content,
                timestamp
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn set_post_status(&self, post_id: i64, status: PostStatus) -> Result<()> {
        let changed = self.conn().execute(
            "UPDATE posts SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), Utc::now().timestamp(), post_id],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(format!("post {}", post_id)));
        }
        Ok(())
    }

    pub fn update_post_content(&self, post_id: i64, content: &str) -> Result<()> {
        let changed = self.conn().execute(
            "UPDATE posts SET content = ?1, updated_at = ?2 WHERE id = ?3",
            params![content, Utc::now().timestamp(), post_id],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(format!("post {}", post_id)));
        }
        Ok(())
    }

    pub fn posts(&self) -> Result<Vec<Post>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("SELECT {} FROM posts ORDER BY id", POST_COLUMNS))?;
        let posts = stmt
            .query_map([], post_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(posts)
    }

    // Mention queries
    pub fn mention(&self, id: i64) -> Result<Option<Mention>> {
        Ok(self
            .conn()
            .query_row(
                &format!("SELECT {} FROM mentions WHERE id = ?1", MENTION_COLUMNS),
                params![id],
                mention_from_row,
            )
            .optional()?)
    }

    pub fn mentions(&self, status: Option<MentionStatus>) -> Result<Vec<Mention>> {
        let conn = self.conn();
        let mentions = match status {
            Some(status) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM mentions WHERE status = ?1 ORDER BY id",
                    MENTION_COLUMNS
                ))?;
                stmt.query_map(params![status.as_str()], mention_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM mentions ORDER BY id",
                    MENTION_COLUMNS
                ))?;
                stmt.query_map([], mention_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        Ok(mentions)
    }

    pub fn comments_for_post(&self, post_id: i64) -> Result<Vec<Comment>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, post_id, author_name, author_url, author_ip, date_local, date_utc,
                    content, kind, source_url
             FROM comments WHERE post_id = ?1 ORDER BY id",
        )?;
        let comments = stmt
            .query_map(params![post_id], comment_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(comments)
    }

    pub fn tasks(&self) -> Result<Vec<ScheduledTask>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM scheduled_tasks ORDER BY due_at, id",
            TASK_COLUMNS
        ))?;
        let tasks = stmt
            .query_map([], task_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tasks)
    }
}

impl Host for Database {
    fn post(&self, id: i64) -> Result<Option<Post>> {
        Ok(self
            .conn()
            .query_row(
                &format!("SELECT {} FROM posts WHERE id = ?1", POST_COLUMNS),
                params![id],
                post_from_row,
            )
            .optional()?)
    }

    fn find_post_by_slug(&self, slug: &str, post_types: &[String]) -> Result<Option<Post>> {
        if post_types.is_empty() {
            return Ok(None);
        }

        let placeholders = vec!["?"; post_types.len()].join(", ");
        let sql = format!(
            "SELECT {} FROM posts WHERE slug = ? AND post_type IN ({})
             ORDER BY status = 'published' DESC, id DESC LIMIT 1",
            POST_COLUMNS, placeholders
        );

        let values = std::iter::once(slug).chain(post_types.iter().map(String::as_str));
        Ok(self
            .conn()
            .query_row(&sql, params_from_iter(values), post_from_row)
            .optional()?)
    }

    fn permalink(&self, post: &Post) -> String {
        format!("{}{}/{}/", self.site_url, self.path_prefix, post.slug)
    }

    fn get_meta(&self, post_id: i64, key: &str) -> Result<Option<String>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT value FROM post_meta WHERE post_id = ?1 AND key = ?2",
                params![post_id, key],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn set_meta(&self, post_id: i64, key: &str, value: &str) -> Result<()> {
        self.conn().execute(
            "INSERT INTO post_meta (post_id, key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT(post_id, key) DO UPDATE SET value = excluded.value",
            params![post_id, key, value],
        )?;
        Ok(())
    }

    fn create_comment(&self, draft: &CommentDraft) -> Result<i64> {
        let conn = self.conn();

        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM comments WHERE post_id = ?1 AND author_name = ?2 AND content = ?3",
                params![draft.post_id, &draft.author_name, &draft.content],
                |row| row.get(0),
            )
            .optional()?;
        if existing.is_some() {
            return Err(Error::Duplicate);
        }

        conn.execute(
            "INSERT INTO comments (
                post_id, author_name, author_url, author_ip, date_local, date_utc,
                content, kind, source_url, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                draft.post_id,
                &draft.author_name,
                &draft.author_url,
                &draft.author_ip,
                draft.date_local.format(NAIVE_FORMAT).to_string(),
                draft.date_utc.format(NAIVE_FORMAT).to_string(),
                &draft.content,
                draft.kind.map(|k| k.as_str()),
                &draft.source_url,
                Utc::now().timestamp(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn insert_mention(&self, mention: &NewMention) -> Result<i64> {
        let conn = self.conn();
        let timestamp = mention.created_at.timestamp();
        conn.execute(
            "INSERT INTO mentions (source, target, post_id, ip, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                &mention.source,
                &mention.target,
                mention.post_id,
                &mention.ip,
                MentionStatus::Queued.as_str(),
                timestamp
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn queued_mentions(&self, limit: usize) -> Result<Vec<Mention>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM mentions WHERE status = 'queued' ORDER BY created_at, id LIMIT ?1",
            MENTION_COLUMNS
        ))?;
        let mentions = stmt
            .query_map(params![limit as i64], mention_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(mentions)
    }

    fn set_mention_status(&self, id: i64, status: MentionStatus) -> Result<bool> {
        if !status.is_terminal() {
            return Ok(false);
        }
        let changed = self.conn().execute(
            "UPDATE mentions SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = 'queued'",
            params![status.as_str(), Utc::now().timestamp(), id],
        )?;
        Ok(changed > 0)
    }

    fn record_fetch_failure(&self, id: i64) -> Result<u32> {
        let conn = self.conn();
        conn.execute(
            "UPDATE mentions SET fetch_attempts = fetch_attempts + 1, updated_at = ?1 WHERE id = ?2",
            params![Utc::now().timestamp(), id],
        )?;
        Ok(conn.query_row(
            "SELECT fetch_attempts FROM mentions WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?)
    }

    fn schedule_task(
        &self,
        kind: TaskKind,
        post_id: Option<i64>,
        due_at: DateTime<Utc>,
        interval_secs: Option<i64>,
    ) -> Result<i64> {
        let conn = self.conn();

        if interval_secs.is_none() {
            let pending: Option<i64> = conn
                .query_row(
                    "SELECT id FROM scheduled_tasks
                     WHERE kind = ?1 AND post_id IS ?2 AND interval_secs IS NULL",
                    params![kind.as_str(), post_id],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(id) = pending {
                // keep the earlier of the two due times
                conn.execute(
                    "UPDATE scheduled_tasks SET due_at = MIN(due_at, ?1) WHERE id = ?2",
                    params![due_at.timestamp(), id],
                )?;
                return Ok(id);
            }
        }

        conn.execute(
            "INSERT INTO scheduled_tasks (kind, post_id, due_at, interval_secs) VALUES (?1, ?2, ?3, ?4)",
            params![kind.as_str(), post_id, due_at.timestamp(), interval_secs],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn ensure_recurring(
        &self,
        kind: TaskKind,
        interval_secs: i64,
        first_due: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn();
        let exists: Option<i64> = conn
            .query_row(
                "SELECT id FROM scheduled_tasks WHERE kind = ?1 AND interval_secs IS NOT NULL",
                params![kind.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        if exists.is_none() {
            conn.execute(
                "INSERT INTO scheduled_tasks (kind, post_id, due_at, interval_secs) VALUES (?1, NULL, ?2, ?3)",
                params![kind.as_str(), first_due.timestamp(), interval_secs],
            )?;
        }
        Ok(())
    }

    fn remove_recurring(&self, kind: TaskKind) -> Result<bool> {
        let removed = self.conn().execute(
            "DELETE FROM scheduled_tasks WHERE kind = ?1 AND interval_secs IS NOT NULL",
            params![kind.as_str()],
        )?;
        Ok(removed > 0)
    }

    fn due_tasks(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledTask>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM scheduled_tasks WHERE due_at <= ?1 ORDER BY due_at, id",
            TASK_COLUMNS
        ))?;
        let tasks = stmt
            .query_map(params![now.timestamp()], task_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tasks)
    }

    fn complete_task(&self, task: &ScheduledTask, now: DateTime<Utc>) -> Result<()> {
        let conn = self.conn();
        match task.interval_secs {
            Some(interval) => {
                let next = now + Duration::seconds(interval);
                conn.execute(
                    "UPDATE scheduled_tasks SET due_at = ?1 WHERE id = ?2",
                    params![next.timestamp(), task.id],
                )?;
            }
            None => {
                conn.execute("DELETE FROM scheduled_tasks WHERE id = ?1", params![task.id])?;
            }
        }
        Ok(())
    }
}
