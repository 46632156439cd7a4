use crate::error::{Error, Result};
use crate::host::Host;
use crate::model::{CommentDraft, Mention, MentionStatus};
use crate::service::MentionService;
use chrono::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

pub const DEFAULT_COMMENT_CONTENT: &str = "\u{2026} commented on this.";

/// What happened to one queued mention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Complete,
    Invalid,
    Duplicate,
    /// Source fetch failed; left queued for the next run.
    Retry,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessReport {
    pub complete: usize,
    pub invalid: usize,
    pub duplicate: usize,
    pub retry: usize,
}

impl ProcessReport {
    fn record(&mut self, outcome: ProcessOutcome) {
        match outcome {
            ProcessOutcome::Complete => self.complete += 1,
            ProcessOutcome::Invalid => self.invalid += 1,
            ProcessOutcome::Duplicate => self.duplicate += 1,
            ProcessOutcome::Retry => self.retry += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.complete + self.invalid + self.duplicate + self.retry
    }
}

impl<H: Host> MentionService<H> {
    /// Handles one batch of queued mentions.
    pub async fn process_queue(&self) -> Result<ProcessReport> {
        let batch = self.host.queued_mentions(self.config.batch_size)?;
        let mut report = ProcessReport::default();

        for mention in &batch {
            let outcome = self.process_mention(mention).await?;
            report.record(outcome);
        }

        if !batch.is_empty() {
            info!(
                "Processed {} mentions: {} complete, {} invalid, {} duplicate, {} retry",
                report.total(),
                report.complete,
                report.invalid,
                report.duplicate,
                report.retry
            );
        }
        Ok(report)
    }

    pub async fn process_mention(&self, mention: &Mention) -> Result<ProcessOutcome> {
        let Some(post) = self.host.post(mention.post_id)? else {
            debug!(mention_id = mention.id, "Target post no longer exists");
            return self.finish(mention, MentionStatus::Invalid);
        };
        let permalink = self.host.permalink(&post);

        let Ok(source) = Url::parse(&mention.source) else {
            return self.finish(mention, MentionStatus::Invalid);
        };

        let page = match self.http.get(&source).await {
            Ok(page) => page,
            Err(e) => {
                let attempts = self.host.record_fetch_failure(mention.id)?;
                warn!(
                    mention_id = mention.id,
                    "Fetching {} failed (attempt {}): {}", source, attempts, e
                );
                if attempts >= self.config.max_fetch_attempts {
                    return self.finish(mention, MentionStatus::Invalid);
                }
                return Ok(ProcessOutcome::Retry);
            }
        };

        if !page
            .body
            .to_lowercase()
            .contains(&permalink.to_lowercase())
        {
            debug!(mention_id = mention.id, "{} does not link to {}", source, permalink);
            return self.finish(mention, MentionStatus::Invalid);
        }

        let defaults = self.default_draft(mention, &source);
        let document = self.parser.parse(&page.body, &page.url);
        let draft = self
            .classifier
            .classify_document(&document, mention.source.as_str(), &permalink, &defaults)
            .unwrap_or(defaults);

        match self.host.create_comment(&draft) {
            Ok(comment_id) => {
                info!(
                    mention_id = mention.id,
                    comment_id,
                    kind = draft.kind.map(|k| k.as_str()).unwrap_or("comment"),
                    "Comment created from {}",
                    source
                );
                self.finish(mention, MentionStatus::Complete)
            }
            Err(Error::Duplicate) => {
                debug!(mention_id = mention.id, "Duplicate comment");
                self.finish(mention, MentionStatus::Duplicate)
            }
            Err(e) => {
                // processing is over either way
                error!(mention_id = mention.id, "Creating comment failed: {}", e);
                self.finish(mention, MentionStatus::Complete)
            }
        }
    }

    fn default_draft(&self, mention: &Mention, source: &Url) -> CommentDraft {
        let host = source.host_str().unwrap_or_default();
        let date_utc = mention.created_at.naive_utc();

        CommentDraft {
            post_id: mention.post_id,
            author_name: host.to_string(),
            author_url: format!("{}://{}", source.scheme(), host),
            author_ip: mention.ip.clone(),
            date_local: date_utc + Duration::seconds(self.config.utc_offset_secs()),
            date_utc,
            content: DEFAULT_COMMENT_CONTENT.to_string(),
            kind: None,
            source_url: Some(mention.source.clone()),
        }
    }

    fn finish(&self, mention: &Mention, status: MentionStatus) -> Result<ProcessOutcome> {
        self.host.set_mention_status(mention.id, status)?;
        Ok(match status {
            MentionStatus::Invalid => ProcessOutcome::Invalid,
            MentionStatus::Duplicate => ProcessOutcome::Duplicate,
            _ => ProcessOutcome::Complete,
        })
    }
}
