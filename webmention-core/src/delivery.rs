use crate::error::Result;
use crate::host::Host;
use crate::model::{
    OUTBOUND_META_KEY, OutboundAttempt, OutboundLog, Post, SENT_MARKER_KEY, TaskKind,
};
use crate::service::MentionService;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};
use webmention_scanner::{extract_links, outgoing_targets};

/// Failed sends allowed per target before it is abandoned.
pub const MAX_RETRIES: u32 = 3;
/// Delay before the first delivery run after publishing, in seconds.
pub const PUBLISH_DELAY_SECS: std::ops::RangeInclusive<i64> = 0..=300;
/// Delay before retrying a failed send, in seconds.
pub const RETRY_DELAY_SECS: std::ops::RangeInclusive<i64> = 300..=900;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent {
        target: String,
        endpoint: String,
        status: u16,
    },
    /// Delivered on an earlier run. Updates are not re-sent.
    AlreadySent { target: String },
    /// Retry limit reached; never tried again.
    Abandoned { target: String, retries: u32 },
    /// A retry is scheduled but not due yet.
    NotDue {
        target: String,
        next_attempt_at: DateTime<Utc>,
    },
    NoEndpoint { target: String },
    Failed {
        target: String,
        endpoint: String,
        retries: u32,
        error: String,
    },
}

impl<H: Host> MentionService<H> {
    /// Schedules delivery for a post that has just been saved as published.
    /// Returns when the run is due, or `None` if nothing needs sending.
    pub fn schedule_on_publish(
        &self,
        post: &Post,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        if !self.config.outgoing_enabled {
            return Ok(None);
        }
        if post.is_revision() || post.is_autosave() {
            debug!("Post {} is a revision or autosave", post.id);
            return Ok(None);
        }
        if !post.is_published() || !self.supported_post_types().contains(&post.post_type) {
            return Ok(None);
        }
        if self.host.get_meta(post.id, SENT_MARKER_KEY)?.is_some() {
            debug!("Post {} already sent its webmentions", post.id);
            return Ok(None);
        }

        let html = self.host.render_content(post);
        if outgoing_targets(&extract_links(&html)).is_empty() {
            return Ok(None);
        }

        let due = now + Duration::seconds(fastrand::i64(PUBLISH_DELAY_SECS));
        self.host
            .schedule_task(TaskKind::SendWebmentions, Some(post.id), due, None)?;
        info!("Webmentions for post {} scheduled at {}", post.id, due);
        Ok(Some(due))
    }

    /// Notifies every outgoing link of a published post that advertises an
    /// endpoint. Links are re-read from the current content.
    pub async fn send_webmentions(
        &self,
        post_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<DeliveryOutcome>> {
        let Some(post) = self.host.post(post_id)? else {
            return Ok(Vec::new());
        };
        if !post.is_published() || !self.supported_post_types().contains(&post.post_type) {
            return Ok(Vec::new());
        }

        let targets = outgoing_targets(&extract_links(&self.host.render_content(&post)));
        if targets.is_empty() {
            return Ok(Vec::new());
        }

        let source = self.host.permalink(&post);
        let mut log = self.outbound_log(post.id)?;
        let mut outcomes = Vec::with_capacity(targets.len());

        for target in targets {
            if let Some(attempt) = log.get(&target) {
                if attempt.is_sent() {
                    outcomes.push(DeliveryOutcome::AlreadySent { target });
                    continue;
                }
                if attempt.is_abandoned() {
                    warn!(
                        "Sending webmention to {} failed {} times before, not trying again",
                        target, attempt.retries
                    );
                    outcomes.push(DeliveryOutcome::Abandoned {
                        retries: attempt.retries,
                        target,
                    });
                    continue;
                }
                if let Some(next_attempt_at) = attempt.next_attempt_at
                    && next_attempt_at > now
                {
                    outcomes.push(DeliveryOutcome::NotDue {
                        target,
                        next_attempt_at,
                    });
                    continue;
                }
            }

            let Some(endpoint) = self
                .discoverer
                .discover(&target)
                .await
                .filter(|e| matches!(e.scheme(), "http" | "https"))
            else {
                debug!("No webmention endpoint for {}", target);
                outcomes.push(DeliveryOutcome::NoEndpoint { target });
                continue;
            };

            let result = self
                .http
                .post_form(&endpoint, &[("source", source.as_str()), ("target", target.as_str())])
                .await;

            let attempt = log.entry(target.clone()).or_default();
            attempt.endpoint = endpoint.to_string();

            let error = match result {
                Ok(status) if status < 500 => {
                    attempt.sent_at = Some(now);
                    attempt.next_attempt_at = None;
                    self.save_outbound_log(post.id, &log)?;
                    info!(
                        "Sent webmention to {}. Response code: {}.",
                        endpoint, status
                    );
                    outcomes.push(DeliveryOutcome::Sent {
                        target,
                        endpoint: endpoint.to_string(),
                        status,
                    });
                    continue;
                }
                Ok(status) => format!("endpoint answered {}", status),
                Err(e) => e.to_string(),
            };

            attempt.retries += 1;
            let retries = attempt.retries;
            let next = now + Duration::seconds(fastrand::i64(RETRY_DELAY_SECS));
            attempt.next_attempt_at = (retries < MAX_RETRIES).then_some(next);
            self.save_outbound_log(post.id, &log)?;

            warn!(
                "Error trying to send a webmention to {}: {}",
                endpoint, error
            );

            outcomes.push(DeliveryOutcome::Failed {
                target,
                endpoint: endpoint.to_string(),
                retries,
                error,
            });
        }

        let pending: Vec<&OutboundAttempt> = log
            .values()
            .filter(|a| !a.is_sent() && !a.is_abandoned())
            .collect();

        // one task per post, due at the earliest future retry
        if let Some(due) = pending
            .iter()
            .filter_map(|a| a.next_attempt_at)
            .filter(|due| *due > now)
            .min()
        {
            self.host
                .schedule_task(TaskKind::SendWebmentions, Some(post.id), due, None)?;
        } else if !log.is_empty() && pending.is_empty() {
            self.host
                .set_meta(post.id, SENT_MARKER_KEY, &now.to_rfc3339())?;
        }

        Ok(outcomes)
    }

    /// Attempt records for a post. Unreadable meta counts as empty.
    pub fn outbound_log(&self, post_id: i64) -> Result<OutboundLog> {
        let Some(raw) = self.host.get_meta(post_id, OUTBOUND_META_KEY)? else {
            return Ok(OutboundLog::new());
        };
        Ok(serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!("Discarding malformed attempt log for post {}: {}", post_id, e);
            OutboundLog::new()
        }))
    }

    fn save_outbound_log(&self, post_id: i64, log: &OutboundLog) -> Result<()> {
        self.host
            .set_meta(post_id, OUTBOUND_META_KEY, &serde_json::to_string(log)?)
    }
}

impl OutboundAttempt {
    pub fn is_abandoned(&self) -> bool {
        !self.is_sent() && self.retries >= MAX_RETRIES
    }
}
