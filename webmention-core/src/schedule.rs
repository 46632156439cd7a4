use crate::delivery::DeliveryOutcome;
use crate::error::Result;
use crate::host::Host;
use crate::model::TaskKind;
use crate::process::ProcessReport;
use crate::service::MentionService;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

/// Work done by one [`MentionService::run_due_work`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DueWorkReport {
    pub tasks_run: usize,
    pub deliveries: Vec<DeliveryOutcome>,
    pub processed: ProcessReport,
}

impl<H: Host> MentionService<H> {
    /// Registers the recurring queue processor if it is not there yet.
    pub fn activate(&self, now: DateTime<Utc>) -> Result<()> {
        self.host.ensure_recurring(
            TaskKind::ProcessMentions,
            self.config.process_interval_secs,
            now,
        )
    }

    /// Removes the recurring queue processor. Pending sends stay scheduled.
    pub fn deactivate(&self) -> Result<bool> {
        let removed = self.host.remove_recurring(TaskKind::ProcessMentions)?;
        if removed {
            debug!("Recurring mention processing removed");
        }
        Ok(removed)
    }

    /// Runs every task due at `now`. Tasks are claimed (deleted or moved to
    /// their next run) before running, so a failing task does not block the
    /// rest. Safe to call from any external timer.
    pub async fn run_due_work(&self, now: DateTime<Utc>) -> Result<DueWorkReport> {
        let tasks = self.host.due_tasks(now)?;
        let mut report = DueWorkReport::default();

        for task in tasks {
            self.host.complete_task(&task, now)?;
            debug!("Running {} task {}", task.kind.as_str(), task.id);

            match (task.kind, task.post_id) {
                (TaskKind::SendWebmentions, Some(post_id)) => {
                    match self.send_webmentions(post_id, now).await {
                        Ok(outcomes) => report.deliveries.extend(outcomes),
                        Err(e) => warn!("Sending webmentions for post {} failed: {}", post_id, e),
                    }
                }
                (TaskKind::SendWebmentions, None) => {
                    warn!("Send task {} has no post", task.id);
                    continue;
                }
                (TaskKind::ProcessMentions, _) => match self.process_queue().await {
                    Ok(processed) => {
                        report.processed.complete += processed.complete;
                        report.processed.invalid += processed.invalid;
                        report.processed.duplicate += processed.duplicate;
                        report.processed.retry += processed.retry;
                    }
                    Err(e) => warn!("Processing mentions failed: {}", e),
                },
            }
            report.tasks_run += 1;
        }

        Ok(report)
    }
}
