use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use crate::db::Repository;
use crate::errors::AppError;
use crate::models::ImageRef;

/// Outcome of one retention sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub cutoff: DateTime<Utc>,
    pub deleted_tasks: usize,
    /// Proof images left behind by the deleted tasks, hosted or legacy
    pub orphaned_proofs: Vec<ImageRef>,
}

/// Deletes finished tasks once their completion is older than the retention window.
pub struct RetentionSweeper {
    repo: Arc<Repository>,
    retention_days: i64,
    interval: Duration,
}

impl RetentionSweeper {
    pub fn new(repo: Arc<Repository>, retention_days: i64, interval: Duration) -> Self {
        Self {
            repo,
            retention_days,
            interval,
        }
    }

    /// Completion instant before which finished tasks expire.
    fn cutoff(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, AppError> {
        TimeDelta::try_days(self.retention_days)
            .and_then(|retention| now.checked_sub_signed(retention))
            .ok_or_else(|| {
                AppError::Config(format!(
                    "Retention of {} days is out of range",
                    self.retention_days
                ))
            })
    }

    /// Run one sweep relative to `now`. Proof images are logged, never deleted.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, AppError> {
        let cutoff = self.cutoff(now)?;
        let deleted = self.repo.delete_finished_before(cutoff).await?;

        if deleted.is_empty() {
            tracing::info!(cutoff = %cutoff, "No finished tasks past retention");
            return Ok(SweepReport {
                cutoff,
                deleted_tasks: 0,
                orphaned_proofs: Vec::new(),
            });
        }

        let mut orphaned_proofs = Vec::new();
        for task in &deleted {
            let Some(proof) = task.proof_image() else {
                continue;
            };
            match proof {
                ImageRef::Hosted { url } => {
                    tracing::info!(task_id = %task.id, proof_url = %url, "Deleted task left its hosted proof image");
                }
                ImageRef::Legacy { id } => {
                    tracing::info!(task_id = %task.id, proof_id = %id, "Deleted task left its legacy proof image");
                }
            }
            orphaned_proofs.push(proof.clone());
        }

        tracing::info!(
            cutoff = %cutoff,
            deleted = deleted.len(),
            orphaned = orphaned_proofs.len(),
            "Deleted finished tasks past retention"
        );

        Ok(SweepReport {
            cutoff,
            deleted_tasks: deleted.len(),
            orphaned_proofs,
        })
    }

    /// Sweep once per interval, starting one interval from now.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + self.interval;
            let mut interval = tokio::time::interval_at(start, self.interval);
            loop {
                interval.tick().await;
                if let Err(e) = self.sweep(Utc::now()).await {
                    tracing::error!("Retention sweep failed: {}", e);
                }
            }
        })
    }
}
