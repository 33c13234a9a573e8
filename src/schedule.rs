//! Scheduled publishing: fan a post out into dated schedule rows, then poll
//! for due rows, lease them, and hand them to the platform publisher.
use crate::db;
use crate::error::{JobError, JobResult};
use crate::model::{Platform, PostSchedule};
use crate::publisher::{Published, PublisherRegistry, SiteVerifier};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use std::future::Future;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

pub const DEFAULT_LEASE_TTL_SECS: i64 = 300;

/// Outcome counts for one polling pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub eligible: usize,
    pub completed: usize,
    pub failed: usize,
    /// Rows another worker leased between the query and our lease attempt.
    pub skipped: usize,
    /// Rows whose outcome could not be written; they become eligible again
    /// once the lease expires.
    pub errors: usize,
}

#[derive(Clone)]
pub struct ScheduleProcessor {
    pool: SqlitePool,
    publishers: PublisherRegistry,
    verifier: Arc<dyn SiteVerifier>,
    lease_ttl: Duration,
}

impl ScheduleProcessor {
    pub fn new(
        pool: SqlitePool,
        publishers: PublisherRegistry,
        verifier: Arc<dyn SiteVerifier>,
    ) -> Self {
        Self {
            pool,
            publishers,
            verifier,
            lease_ttl: Duration::seconds(DEFAULT_LEASE_TTL_SECS),
        }
    }

    pub fn with_lease_ttl(mut self, lease_ttl: Duration) -> Self {
        self.lease_ttl = lease_ttl;
        self
    }

    pub fn lease_ttl(&self) -> Duration {
        self.lease_ttl
    }

    pub async fn schedule_post(
        &self,
        owner_id: i64,
        artifact_id: i64,
        site_id: Option<&str>,
        platform: Platform,
        dates: &[DateTime<Utc>],
    ) -> JobResult<Vec<i64>> {
        self.schedule_post_at(owner_id, artifact_id, site_id, platform, dates, Utc::now())
            .await
    }

    /// One pending row per date. Every check runs before anything is written;
    /// a single non-future date rejects the whole request.
    #[instrument(skip(self, dates), fields(count = dates.len()))]
    pub async fn schedule_post_at(
        &self,
        owner_id: i64,
        artifact_id: i64,
        site_id: Option<&str>,
        platform: Platform,
        dates: &[DateTime<Utc>],
        now: DateTime<Utc>,
    ) -> JobResult<Vec<i64>> {
        if dates.is_empty() {
            return Err(JobError::Validation("at least one date is required".into()));
        }
        if let Some(past) = dates.iter().find(|d| **d <= now) {
            return Err(JobError::Validation(format!(
                "scheduled date {} is not in the future",
                past.to_rfc3339()
            )));
        }
        if self.publishers.get(platform).is_none() {
            return Err(JobError::Validation(format!(
                "publishing to {} is not configured",
                platform.as_str()
            )));
        }

        let verified = self
            .verifier
            .has_verified_site(owner_id, platform, site_id)
            .await
            .context("site verification failed")?;
        if !verified {
            return Err(JobError::Unauthorized(format!(
                "no verified {} site {}",
                platform.as_str(),
                site_id.unwrap_or("(default)")
            )));
        }

        let artifact = db::fetch_artifact(&self.pool, artifact_id)
            .await?
            .ok_or_else(|| JobError::NotFound(format!("artifact {}", artifact_id)))?;
        if artifact.owner_id != owner_id {
            return Err(JobError::Unauthorized(format!(
                "artifact {} belongs to another user",
                artifact_id
            )));
        }

        let ids =
            db::insert_schedules(&self.pool, owner_id, artifact_id, site_id, platform, dates, now)
                .await?;
        info!(owner_id, artifact_id, count = ids.len(), "post scheduled");
        Ok(ids)
    }

    pub async fn tick(&self) -> JobResult<TickReport> {
        self.tick_at(Utc::now()).await
    }

    /// Process every eligible schedule once, sequentially. `now` decides
    /// which rows are due; each lease is stamped with the wall clock at the
    /// moment it is taken. Publish failures are terminal for the schedule and
    /// never abort the pass.
    #[instrument(skip(self))]
    pub async fn tick_at(&self, now: DateTime<Utc>) -> JobResult<TickReport> {
        let eligible = db::list_eligible_schedules(&self.pool, now, self.lease_ttl).await?;
        let mut report = TickReport {
            eligible: eligible.len(),
            ..TickReport::default()
        };

        for schedule in eligible {
            // lock = acquisition time, never earlier than `now`
            let locked_at = now.max(Utc::now());
            match db::try_acquire_lease(&self.pool, schedule.id, now, locked_at, self.lease_ttl)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    debug!(schedule_id = schedule.id, "lease held elsewhere; skipping");
                    report.skipped += 1;
                    continue;
                }
                Err(err) => {
                    error!(schedule_id = schedule.id, ?err, "failed to acquire lease");
                    report.errors += 1;
                    continue;
                }
            }

            let outcome = self.publish(&schedule).await;
            let recorded = match &outcome {
                Ok(published) => {
                    info!(
                        schedule_id = schedule.id,
                        platform = schedule.platform.as_str(),
                        url = %published.url,
                        "schedule published"
                    );
                    db::complete_schedule(&self.pool, schedule.id).await
                }
                Err(err) => {
                    let message = format!("{:#}", err);
                    warn!(
                        schedule_id = schedule.id,
                        platform = schedule.platform.as_str(),
                        error = %message,
                        "schedule failed"
                    );
                    db::fail_schedule(&self.pool, schedule.id, &message).await
                }
            };

            match (recorded, outcome.is_ok()) {
                (Err(err), _) => {
                    error!(schedule_id = schedule.id, ?err, "failed to record outcome");
                    report.errors += 1;
                }
                (Ok(()), true) => report.completed += 1,
                (Ok(()), false) => report.failed += 1,
            }
        }

        Ok(report)
    }

    async fn publish(&self, schedule: &PostSchedule) -> Result<Published> {
        let publisher = self
            .publishers
            .get(schedule.platform)
            .ok_or_else(|| anyhow!("no publisher for platform {}", schedule.platform.as_str()))?;
        publisher
            .publish(
                schedule.owner_id,
                schedule.site_id.as_deref(),
                schedule.artifact_id,
            )
            .await
    }

    /// Tick every `interval` until `shutdown` resolves. A tick in progress
    /// always runs to completion.
    pub async fn run<F>(&self, interval: std::time::Duration, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);
        info!(interval_secs = interval.as_secs(), "scheduler started");
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("scheduler stopping");
                    break;
                }
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(report) if report.eligible > 0 => {
                            info!(
                                eligible = report.eligible,
                                completed = report.completed,
                                failed = report.failed,
                                skipped = report.skipped,
                                errors = report.errors,
                                "tick finished"
                            );
                        }
                        Ok(_) => debug!("nothing due"),
                        Err(err) => error!(%err, "tick failed"),
                    }
                }
            }
        }
    }
}
