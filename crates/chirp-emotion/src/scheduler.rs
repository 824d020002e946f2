//! The daily report scheduler: a generate job and a push job.
//!
//! Each job runs on its own tokio loop that sleeps until the configured
//! UTC wall-clock time, runs the job to completion, and reschedules. A run
//! always finishes before the next fire time is computed, so two runs of
//! the same job never overlap even when one overruns its slot.
//!
//! Both jobs walk their user/report lists sequentially and treat per-item
//! failures as log-and-continue: one broken user never blocks the rest of
//! the day's reports.

use crate::error::EmotionError;
use crate::store;
use crate::summary::summarize;
use chirp_connect::{ConnectionRegistry, ParentDirectory, PushFrame};
use chirp_db::DbPool;
use chirp_mq::Transport;
use chirp_types::{topics, EmotionLabel, EmotionReport};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

fn default_generate_at() -> NaiveTime {
    NaiveTime::from_hms_opt(19, 0, 0).expect("19:00:00 is a valid time")
}

fn default_push_at() -> NaiveTime {
    NaiveTime::from_hms_opt(20, 0, 0).expect("20:00:00 is a valid time")
}

/// Fire times for the two daily jobs, UTC wall clock.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// When the generate job runs each day.
    #[serde(default = "default_generate_at")]
    pub generate_at: NaiveTime,
    /// When the push job runs each day. Later than `generate_at` so the
    /// day's reports exist by the time it fires.
    #[serde(default = "default_push_at")]
    pub push_at: NaiveTime,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            generate_at: default_generate_at(),
            push_at: default_push_at(),
        }
    }
}

/// Event published to [`topics::REPORT_GENERATED`] after a report is
/// persisted. Fire-and-forget: collaborators may subscribe, none is
/// required to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportGeneratedEvent {
    pub report_id: i64,
    pub user_id: String,
    pub report_date: NaiveDate,
}

/// Everything the jobs need, cheap to clone into their loops.
#[derive(Clone)]
struct JobContext {
    pool: DbPool,
    transport: Transport,
    registry: ConnectionRegistry,
    parents: ParentDirectory,
}

#[derive(Clone, Copy)]
enum Job {
    Generate,
    Push,
}

impl Job {
    fn name(self) -> &'static str {
        match self {
            Self::Generate => "generate",
            Self::Push => "push",
        }
    }
}

/// Owns the two daily job loops.
pub struct ReportScheduler {
    config: SchedulerConfig,
    ctx: JobContext,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ReportScheduler {
    pub fn new(
        config: SchedulerConfig,
        pool: DbPool,
        transport: Transport,
        registry: ConnectionRegistry,
        parents: ParentDirectory,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            ctx: JobContext {
                pool,
                transport,
                registry,
                parents,
            },
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Spawns the two job loops.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock().expect("scheduler task lock poisoned");
        if !tasks.is_empty() {
            return;
        }

        tracing::info!(
            generate_at = %self.config.generate_at,
            push_at = %self.config.push_at,
            "report scheduler started"
        );

        tasks.push(tokio::spawn(job_loop(
            self.ctx.clone(),
            Job::Generate,
            self.config.generate_at,
            self.shutdown_tx.subscribe(),
        )));
        tasks.push(tokio::spawn(job_loop(
            self.ctx.clone(),
            Job::Push,
            self.config.push_at,
            self.shutdown_tx.subscribe(),
        )));
    }

    /// Signals both loops to stop and waits for them.
    pub async fn stop(&self) {
        self.shutdown_tx.send_replace(true);
        let tasks: Vec<JoinHandle<()>> = {
            let mut guard = self.tasks.lock().expect("scheduler task lock poisoned");
            guard.drain(..).collect()
        };
        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!("scheduler loop join error: {}", e);
            }
        }
        tracing::info!("report scheduler stopped");
    }

    /// Runs the generate job for `date` immediately, outside the schedule.
    /// Returns the number of reports created.
    pub async fn run_generate_job(&self, date: NaiveDate) -> Result<usize, EmotionError> {
        generate_job(&self.ctx, date).await
    }

    /// Runs the push job for `date` immediately, outside the schedule.
    /// Returns the number of reports pushed and stamped.
    pub async fn run_push_job(&self, date: NaiveDate) -> Result<usize, EmotionError> {
        push_job(&self.ctx, date).await
    }
}

/// Time remaining until the next daily occurrence of `at`.
fn duration_until(now: DateTime<Utc>, at: NaiveTime) -> std::time::Duration {
    let today = now.date_naive().and_time(at).and_utc();
    let target = if today > now {
        today
    } else {
        today + chrono::Duration::days(1)
    };
    (target - now).to_std().unwrap_or_default()
}

async fn job_loop(
    ctx: JobContext,
    job: Job,
    at: NaiveTime,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let wait = duration_until(Utc::now(), at);
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => continue,
            _ = tokio::time::sleep(wait) => {}
        }

        let date = Utc::now().date_naive();
        let outcome = match job {
            Job::Generate => generate_job(&ctx, date).await,
            Job::Push => push_job(&ctx, date).await,
        };
        match outcome {
            Ok(count) => {
                tracing::info!(job = job.name(), %date, count, "scheduled job finished");
            }
            Err(e) => {
                tracing::error!(job = job.name(), %date, "scheduled job failed: {}", e);
            }
        }
    }
}

/// Aggregates each active user's day into one report, announces it, and
/// attempts an immediate push to the linked parent.
async fn generate_job(ctx: &JobContext, date: NaiveDate) -> Result<usize, EmotionError> {
    let users = {
        let pool = ctx.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<String>, EmotionError> {
            let conn = pool.get()?;
            store::distinct_user_ids_on(&conn, date)
        })
        .await
        .map_err(|e| EmotionError::Join(e.to_string()))??
    };

    let mut created = 0;
    for user_id in users {
        match generate_for_user(ctx, &user_id, date).await {
            Ok(true) => created += 1,
            Ok(false) => {}
            Err(e) => {
                tracing::error!(user_id = %user_id, %date, "failed to generate report: {}", e);
            }
        }
    }
    Ok(created)
}

async fn generate_for_user(
    ctx: &JobContext,
    user_id: &str,
    date: NaiveDate,
) -> Result<bool, EmotionError> {
    let signals = {
        let pool = ctx.pool.clone();
        let user_id = user_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<_, EmotionError> {
            let conn = pool.get()?;
            store::signals_for_user_on(&conn, &user_id, date)
        })
        .await
        .map_err(|e| EmotionError::Join(e.to_string()))??
    };

    // Users with no classified chat turns get no report at all.
    if signals.is_empty() {
        return Ok(false);
    }

    let mut label_counts: BTreeMap<EmotionLabel, u32> = BTreeMap::new();
    for signal in &signals {
        *label_counts.entry(signal.label).or_insert(0) += 1;
    }
    let chat_count = signals.len() as u32;
    let summary = summarize(&label_counts, chat_count);

    let report = {
        let pool = ctx.pool.clone();
        let new_report = store::NewReport {
            user_id: user_id.to_string(),
            report_date: date,
            chat_count,
            label_counts,
            summary,
        };
        tokio::task::spawn_blocking(move || -> Result<EmotionReport, EmotionError> {
            let conn = pool.get()?;
            store::insert_report(&conn, &new_report)
        })
        .await
        .map_err(|e| EmotionError::Join(e.to_string()))??
    };

    tracing::info!(
        user_id = %user_id,
        %date,
        report_id = report.id,
        chat_count = report.chat_count,
        "generated daily emotion report"
    );

    // Fire-and-forget announcement; failure leaves the report unpushed for
    // the push job to deliver.
    let event = ReportGeneratedEvent {
        report_id: report.id,
        user_id: report.user_id.clone(),
        report_date: report.report_date,
    };
    if let Err(e) = ctx
        .transport
        .publish_keyed(
            topics::REPORT_GENERATED,
            Some(report.id.to_string()),
            &event,
        )
        .await
    {
        tracing::warn!(report_id = report.id, "failed to publish report event: {}", e);
    }

    notify_parent(ctx, &report).await;
    Ok(true)
}

/// Best-effort immediate push of a fresh report to the linked parent.
async fn notify_parent(ctx: &JobContext, report: &EmotionReport) {
    let Some(parent_id) = ctx.parents.parent_of(&report.user_id) else {
        tracing::debug!(user_id = %report.user_id, "no linked parent, skipping report push");
        return;
    };

    let frame = PushFrame::EmotionReport {
        payload: report.clone(),
    };
    if let Err(e) = ctx.registry.push(&parent_id, &frame).await {
        tracing::warn!(
            user_id = %report.user_id,
            parent_id = %parent_id,
            report_id = report.id,
            "failed to push report to parent: {}",
            e
        );
    }
}

/// Publishes every still-unpushed report of `date` and stamps it.
///
/// Publish-then-stamp is deliberately at-least-once: when the stamp write
/// fails after a successful publish, the report is re-selected and
/// re-published on the next run. Consumers that care must deduplicate on
/// report id.
async fn push_job(ctx: &JobContext, date: NaiveDate) -> Result<usize, EmotionError> {
    let reports = {
        let pool = ctx.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<EmotionReport>, EmotionError> {
            let conn = pool.get()?;
            store::unpushed_reports_on(&conn, date)
        })
        .await
        .map_err(|e| EmotionError::Join(e.to_string()))??
    };

    let mut pushed = 0;
    for report in reports {
        if let Err(e) = ctx
            .transport
            .publish_keyed(topics::REPORT_PUSH, Some(report.user_id.clone()), &report)
            .await
        {
            tracing::error!(
                report_id = report.id,
                user_id = %report.user_id,
                "failed to publish report push event: {}",
                e
            );
            continue;
        }

        let stamp = {
            let pool = ctx.pool.clone();
            let report_id = report.id;
            let now = Utc::now();
            tokio::task::spawn_blocking(move || -> Result<(), EmotionError> {
                let conn = pool.get()?;
                store::mark_pushed(&conn, report_id, now)
            })
            .await
            .map_err(|e| EmotionError::Join(e.to_string()))
            .and_then(|r| r)
        };
        if let Err(e) = stamp {
            tracing::error!(
                report_id = report.id,
                "published report but failed to stamp pushed_at, it will be re-pushed: {}",
                e
            );
            continue;
        }

        pushed += 1;
    }
    Ok(pushed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_until_later_today() {
        let now = "2025-06-01T10:00:00Z".parse::<DateTime<Utc>>().expect("valid");
        let at = NaiveTime::from_hms_opt(19, 0, 0).expect("valid");
        assert_eq!(
            duration_until(now, at),
            std::time::Duration::from_secs(9 * 3600)
        );
    }

    #[test]
    fn duration_until_rolls_to_tomorrow() {
        let now = "2025-06-01T20:30:00Z".parse::<DateTime<Utc>>().expect("valid");
        let at = NaiveTime::from_hms_opt(19, 0, 0).expect("valid");
        assert_eq!(
            duration_until(now, at),
            std::time::Duration::from_secs(22 * 3600 + 1800)
        );
    }
}
