use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::{GatewayError, Result};
use crate::store::models::{SyncFrequency, SyncSchedule};
use crate::store::Store;

use super::{SyncOptions, SyncOrchestrator};

/// `custom` frequency requires an explicit interval of at least one hour.
pub fn validate(frequency: SyncFrequency, custom_interval_hours: Option<u32>) -> Result<()> {
    if frequency == SyncFrequency::Custom {
        match custom_interval_hours {
            Some(hours) if hours >= 1 => Ok(()),
            _ => Err(GatewayError::Validation(
                "custom frequency requires interval_hours >= 1".to_string(),
            )),
        }
    } else {
        Ok(())
    }
}

/// Next run instant relative to the last run (or now, if never run).
pub fn next_run_at(
    frequency: SyncFrequency,
    custom_interval_hours: Option<u32>,
    last_run_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    let base = last_run_at.unwrap_or(now);
    let step = match frequency {
        SyncFrequency::Hourly => Duration::hours(1),
        SyncFrequency::Daily => Duration::hours(24),
        SyncFrequency::Custom => Duration::hours(custom_interval_hours.unwrap_or(1) as i64),
    };
    base + step
}

/// Background poller that runs due schedules.
///
/// Wakes on a fixed interval, runs each enabled schedule whose
/// `next_run_at` has passed, then advances `last_run_at`/`next_run_at`
/// whether the run succeeded or not, so a failing schedule cannot hot-loop.
pub fn spawn_schedule_poller(
    store: Arc<dyn Store>,
    orchestrator: Arc<SyncOrchestrator>,
    interval: std::time::Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            sleep(interval).await;

            let now = Utc::now();
            let due = match store.due_schedules(now).await {
                Ok(due) => due,
                Err(err) => {
                    warn!(error = %err, "failed to list due schedules");
                    continue;
                }
            };

            for schedule in due {
                run_schedule(&store, &orchestrator, &schedule, now).await;
            }
        }
    })
}

async fn run_schedule(
    store: &Arc<dyn Store>,
    orchestrator: &Arc<SyncOrchestrator>,
    schedule: &SyncSchedule,
    now: DateTime<Utc>,
) {
    info!(
        schedule_id = %schedule.id,
        credential_id = %schedule.credential_id,
        sync_type = %schedule.sync_type,
        "running scheduled sync"
    );

    let outcome = orchestrator
        .sync_data(
            &schedule.credential_id,
            &[schedule.sync_type],
            &SyncOptions::default(),
        )
        .await;
    if let Err(err) = outcome {
        warn!(schedule_id = %schedule.id, error = %err, "scheduled sync failed");
    }

    let next = next_run_at(
        schedule.frequency,
        schedule.custom_interval_hours,
        Some(now),
        now,
    );
    if let Err(err) = store.record_schedule_run(&schedule.id, now, next).await {
        warn!(schedule_id = %schedule.id, error = %err, "failed to advance schedule");
    }
}
