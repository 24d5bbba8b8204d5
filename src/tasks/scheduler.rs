use anyhow::{Context, Result};
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::time::{sleep, Duration};

use crate::core::state::AppState;
use crate::engine::OrchestrationKind;
use crate::grading::trigger;

/// A tick later than this is logged as running late.
const LATE_TICK_TOLERANCE_SECONDS: i64 = 30;

/// Backoff when the schedule has no further occurrence or cannot be evaluated.
const IDLE_RETRY: Duration = Duration::from_secs(60);

pub(crate) async fn run(state: AppState) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = spawn_timers(&state, shutdown_rx)?;

    crate::core::shutdown::shutdown_signal().await;
    if shutdown_tx.send(true).is_err() {
        tracing::warn!("Failed to broadcast shutdown signal to timers");
    }

    for handle in handles {
        if let Err(err) = handle.await {
            tracing::error!(error = %err, "Timer task join failed");
        }
    }

    Ok(())
}

/// Starts both orchestration timers; fails fast on an invalid schedule.
pub(crate) fn spawn_timers(
    state: &AppState,
    shutdown: watch::Receiver<bool>,
) -> Result<Vec<tokio::task::JoinHandle<()>>> {
    let grading = state.settings().grading();
    let timers = [
        (OrchestrationKind::ScheduledGrader, grading.schedule_grader_cron.clone()),
        (OrchestrationKind::DailyGrader, grading.daily_grader_cron.clone()),
    ];

    let mut handles = Vec::with_capacity(timers.len());
    for (kind, expression) in timers {
        trigger::parse_schedule(&expression)
            .with_context(|| format!("Invalid {} timer schedule", kind.as_str()))?;
        tracing::info!(kind = kind.as_str(), cron = %expression, "Timer registered");
        handles.push(tokio::spawn(timer_loop(state.clone(), kind, expression, shutdown.clone())));
    }
    Ok(handles)
}

async fn timer_loop(
    state: AppState,
    kind: OrchestrationKind,
    expression: String,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        let now = OffsetDateTime::now_utc();
        let occurrence = match trigger::next_occurrence(&expression, now) {
            Ok(Some(occurrence)) => occurrence,
            Ok(None) => {
                tracing::warn!(kind = kind.as_str(), cron = %expression, "Timer schedule has no next occurrence");
                if idle(&mut shutdown, IDLE_RETRY).await {
                    break;
                }
                continue;
            }
            Err(err) => {
                tracing::error!(kind = kind.as_str(), error = %err, "Timer schedule evaluation failed");
                if idle(&mut shutdown, IDLE_RETRY).await {
                    break;
                }
                continue;
            }
        };

        let wait = Duration::try_from(occurrence - now).unwrap_or_default();
        if idle(&mut shutdown, wait).await {
            break;
        }

        let fired_at = OffsetDateTime::now_utc();
        let lateness = (fired_at - occurrence).whole_seconds();
        if lateness > LATE_TICK_TOLERANCE_SECONDS {
            tracing::warn!(kind = kind.as_str(), lateness_seconds = lateness, "Timer is running late");
        }

        let instance_id = state.engine().schedule(kind, false);
        tracing::info!(kind = kind.as_str(), instance_id = %instance_id, "Timer fired");
    }
}

/// Sleeps for `duration`; returns `true` if shutdown was signalled first.
async fn idle(shutdown: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    tokio::select! {
        _ = shutdown.changed() => true,
        _ = sleep(duration) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestHarness;

    #[tokio::test]
    async fn invalid_timer_schedule_is_rejected() {
        let harness = TestHarness::new();
        let settings = {
            let _guard = crate::test_support::env_lock();
            crate::test_support::set_test_env();
            std::env::set_var("SCHEDULE_GRADER_CRON", "every five minutes");
            let settings = crate::core::config::Settings::load();
            std::env::remove_var("SCHEDULE_GRADER_CRON");
            settings.expect("settings")
        };
        let state = AppState::new(settings, harness.services.clone());
        let (_tx, rx) = watch::channel(false);

        assert!(spawn_timers(&state, rx).is_err());
    }

    #[tokio::test]
    async fn timers_stop_on_shutdown() {
        let harness = TestHarness::new();
        let (state, _app) = harness.app();
        let (tx, rx) = watch::channel(false);

        let handles = spawn_timers(&state, rx).expect("timers");
        tx.send(true).expect("broadcast");

        for handle in handles {
            tokio::time::timeout(std::time::Duration::from_secs(1), handle)
                .await
                .expect("timer stopped")
                .expect("join");
        }
    }
}
