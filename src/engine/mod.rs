//! In-process orchestration runtime.
//!
//! An instance fixes its logical start time when it is created and journals
//! every successful activity output. Restarting a failed instance replays the
//! journal, so completed grading calls are not repeated.

mod context;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::core::state::GradingServices;
use crate::core::time::truncate_to_seconds;
use crate::tasks::orchestrations;

pub(crate) use context::{Activity, ActivityError, Journal, OrchestrationContext, RetryPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum OrchestrationKind {
    ScheduledGrader,
    DailyGrader,
}

impl OrchestrationKind {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            OrchestrationKind::ScheduledGrader => "scheduled_grader",
            OrchestrationKind::DailyGrader => "daily_grader",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "runtime_status", rename_all = "snake_case")]
pub(crate) enum InstanceStatus {
    Pending,
    Running,
    Completed,
    Failed { error: String },
}

impl InstanceStatus {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Pending => "pending",
            InstanceStatus::Running => "running",
            InstanceStatus::Completed => "completed",
            InstanceStatus::Failed { .. } => "failed",
        }
    }

    pub(crate) fn is_terminal(&self) -> bool {
        matches!(self, InstanceStatus::Completed | InstanceStatus::Failed { .. })
    }
}

#[derive(Debug, Error)]
pub(crate) enum EngineError {
    #[error("orchestration instance {0} not found")]
    NotFound(String),
    #[error("orchestration instance {id} is {status} and cannot be restarted")]
    NotRestartable { id: String, status: &'static str },
}

/// Point-in-time view of one instance.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct InstanceSnapshot {
    pub(crate) id: String,
    pub(crate) kind: OrchestrationKind,
    pub(crate) ignore_schedule: bool,
    #[serde(flatten)]
    pub(crate) status: InstanceStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub(crate) current_time: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub(crate) created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub(crate) last_updated_at: OffsetDateTime,
    pub(crate) runs: u32,
    pub(crate) journaled_activities: usize,
    pub(crate) output: Option<Value>,
}

struct InstanceRecord {
    kind: OrchestrationKind,
    ignore_schedule: bool,
    status: InstanceStatus,
    current_time: OffsetDateTime,
    created_at: OffsetDateTime,
    last_updated_at: OffsetDateTime,
    runs: u32,
    journal: Arc<Journal>,
    output: Option<Value>,
}

impl InstanceRecord {
    fn snapshot(&self, id: &str) -> InstanceSnapshot {
        InstanceSnapshot {
            id: id.to_string(),
            kind: self.kind,
            ignore_schedule: self.ignore_schedule,
            status: self.status.clone(),
            current_time: self.current_time,
            created_at: self.created_at,
            last_updated_at: self.last_updated_at,
            runs: self.runs,
            journaled_activities: self.journal.len(),
            output: self.output.clone(),
        }
    }
}

/// Finished instances older than this are dropped when a new one is created.
pub(crate) const DEFAULT_INSTANCE_RETENTION: time::Duration = time::Duration::DAY;

#[derive(Clone)]
pub(crate) struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    services: GradingServices,
    retention: time::Duration,
    instances: RwLock<HashMap<String, InstanceRecord>>,
}

impl Engine {
    pub(crate) fn new(services: GradingServices) -> Self {
        Self::with_retention(services, DEFAULT_INSTANCE_RETENTION)
    }

    pub(crate) fn with_retention(services: GradingServices, retention: time::Duration) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                services,
                retention,
                instances: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Creates an instance and runs it in the background; returns its id immediately.
    pub(crate) fn schedule(&self, kind: OrchestrationKind, ignore_schedule: bool) -> String {
        let id = self.create(kind, ignore_schedule, OffsetDateTime::now_utc());
        let engine = self.clone();
        let instance_id = id.clone();
        tokio::spawn(async move {
            engine.execute(&instance_id).await;
        });
        id
    }

    /// Creates an instance with the given logical start time and runs it to completion.
    pub(crate) async fn run_at(
        &self,
        kind: OrchestrationKind,
        ignore_schedule: bool,
        now: OffsetDateTime,
    ) -> Option<InstanceSnapshot> {
        let id = self.create(kind, ignore_schedule, now);
        self.execute(&id).await
    }

    /// Re-runs a failed instance in the background with its original start time and journal.
    pub(crate) fn restart(&self, id: &str) -> Result<(), EngineError> {
        self.prepare_restart(id)?;
        let engine = self.clone();
        let instance_id = id.to_string();
        tokio::spawn(async move {
            engine.execute(&instance_id).await;
        });
        Ok(())
    }

    /// Foreground form of [`Engine::restart`].
    pub(crate) async fn rerun(&self, id: &str) -> Result<Option<InstanceSnapshot>, EngineError> {
        self.prepare_restart(id)?;
        Ok(self.execute(id).await)
    }

    pub(crate) fn instance_count(&self) -> usize {
        self.inner.instances.read().map(|instances| instances.len()).unwrap_or(0)
    }

    pub(crate) fn status(&self, id: &str) -> Option<InstanceSnapshot> {
        let instances = self.inner.instances.read().ok()?;
        instances.get(id).map(|record| record.snapshot(id))
    }

    fn create(&self, kind: OrchestrationKind, ignore_schedule: bool, now: OffsetDateTime) -> String {
        let id = Uuid::new_v4().simple().to_string();
        let now = truncate_to_seconds(now);
        let record = InstanceRecord {
            kind,
            ignore_schedule,
            status: InstanceStatus::Pending,
            current_time: now,
            created_at: now,
            last_updated_at: now,
            runs: 0,
            journal: Arc::default(),
            output: None,
        };

        if let Ok(mut instances) = self.inner.instances.write() {
            let pruned =
                prune_expired(&mut instances, self.inner.retention, OffsetDateTime::now_utc());
            if pruned > 0 {
                tracing::debug!(pruned, "Dropped expired orchestration instances");
            }
            instances.insert(id.clone(), record);
        }
        tracing::info!(instance_id = %id, kind = kind.as_str(), ignore_schedule, "Orchestration scheduled");
        id
    }

    fn prepare_restart(&self, id: &str) -> Result<(), EngineError> {
        let mut instances = self
            .inner
            .instances
            .write()
            .map_err(|_| EngineError::NotFound(id.to_string()))?;
        let record = instances.get_mut(id).ok_or_else(|| EngineError::NotFound(id.to_string()))?;

        if !matches!(record.status, InstanceStatus::Failed { .. }) {
            return Err(EngineError::NotRestartable {
                id: id.to_string(),
                status: record.status.as_str(),
            });
        }

        record.status = InstanceStatus::Pending;
        record.last_updated_at = OffsetDateTime::now_utc();
        tracing::info!(instance_id = %id, journaled = record.journal.len(), "Orchestration restart requested");
        Ok(())
    }

    async fn execute(&self, id: &str) -> Option<InstanceSnapshot> {
        let (kind, ignore_schedule, current_time, journal) = {
            let mut instances = self.inner.instances.write().ok()?;
            let record = instances.get_mut(id)?;
            record.status = InstanceStatus::Running;
            record.runs += 1;
            record.last_updated_at = OffsetDateTime::now_utc();
            (record.kind, record.ignore_schedule, record.current_time, record.journal.clone())
        };

        let ctx = OrchestrationContext::new(id.to_string(), current_time, journal);
        let result = orchestrations::run(kind, &ctx, &self.inner.services, ignore_schedule).await;

        let (status, output) = match result {
            Ok(output) => {
                tracing::info!(instance_id = %id, kind = kind.as_str(), "Orchestration completed");
                (InstanceStatus::Completed, Some(output))
            }
            Err(err) => {
                let error = format!("{err:#}");
                tracing::error!(instance_id = %id, kind = kind.as_str(), error = %error, "Orchestration failed");
                (InstanceStatus::Failed { error }, None)
            }
        };
        metrics::counter!(
            "orchestrations_total",
            "kind" => kind.as_str(),
            "status" => status.as_str()
        )
        .increment(1);

        let mut instances = self.inner.instances.write().ok()?;
        let record = instances.get_mut(id)?;
        record.status = status;
        record.output = output;
        record.last_updated_at = OffsetDateTime::now_utc();
        Some(record.snapshot(id))
    }
}

/// Removes finished instances last touched at least `retention` before `now`.
fn prune_expired(
    instances: &mut HashMap<String, InstanceRecord>,
    retention: time::Duration,
    now: OffsetDateTime,
) -> usize {
    let before = instances.len();
    instances.retain(|_, record| {
        !(record.status.is_terminal() && now - record.last_updated_at >= retention)
    });
    before - instances.len()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::test_support::TestHarness;
    use time::macros::datetime;

    #[tokio::test]
    async fn unknown_instances_are_reported() {
        let harness = TestHarness::new();
        let engine = Engine::new(harness.services.clone());

        assert!(engine.status("missing").is_none());
        assert!(matches!(engine.restart("missing"), Err(EngineError::NotFound(_))));
    }

    #[tokio::test]
    async fn completed_instances_cannot_be_restarted() {
        let harness = TestHarness::new();
        let engine = Engine::new(harness.services.clone());

        let snapshot = engine
            .run_at(OrchestrationKind::DailyGrader, true, datetime!(2025-03-03 00:00 UTC))
            .await
            .expect("instance");

        assert_eq!(snapshot.status, InstanceStatus::Completed);
        assert!(matches!(
            engine.restart(&snapshot.id),
            Err(EngineError::NotRestartable { status: "completed", .. })
        ));
    }

    #[tokio::test]
    async fn scheduled_instance_runs_in_background() {
        let harness = TestHarness::new();
        let engine = Engine::new(harness.services.clone());

        let id = engine.schedule(OrchestrationKind::DailyGrader, true);

        let mut status = engine.status(&id).expect("instance").status;
        for _ in 0..100 {
            if status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            status = engine.status(&id).expect("instance").status;
        }
        assert_eq!(status, InstanceStatus::Completed);
    }

    #[tokio::test]
    async fn logical_time_is_truncated_to_seconds() {
        let harness = TestHarness::new();
        let engine = Engine::new(harness.services.clone());

        let snapshot = engine
            .run_at(OrchestrationKind::DailyGrader, true, datetime!(2025-03-03 00:00:01.750 UTC))
            .await
            .expect("instance");

        assert_eq!(snapshot.current_time, datetime!(2025-03-03 00:00:01 UTC));
        assert_eq!(snapshot.runs, 1);
    }

    #[tokio::test]
    async fn expired_instances_are_dropped_on_create() {
        let harness = TestHarness::new();
        let engine = Engine::with_retention(harness.services.clone(), time::Duration::ZERO);

        let first = engine
            .run_at(OrchestrationKind::DailyGrader, true, datetime!(2025-03-03 00:00 UTC))
            .await
            .expect("first");
        assert_eq!(first.status, InstanceStatus::Completed);

        let second = engine
            .run_at(OrchestrationKind::DailyGrader, true, datetime!(2025-03-04 00:00 UTC))
            .await
            .expect("second");

        assert!(engine.status(&first.id).is_none());
        assert!(engine.status(&second.id).is_some());
        assert_eq!(engine.instance_count(), 1);
    }

    #[tokio::test]
    async fn recent_instances_are_kept() {
        let harness = TestHarness::new();
        let engine = Engine::new(harness.services.clone());

        let first = engine
            .run_at(OrchestrationKind::DailyGrader, true, datetime!(2025-03-03 00:00 UTC))
            .await
            .expect("first");
        engine
            .run_at(OrchestrationKind::DailyGrader, true, datetime!(2025-03-04 00:00 UTC))
            .await
            .expect("second");

        assert!(engine.status(&first.id).is_some());
        assert_eq!(engine.instance_count(), 2);
    }

    #[test]
    fn only_finished_instances_expire() {
        let now = datetime!(2025-03-04 12:00 UTC);
        let record = |status: InstanceStatus, last_updated_at: OffsetDateTime| InstanceRecord {
            kind: OrchestrationKind::ScheduledGrader,
            ignore_schedule: false,
            status,
            current_time: last_updated_at,
            created_at: last_updated_at,
            last_updated_at,
            runs: 1,
            journal: Arc::default(),
            output: None,
        };
        let mut instances = HashMap::new();
        let day_ago = now - time::Duration::DAY;
        let two_days_ago = now - time::Duration::days(2);
        let failed = InstanceStatus::Failed { error: "boom".into() };
        instances.insert("old-done".to_string(), record(InstanceStatus::Completed, day_ago));
        instances.insert("old-failed".to_string(), record(failed, two_days_ago));
        instances.insert("old-running".to_string(), record(InstanceStatus::Running, two_days_ago));
        instances.insert(
            "fresh-done".to_string(),
            record(InstanceStatus::Completed, now - time::Duration::hours(1)),
        );

        let pruned = prune_expired(&mut instances, time::Duration::DAY, now);

        assert_eq!(pruned, 2);
        let mut left: Vec<_> = instances.keys().cloned().collect();
        left.sort();
        assert_eq!(left, vec!["fresh-done".to_string(), "old-running".to_string()]);
    }
}
