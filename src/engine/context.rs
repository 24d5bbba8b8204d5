use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;

/// How many times an activity may run before its failure reaches the orchestration.
///
/// `max_attempts` counts the first run, so `1` means no retry at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RetryPolicy {
    max_attempts: u32,
    first_retry_interval: Duration,
}

impl RetryPolicy {
    pub(crate) fn new(max_attempts: u32, first_retry_interval: Duration) -> Self {
        Self { max_attempts: max_attempts.max(1), first_retry_interval }
    }

    pub(crate) fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub(crate) fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub(crate) fn first_retry_interval(&self) -> Duration {
        self.first_retry_interval
    }
}

/// An isolated unit of I/O invoked by an orchestration.
///
/// Implementations must tolerate being re-run with the same input.
#[async_trait]
pub(crate) trait Activity: Send + Sync {
    type Input: Send + Sync;
    type Output: Serialize + DeserializeOwned + Send;

    fn name(&self) -> &'static str;

    async fn run(&self, input: &Self::Input) -> anyhow::Result<Self::Output>;
}

#[derive(Debug, Error)]
pub(crate) enum ActivityError {
    #[error("activity {name} failed after {attempts} attempt(s): {message}")]
    Failed { name: &'static str, attempts: u32, message: String },
    #[error("journal slot {sequence} holds {recorded} but {requested} was requested")]
    Nondeterministic { sequence: u64, recorded: String, requested: &'static str },
    #[error("journal entry for {name} could not be decoded: {message}")]
    Journal { name: &'static str, message: String },
}

#[derive(Debug, Clone)]
struct JournalEntry {
    activity: String,
    output: Value,
}

/// Completed activity outputs of one instance, keyed by dispatch sequence.
#[derive(Debug, Default)]
pub(crate) struct Journal {
    entries: Mutex<BTreeMap<u64, JournalEntry>>,
}

impl Journal {
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    fn get(&self, sequence: u64) -> Option<JournalEntry> {
        self.entries.lock().ok().and_then(|entries| entries.get(&sequence).cloned())
    }

    fn record(&self, sequence: u64, activity: &str, output: Value) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(sequence, JournalEntry { activity: activity.to_string(), output });
        }
    }
}

/// Deterministic view handed to an orchestration body.
///
/// Time comes from the instance record and every activity call is matched
/// against the journal by the order in which it was dispatched.
pub(crate) struct OrchestrationContext {
    instance_id: String,
    current_time: OffsetDateTime,
    journal: Arc<Journal>,
    next_sequence: AtomicU64,
}

impl OrchestrationContext {
    pub(crate) fn new(instance_id: String, current_time: OffsetDateTime, journal: Arc<Journal>) -> Self {
        Self { instance_id, current_time, journal, next_sequence: AtomicU64::new(0) }
    }

    pub(crate) fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub(crate) fn current_time(&self) -> OffsetDateTime {
        self.current_time
    }

    /// The sequence slot is claimed when this is called, not when the future is first polled.
    pub(crate) fn call_activity<'a, A: Activity>(
        &'a self,
        activity: &'a A,
        input: A::Input,
        retry: RetryPolicy,
    ) -> impl Future<Output = Result<A::Output, ActivityError>> + Send + 'a
    where
        A::Input: 'a,
    {
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);

        async move {
            let name = activity.name();

            if let Some(entry) = self.journal.get(sequence) {
                if entry.activity != name {
                    return Err(ActivityError::Nondeterministic {
                        sequence,
                        recorded: entry.activity,
                        requested: name,
                    });
                }
                tracing::debug!(instance_id = %self.instance_id, activity = name, sequence, "Replaying activity from journal");
                return serde_json::from_value(entry.output)
                    .map_err(|err| ActivityError::Journal { name, message: err.to_string() });
            }

            let mut attempt = 1;
            loop {
                match activity.run(&input).await {
                    Ok(output) => {
                        match serde_json::to_value(&output) {
                            Ok(value) => self.journal.record(sequence, name, value),
                            Err(err) => tracing::warn!(
                                instance_id = %self.instance_id,
                                activity = name,
                                error = %err,
                                "Activity output could not be journaled"
                            ),
                        }
                        return Ok(output);
                    }
                    Err(err) if attempt < retry.max_attempts() => {
                        tracing::warn!(
                            instance_id = %self.instance_id,
                            activity = name,
                            attempt,
                            max_attempts = retry.max_attempts(),
                            error = format!("{err:#}"),
                            "Activity failed; retrying"
                        );
                        tokio::time::sleep(retry.first_retry_interval()).await;
                        attempt += 1;
                    }
                    Err(err) => {
                        return Err(ActivityError::Failed {
                            name,
                            attempts: attempt,
                            message: format!("{err:#}"),
                        });
                    }
                }
            }
        }
    }
}
