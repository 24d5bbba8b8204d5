use std::collections::BTreeMap;

use anyhow::Context;
use time::{Duration, OffsetDateTime};

use crate::core::time::truncate_to_minute;
use crate::grading::model::Report;
use crate::grading::paths::{self, TestResultKey};
use crate::grading::test_result;
use crate::services::storage::ObjectStore;

/// Which stored results feed a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReportWindow {
    /// Results keyed in the 24 hours up to and including `now`, compared at
    /// minute resolution so a run on the daily tick still sees the previous tick.
    Today,
    /// Every result graded up to and including `now`.
    Accumulated,
}

impl ReportWindow {
    pub(crate) fn contains(self, grade_time: OffsetDateTime, now: OffsetDateTime) -> bool {
        if grade_time > now {
            return false;
        }
        match self {
            ReportWindow::Today => grade_time >= truncate_to_minute(now) - Duration::DAY,
            ReportWindow::Accumulated => true,
        }
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            ReportWindow::Today => "today",
            ReportWindow::Accumulated => "accumulated",
        }
    }
}

/// Builds the per-student report for one assignment from the result store.
///
/// Missing or unreadable documents are skipped. Listing or transport
/// failures are returned so the caller's retry policy can apply.
pub(crate) async fn calculate_marks(
    results: &dyn ObjectStore,
    assignment: &str,
    window: ReportWindow,
    now: OffsetDateTime,
) -> anyhow::Result<Report> {
    let keys = results
        .list(&paths::test_result_prefix(assignment))
        .await
        .with_context(|| format!("Failed to list test results for {assignment}"))?;

    let mut selected: Vec<(TestResultKey, String)> = keys
        .into_iter()
        .filter_map(|key| paths::parse_test_result_key(assignment, &key).map(|parsed| (parsed, key)))
        .filter(|(parsed, _)| window.contains(parsed.grade_time, now))
        .collect();
    selected.sort_by(|(a, _), (b, _)| (a.grade_time, &a.email).cmp(&(b.grade_time, &b.email)));

    let mut graded = Vec::with_capacity(selected.len());
    for (parsed, key) in selected {
        let Some(bytes) = results.get(&key).await.with_context(|| format!("Failed to read {key}"))?
        else {
            tracing::warn!(assignment, key = %key, "Test result disappeared before it could be read");
            continue;
        };

        let document = String::from_utf8_lossy(&bytes);
        match test_result::parse_marks(&document) {
            Ok(marks) => graded.push((parsed, marks)),
            Err(err) => {
                tracing::warn!(assignment, key = %key, error = %err, "Skipping unreadable test result");
            }
        }
    }

    Ok(fold_results(graded))
}

/// Later results overwrite earlier ones test by test; input must be in grade-time order.
pub(crate) fn fold_results(
    results: impl IntoIterator<Item = (TestResultKey, BTreeMap<String, i32>)>,
) -> Report {
    let mut report = Report::new();
    for (key, marks) in results {
        if marks.is_empty() {
            continue;
        }
        let details = report.entry(key.email).or_default();
        for (test, mark) in marks {
            details.record(&test, mark, key.grade_time);
        }
    }
    report
}
