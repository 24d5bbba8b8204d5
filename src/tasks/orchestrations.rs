use anyhow::Context;
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;

use crate::core::state::GradingServices;
use crate::engine::{Activity, OrchestrationContext, OrchestrationKind, RetryPolicy};
use crate::grading::jobs::build_jobs;
use crate::grading::model::{AssignmentSnapshot, GradingJob, JobOutcome};
use crate::grading::reports::ReportOutcome;
use crate::tasks::activities::{
    AssignmentListRequest, GetAssignmentList, RunAndSaveTestResult, SaveAccumulatedMarks,
    SaveTodayMarks,
};

#[derive(Debug, Clone, Default, Serialize)]
pub(crate) struct RunSummary {
    pub(crate) assignments: Vec<AssignmentSummary>,
    pub(crate) reports: Vec<ReportOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct AssignmentSummary {
    pub(crate) name: String,
    pub(crate) graded: usize,
    pub(crate) failed: Vec<String>,
}

impl AssignmentSummary {
    fn from_outcomes(name: &str, outcomes: &[JobOutcome]) -> Self {
        let graded = outcomes.iter().filter(|outcome| outcome.is_graded()).count();
        let failed = outcomes
            .iter()
            .filter(|outcome| !outcome.is_graded())
            .map(|outcome| outcome.email().to_string())
            .collect();
        Self { name: name.to_string(), graded, failed }
    }
}

pub(crate) async fn run(
    kind: OrchestrationKind,
    ctx: &OrchestrationContext,
    services: &GradingServices,
    ignore_schedule: bool,
) -> anyhow::Result<Value> {
    let summary = match kind {
        OrchestrationKind::ScheduledGrader => scheduled_grader(ctx, services, ignore_schedule).await?,
        OrchestrationKind::DailyGrader => daily_grader(ctx, services).await?,
    };
    serde_json::to_value(summary).context("Failed to serialize orchestration output")
}

/// Grades every student of every due assignment, then refreshes both reports.
///
/// Assignments are graded one after another; students of one assignment run
/// concurrently and a failed student never fails the run.
pub(crate) async fn scheduled_grader(
    ctx: &OrchestrationContext,
    services: &GradingServices,
    ignore_schedule: bool,
) -> anyhow::Result<RunSummary> {
    let assignments = list_assignments(ctx, services, ignore_schedule).await?;
    tracing::info!(
        instance_id = ctx.instance_id(),
        assignments = assignments.len(),
        ignore_schedule,
        "Grading due assignments"
    );

    let grader = RunAndSaveTestResult::new(services.clone());
    let mut summary = RunSummary::default();
    for assignment in &assignments {
        let outcomes = fan_out(ctx, &grader, build_jobs(assignment)).await;
        let assignment_summary = AssignmentSummary::from_outcomes(&assignment.name, &outcomes);
        tracing::info!(
            instance_id = ctx.instance_id(),
            assignment = %assignment.name,
            graded = assignment_summary.graded,
            failed = assignment_summary.failed.len(),
            "Assignment graded"
        );
        summary.assignments.push(assignment_summary);
    }

    let retry = services.persist_retry();
    let accumulated = SaveAccumulatedMarks::new(services.clone());
    summary.reports.extend(persist_reports(ctx, &accumulated, &assignments, retry).await?);
    let today = SaveTodayMarks::new(services.clone());
    summary.reports.extend(persist_reports(ctx, &today, &assignments, retry).await?);

    Ok(summary)
}

/// Rebuilds the daily report of every assignment without calling any grader.
pub(crate) async fn daily_grader(
    ctx: &OrchestrationContext,
    services: &GradingServices,
) -> anyhow::Result<RunSummary> {
    let assignments = list_assignments(ctx, services, true).await?;
    tracing::info!(
        instance_id = ctx.instance_id(),
        assignments = assignments.len(),
        "Saving daily marks"
    );

    let today = SaveTodayMarks::new(services.clone());
    let reports = persist_reports(ctx, &today, &assignments, services.persist_retry()).await?;
    Ok(RunSummary { assignments: Vec::new(), reports })
}

async fn list_assignments(
    ctx: &OrchestrationContext,
    services: &GradingServices,
    ignore_schedule: bool,
) -> anyhow::Result<Vec<AssignmentSnapshot>> {
    let activity = GetAssignmentList::new(services.clone());
    let request = AssignmentListRequest { ignore_schedule, now: ctx.current_time() };
    Ok(ctx.call_activity(&activity, request, RetryPolicy::no_retry()).await?)
}

async fn fan_out(
    ctx: &OrchestrationContext,
    grader: &RunAndSaveTestResult,
    jobs: Vec<GradingJob>,
) -> Vec<JobOutcome> {
    let emails: Vec<String> = jobs.iter().map(|job| job.student.email.clone()).collect();
    let calls: Vec<_> = jobs
        .into_iter()
        .map(|job| ctx.call_activity(grader, job, RetryPolicy::no_retry()))
        .collect();

    join_all(calls)
        .await
        .into_iter()
        .zip(emails)
        .map(|(result, email)| {
            result.unwrap_or_else(|err| JobOutcome::Failed { email, reason: err.to_string() })
        })
        .collect()
}

/// Runs one report pass for every assignment concurrently; any failure fails the run
/// once all passes have settled.
async fn persist_reports<A>(
    ctx: &OrchestrationContext,
    activity: &A,
    assignments: &[AssignmentSnapshot],
    retry: RetryPolicy,
) -> anyhow::Result<Vec<ReportOutcome>>
where
    A: Activity<Input = AssignmentSnapshot, Output = ReportOutcome>,
{
    let calls: Vec<_> = assignments
        .iter()
        .map(|assignment| ctx.call_activity(activity, assignment.clone(), retry))
        .collect();

    let mut outcomes = Vec::with_capacity(calls.len());
    let mut first_error = None;
    for result in join_all(calls).await {
        match result {
            Ok(outcome) => outcomes.push(outcome),
            Err(err) => {
                tracing::error!(
                    instance_id = ctx.instance_id(),
                    activity = activity.name(),
                    error = %err,
                    "Report pass failed"
                );
                first_error.get_or_insert(err);
            }
        }
    }

    match first_error {
        Some(err) => Err(err.into()),
        None => Ok(outcomes),
    }
}
