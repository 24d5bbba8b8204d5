use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::core::state::GradingServices;
use crate::engine::Activity;
use crate::grading::executor::grade_student;
use crate::grading::model::{AssignmentSnapshot, GradingJob, JobOutcome};
use crate::grading::reports::{save_accumulated_marks, save_today_marks, ReportOutcome};
use crate::grading::trigger::select_due;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct AssignmentListRequest {
    pub(crate) ignore_schedule: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub(crate) now: OffsetDateTime,
}

/// Loads assignments due at `now` (or all of them) with their rosters.
pub(crate) struct GetAssignmentList {
    services: GradingServices,
}

impl GetAssignmentList {
    pub(crate) fn new(services: GradingServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Activity for GetAssignmentList {
    type Input = AssignmentListRequest;
    type Output = Vec<AssignmentSnapshot>;

    fn name(&self) -> &'static str {
        "GetAssignmentList"
    }

    async fn run(&self, input: &AssignmentListRequest) -> anyhow::Result<Vec<AssignmentSnapshot>> {
        let assignments = self.services.entities().list_assignments().await?;
        let due = select_due(assignments, input.now, input.ignore_schedule);

        let mut snapshots = Vec::with_capacity(due.len());
        for assignment in due {
            let students = self
                .services
                .entities()
                .credentials_for_project(&assignment.name)
                .await
                .with_context(|| format!("Failed to load roster for {}", assignment.name))?;

            snapshots.push(AssignmentSnapshot {
                name: assignment.name,
                teacher_email: assignment.teacher_email,
                send_mark_email_to_students: assignment.send_mark_email_to_students,
                grade_time: input.now,
                grader_url: assignment.grader_url,
                students,
            });
        }
        Ok(snapshots)
    }
}

pub(crate) struct RunAndSaveTestResult {
    services: GradingServices,
}

impl RunAndSaveTestResult {
    pub(crate) fn new(services: GradingServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Activity for RunAndSaveTestResult {
    type Input = GradingJob;
    type Output = JobOutcome;

    fn name(&self) -> &'static str {
        "RunAndSaveTestResult"
    }

    async fn run(&self, job: &GradingJob) -> anyhow::Result<JobOutcome> {
        Ok(grade_student(&self.services, job).await)
    }
}

pub(crate) struct SaveAccumulatedMarks {
    services: GradingServices,
}

impl SaveAccumulatedMarks {
    pub(crate) fn new(services: GradingServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Activity for SaveAccumulatedMarks {
    type Input = AssignmentSnapshot;
    type Output = ReportOutcome;

    fn name(&self) -> &'static str {
        "SaveAccumulatedMarks"
    }

    async fn run(&self, snapshot: &AssignmentSnapshot) -> anyhow::Result<ReportOutcome> {
        save_accumulated_marks(&self.services, snapshot).await
    }
}

pub(crate) struct SaveTodayMarks {
    services: GradingServices,
}

impl SaveTodayMarks {
    pub(crate) fn new(services: GradingServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Activity for SaveTodayMarks {
    type Input = AssignmentSnapshot;
    type Output = ReportOutcome;

    fn name(&self) -> &'static str {
        "SaveTodayMarks"
    }

    async fn run(&self, snapshot: &AssignmentSnapshot) -> anyhow::Result<ReportOutcome> {
        save_today_marks(&self.services, snapshot).await
    }
}
