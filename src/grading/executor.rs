use std::time::Instant;

use anyhow::Context;

use crate::core::state::GradingServices;
use crate::grading::model::{GradingJob, JobOutcome};
use crate::grading::paths;
use crate::grading::reports::student_mark_email;
use crate::grading::test_result;

/// Calls the grader for one student and stores the raw result.
///
/// Never fails: anything that goes wrong is folded into `JobOutcome::Failed`
/// so sibling jobs are unaffected.
pub(crate) async fn grade_student(services: &GradingServices, job: &GradingJob) -> JobOutcome {
    let started = Instant::now();
    tracing::info!(assignment = %job.assignment, email = %job.student.email, "Calling grader");

    let outcome = match run_job(services, job).await {
        Ok(total_mark) => {
            tracing::info!(
                assignment = %job.assignment,
                email = %job.student.email,
                total_mark,
                "Saved test result"
            );
            JobOutcome::Graded { email: job.student.email.clone(), total_mark }
        }
        Err(err) => {
            let reason = format!("{err:#}");
            tracing::error!(
                assignment = %job.assignment,
                email = %job.student.email,
                error = %reason,
                "Grading job failed"
            );
            JobOutcome::Failed { email: job.student.email.clone(), reason }
        }
    };

    let status = if outcome.is_graded() { "graded" } else { "failed" };
    metrics::counter!("grading_jobs_total", "status" => status).increment(1);
    metrics::histogram!("grading_duration_seconds").record(started.elapsed().as_secs_f64());

    outcome
}

async fn run_job(services: &GradingServices, job: &GradingJob) -> anyhow::Result<Option<i64>> {
    let document = services.grader().grade(job).await?;

    let key = paths::test_result_key(&job.assignment, &job.student.email, job.grade_time);
    services
        .results()
        .put(&key, document_content_type(&document), document.clone().into_bytes())
        .await
        .with_context(|| format!("Failed to store test result {key}"))?;

    let marks = match test_result::parse_marks(&document) {
        Ok(marks) => marks,
        Err(err) => {
            tracing::warn!(
                assignment = %job.assignment,
                email = %job.student.email,
                error = %err,
                "Stored test result could not be scored"
            );
            return Ok(None);
        }
    };
    let total: i64 = marks.values().map(|mark| i64::from(*mark)).sum();

    if job.send_mark_email {
        let (message, attachments) = student_mark_email(job, &marks, &document);
        if let Err(err) = services.mailer().send(message, attachments).await {
            tracing::warn!(
                assignment = %job.assignment,
                email = %job.student.email,
                error = format!("{err:#}"),
                "Failed to email student mark"
            );
        }
    }

    Ok(Some(total))
}

fn document_content_type(document: &str) -> &'static str {
    if document.trim_start().starts_with('{') {
        "application/json"
    } else {
        "application/xml"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{self, GraderScript, TestHarness};

    #[tokio::test]
    async fn graded_result_is_stored_under_minute_key() {
        let harness = TestHarness::new();
        harness.grader.script("a@school.test", GraderScript::Respond(r#"{"T1":5,"T2":3}"#.into()));
        let job = test_support::job("lab1", "http://grader.test", "a@school.test");

        let outcome = grade_student(&harness.services, &job).await;

        assert_eq!(
            outcome,
            JobOutcome::Graded { email: "a@school.test".to_string(), total_mark: Some(8) }
        );
        let stored = harness.results.snapshot();
        let object = &stored["lab1/a@school.test/2025/03/03/10/00/TestResult.xml"];
        assert_eq!(object.content_type, "application/json");
        assert!(harness.mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn grader_failure_becomes_failed_outcome() {
        let harness = TestHarness::new();
        harness.grader.script("a@school.test", GraderScript::Fail("timed out".into()));
        let job = test_support::job("lab1", "http://grader.test", "a@school.test");

        let outcome = grade_student(&harness.services, &job).await;

        assert!(matches!(outcome, JobOutcome::Failed { ref reason, .. } if reason.contains("timed out")));
        assert!(harness.results.snapshot().is_empty());
    }

    #[tokio::test]
    async fn student_is_emailed_when_enabled() {
        let harness = TestHarness::new();
        harness.grader.script("a@school.test", GraderScript::Respond(r#"{"T1":2}"#.into()));
        let mut job = test_support::job("lab1", "http://grader.test", "a@school.test");
        job.send_mark_email = true;

        grade_student(&harness.services, &job).await;

        assert_eq!(harness.mailer.recipients(), vec!["a@school.test".to_string()]);
    }

    #[tokio::test]
    async fn student_mail_failure_does_not_fail_the_job() {
        let harness = TestHarness::new();
        harness.grader.script("a@school.test", GraderScript::Respond(r#"{"T1":2}"#.into()));
        harness.mailer.fail_for("a@school.test");
        let mut job = test_support::job("lab1", "http://grader.test", "a@school.test");
        job.send_mark_email = true;

        let outcome = grade_student(&harness.services, &job).await;

        assert!(outcome.is_graded());
    }

    #[tokio::test]
    async fn unscorable_result_is_kept_without_total() {
        let harness = TestHarness::new();
        harness.grader.script("a@school.test", GraderScript::Respond("{not json".into()));
        let job = test_support::job("lab1", "http://grader.test", "a@school.test");

        let outcome = grade_student(&harness.services, &job).await;

        assert_eq!(
            outcome,
            JobOutcome::Graded { email: "a@school.test".to_string(), total_mark: None }
        );
        assert_eq!(harness.results.snapshot().len(), 1);
    }
}
