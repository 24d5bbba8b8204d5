use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::state::GradingServices;
use crate::core::time::format_display;
use crate::grading::marks::{calculate_marks, ReportWindow};
use crate::grading::model::{AssignmentSnapshot, GradingJob, Report};
use crate::grading::paths;
use crate::services::email::{EmailAttachment, EmailMessage};
use crate::services::spreadsheet::{marks_workbook, XLSX_CONTENT_TYPE};
use crate::services::storage::ObjectStore;

const JSON_CONTENT_TYPE: &str = "application/json";

/// What one report pass wrote for one assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ReportOutcome {
    pub(crate) assignment: String,
    pub(crate) students: usize,
    pub(crate) keys: Vec<String>,
    pub(crate) teacher_notified: bool,
}

/// Writes `todayMarks.json` to the latest and archive keys.
pub(crate) async fn save_today_marks(
    services: &GradingServices,
    snapshot: &AssignmentSnapshot,
) -> anyhow::Result<ReportOutcome> {
    let report =
        calculate_marks(services.results(), &snapshot.name, ReportWindow::Today, snapshot.grade_time)
            .await?;

    let json = report_json(&report)?;
    let keys =
        write_report(services.reports(), snapshot, paths::TODAY_MARKS_JSON, JSON_CONTENT_TYPE, json)
            .await?;

    tracing::info!(
        assignment = %snapshot.name,
        students = report.len(),
        "Saved today's marks"
    );

    Ok(ReportOutcome {
        assignment: snapshot.name.clone(),
        students: report.len(),
        keys,
        teacher_notified: false,
    })
}

/// Writes `accumulatedMarks.json` and `marks.xlsx`, then mails both to the teacher when one is set.
///
/// A mail failure fails the pass; the documents are already in place and a
/// retry rewrites them unchanged.
pub(crate) async fn save_accumulated_marks(
    services: &GradingServices,
    snapshot: &AssignmentSnapshot,
) -> anyhow::Result<ReportOutcome> {
    let report = calculate_marks(
        services.results(),
        &snapshot.name,
        ReportWindow::Accumulated,
        snapshot.grade_time,
    )
    .await?;

    let json = report_json(&report)?;
    let workbook = marks_workbook(&report)
        .with_context(|| format!("Failed to build workbook for {}", snapshot.name))?;

    let mut keys = write_report(
        services.reports(),
        snapshot,
        paths::ACCUMULATED_MARKS_JSON,
        JSON_CONTENT_TYPE,
        json.clone(),
    )
    .await?;
    keys.extend(
        write_report(services.reports(), snapshot, paths::MARKS_XLSX, XLSX_CONTENT_TYPE, workbook.clone())
            .await?,
    );

    let teacher_notified = match snapshot.teacher_email.as_deref().filter(|email| !email.is_empty()) {
        Some(teacher) => {
            let (message, attachments) = teacher_report_email(snapshot, teacher, json, workbook);
            services
                .mailer()
                .send(message, attachments)
                .await
                .with_context(|| format!("Failed to email report for {} to {teacher}", snapshot.name))?;
            true
        }
        None => false,
    };

    tracing::info!(
        assignment = %snapshot.name,
        students = report.len(),
        teacher_notified,
        "Saved accumulated marks"
    );

    Ok(ReportOutcome {
        assignment: snapshot.name.clone(),
        students: report.len(),
        keys,
        teacher_notified,
    })
}

fn report_json(report: &Report) -> anyhow::Result<Vec<u8>> {
    serde_json::to_vec_pretty(report).context("Failed to serialize report")
}

async fn write_report(
    store: &dyn ObjectStore,
    snapshot: &AssignmentSnapshot,
    report: &'static str,
    content_type: &str,
    bytes: Vec<u8>,
) -> anyhow::Result<Vec<String>> {
    let archive = paths::archive_report_key(&snapshot.name, snapshot.grade_time, report);
    let latest = paths::latest_report_key(&snapshot.name, report);

    for key in [&archive, &latest] {
        let stored = store
            .put(key, content_type, bytes.clone())
            .await
            .with_context(|| format!("Failed to write {key}"))?;
        tracing::debug!(key = %key, size = stored.size, sha256 = %stored.sha256, "Report written");
    }
    metrics::counter!("reports_written_total", "report" => report).increment(1);

    Ok(vec![archive, latest])
}

fn teacher_report_email(
    snapshot: &AssignmentSnapshot,
    teacher: &str,
    json: Vec<u8>,
    workbook: Vec<u8>,
) -> (EmailMessage, Vec<EmailAttachment>) {
    let message = EmailMessage {
        to: teacher.to_string(),
        subject: format!(
            "Accumulated Mark for {} on {} (UTC)",
            snapshot.name,
            format_display(snapshot.grade_time)
        ),
        body: format!(
            "Dear Teacher,\n\nPlease find the accumulated marks for {} attached.\n\nRegards,\nAutomatic Grading Engine",
            snapshot.name
        ),
    };
    let attachments = vec![
        EmailAttachment {
            filename: "accumulatedMarks.xlsx".to_string(),
            content_type: XLSX_CONTENT_TYPE.to_string(),
            bytes: workbook,
        },
        EmailAttachment {
            filename: paths::ACCUMULATED_MARKS_JSON.to_string(),
            content_type: JSON_CONTENT_TYPE.to_string(),
            bytes: json,
        },
    ];
    (message, attachments)
}

/// Mark summary sent to a student right after their result is stored.
pub(crate) fn student_mark_email(
    job: &GradingJob,
    marks: &std::collections::BTreeMap<String, i32>,
    document: &str,
) -> (EmailMessage, Vec<EmailAttachment>) {
    let total: i64 = marks.values().map(|mark| i64::from(*mark)).sum();
    let lines: Vec<String> = marks.iter().map(|(test, mark)| format!("{test}: {mark}")).collect();

    let message = EmailMessage {
        to: job.student.email.clone(),
        subject: format!("Your {} Mark at {}", job.assignment, format_display(job.grade_time)),
        body: format!(
            "Dear Student,\n\nYou have just earned {total} mark(s).\n\n{}\n\nRegards,\nAutomatic Grading Engine",
            lines.join("\n")
        ),
    };
    let attachment = EmailAttachment::from_text(document, "TestResult.txt", "text/plain");
    (message, vec![attachment])
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::test_support::{self, TestHarness};
    use time::macros::datetime;

    async fn seed(harness: &TestHarness, email: &str, body: &str) {
        let key = paths::test_result_key("lab1", email, datetime!(2025-03-03 10:00 UTC));
        harness.results.put(&key, JSON_CONTENT_TYPE, body.as_bytes().to_vec()).await.expect("put");
    }

    #[tokio::test]
    async fn today_marks_are_written_to_latest_and_archive() {
        let harness = TestHarness::new();
        seed(&harness, "a@school.test", r#"{"T1":5,"T2":3}"#).await;
        let snapshot = test_support::snapshot_at("lab1", datetime!(2025-03-03 10:00 UTC));

        let outcome = save_today_marks(&harness.services, &snapshot).await.expect("saved");

        assert_eq!(outcome.students, 1);
        let objects = harness.reports.snapshot();
        let latest = &objects["lab1/todayMarks.json"];
        let archive = &objects["lab1/2025/03/03/10/00/todayMarks.json"];
        assert_eq!(latest.bytes, archive.bytes);
        let report: Report = serde_json::from_slice(&latest.bytes).expect("json");
        assert_eq!(report["a@school.test"].total(), 8);
        assert!(harness.mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn rerunning_a_pass_overwrites_identically() {
        let harness = TestHarness::new();
        seed(&harness, "a@school.test", r#"{"T1":5}"#).await;
        let snapshot = test_support::snapshot_at("lab1", datetime!(2025-03-03 10:00 UTC));

        save_accumulated_marks(&harness.services, &snapshot).await.expect("first");
        let first = harness.reports.snapshot();
        save_accumulated_marks(&harness.services, &snapshot).await.expect("second");
        let second = harness.reports.snapshot();

        assert_eq!(first.len(), 4);
        assert_eq!(
            first["lab1/accumulatedMarks.json"].bytes,
            second["lab1/accumulatedMarks.json"].bytes
        );
    }

    #[tokio::test]
    async fn accumulated_marks_are_mailed_to_the_teacher() {
        let harness = TestHarness::new();
        seed(&harness, "a@school.test", r#"{"T1":5}"#).await;
        let mut snapshot = test_support::snapshot_at("lab1", datetime!(2025-03-03 10:00 UTC));
        snapshot.teacher_email = Some("teacher@school.test".to_string());

        let outcome = save_accumulated_marks(&harness.services, &snapshot).await.expect("saved");

        assert!(outcome.teacher_notified);
        let sent = harness.mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0.to, "teacher@school.test");
        assert_eq!(sent[0].0.subject, "Accumulated Mark for lab1 on 2025-03-03 10:00:00 (UTC)");
        let names: Vec<_> = sent[0].1.iter().map(|attachment| attachment.filename.as_str()).collect();
        assert_eq!(names, vec!["accumulatedMarks.xlsx", "accumulatedMarks.json"]);
    }

    #[tokio::test]
    async fn teacher_mail_failure_fails_the_pass() {
        let harness = TestHarness::new();
        harness.mailer.fail_for("teacher@school.test");
        let mut snapshot = test_support::snapshot_at("lab1", datetime!(2025-03-03 10:00 UTC));
        snapshot.teacher_email = Some("teacher@school.test".to_string());

        let result = save_accumulated_marks(&harness.services, &snapshot).await;

        assert!(result.is_err());
        assert!(harness.reports.snapshot().contains_key("lab1/accumulatedMarks.json"));
    }

    #[tokio::test]
    async fn store_failure_surfaces() {
        let harness = TestHarness::with_failing_reports(1);
        let snapshot = test_support::snapshot_at("lab1", datetime!(2025-03-03 10:00 UTC));

        assert!(save_today_marks(&harness.services, &snapshot).await.is_err());
        assert!(save_today_marks(&harness.services, &snapshot).await.is_ok());
    }

    #[test]
    fn student_email_lists_sorted_marks() {
        let job = test_support::job("lab1", "http://grader.test", "a@school.test");
        let marks = BTreeMap::from([("Test2".to_string(), 3), ("Test1".to_string(), 5)]);

        let (message, attachments) = student_mark_email(&job, &marks, "{}");

        assert_eq!(message.to, "a@school.test");
        assert!(message.subject.starts_with("Your lab1 Mark at "));
        assert!(message.body.contains("You have just earned 8 mark(s)."));
        assert!(message.body.contains("Test1: 5\nTest2: 3"));
        assert_eq!(attachments[0].filename, "TestResult.txt");
    }
}
