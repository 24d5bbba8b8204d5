use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

use crate::core::time::minute_path;

pub(crate) const TODAY_MARKS_JSON: &str = "todayMarks.json";
pub(crate) const ACCUMULATED_MARKS_JSON: &str = "accumulatedMarks.json";
pub(crate) const MARKS_XLSX: &str = "marks.xlsx";

const TEST_RESULT_FILE: &str = "TestResult.xml";

/// `{assignment}/{yyyy}/{MM}/{dd}/{HH}/{mm}/{report}`: one per run, never overwritten by later runs.
pub(crate) fn archive_report_key(assignment: &str, grade_time: OffsetDateTime, report: &str) -> String {
    format!("{assignment}/{}/{report}", minute_path(grade_time))
}

/// `{assignment}/{report}`: always the most recent run.
pub(crate) fn latest_report_key(assignment: &str, report: &str) -> String {
    format!("{assignment}/{report}")
}

pub(crate) fn test_result_key(assignment: &str, email: &str, grade_time: OffsetDateTime) -> String {
    format!("{assignment}/{email}/{}/{TEST_RESULT_FILE}", minute_path(grade_time))
}

pub(crate) fn test_result_prefix(assignment: &str) -> String {
    format!("{assignment}/")
}

/// A stored test result key split back into its student and grade time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TestResultKey {
    pub(crate) email: String,
    pub(crate) grade_time: OffsetDateTime,
}

pub(crate) fn parse_test_result_key(assignment: &str, key: &str) -> Option<TestResultKey> {
    let rest = key.strip_prefix(&test_result_prefix(assignment))?;
    let segments: Vec<&str> = rest.split('/').collect();
    let [email, year, month, day, hour, minute, file] = segments.as_slice() else {
        return None;
    };
    if *file != TEST_RESULT_FILE || email.is_empty() {
        return None;
    }

    let format = format_description!("[year]/[month]/[day]/[hour]/[minute]");
    let stamp = format!("{year}/{month}/{day}/{hour}/{minute}");
    let grade_time = PrimitiveDateTime::parse(&stamp, &format).ok()?.assume_utc();

    Some(TestResultKey { email: email.to_string(), grade_time })
}
