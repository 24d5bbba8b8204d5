use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A course project as configured in the entity store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Assignment {
    pub(crate) name: String,
    pub(crate) cron_expression: String,
    pub(crate) grader_url: String,
    pub(crate) teacher_email: Option<String>,
    pub(crate) send_mark_email_to_students: bool,
}

/// Service-principal style secret for one student's grading sandbox.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Credential {
    pub(crate) app_id: String,
    pub(crate) display_name: String,
    pub(crate) password: String,
    pub(crate) tenant: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("app_id", &self.app_id)
            .field("display_name", &self.display_name)
            .field("password", &"<redacted>")
            .field("tenant", &self.tenant)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Student {
    pub(crate) email: String,
    pub(crate) credentials: Credential,
}

/// Immutable view of an assignment and its roster for one orchestration run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct AssignmentSnapshot {
    pub(crate) name: String,
    pub(crate) teacher_email: Option<String>,
    pub(crate) send_mark_email_to_students: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub(crate) grade_time: OffsetDateTime,
    pub(crate) grader_url: String,
    pub(crate) students: Vec<Student>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct GradingJob {
    pub(crate) assignment: String,
    #[serde(with = "time::serde::rfc3339")]
    pub(crate) grade_time: OffsetDateTime,
    pub(crate) grader_url: String,
    pub(crate) send_mark_email: bool,
    pub(crate) student: Student,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub(crate) enum JobOutcome {
    Graded { email: String, total_mark: Option<i64> },
    Failed { email: String, reason: String },
}

impl JobOutcome {
    pub(crate) fn email(&self) -> &str {
        match self {
            JobOutcome::Graded { email, .. } | JobOutcome::Failed { email, .. } => email,
        }
    }

    pub(crate) fn is_graded(&self) -> bool {
        matches!(self, JobOutcome::Graded { .. })
    }
}

/// Per-test marks of one student with the time each mark was earned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct MarkDetails {
    pub(crate) mark: BTreeMap<String, i32>,
    #[serde(with = "complete_time_map")]
    pub(crate) complete_time: BTreeMap<String, OffsetDateTime>,
}

impl MarkDetails {
    pub(crate) fn total(&self) -> i64 {
        self.mark.values().map(|value| i64::from(*value)).sum()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.mark.is_empty()
    }

    pub(crate) fn record(&mut self, test: &str, mark: i32, completed_at: OffsetDateTime) {
        self.mark.insert(test.to_string(), mark);
        self.complete_time.insert(test.to_string(), completed_at);
    }
}

/// Student email to marks, ordered so serialisation is stable.
pub(crate) type Report = BTreeMap<String, MarkDetails>;

mod complete_time_map {
    use std::collections::BTreeMap;

    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use time::format_description::well_known::Rfc3339;
    use time::OffsetDateTime;

    pub(super) fn serialize<S: Serializer>(
        value: &BTreeMap<String, OffsetDateTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut formatted = BTreeMap::new();
        for (test, at) in value {
            let text = at.format(&Rfc3339).map_err(<S::Error as serde::ser::Error>::custom)?;
            formatted.insert(test.as_str(), text);
        }
        formatted.serialize(serializer)
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<String, OffsetDateTime>, D::Error> {
        let raw = BTreeMap::<String, String>::deserialize(deserializer)?;
        raw.into_iter()
            .map(|(test, text)| {
                OffsetDateTime::parse(&text, &Rfc3339)
                    .map(|at| (test, at))
                    .map_err(D::Error::custom)
            })
            .collect()
    }
}
