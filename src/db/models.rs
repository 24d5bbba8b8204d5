use sqlx::FromRow;

use crate::grading::model::{Assignment, Credential, Student};

#[derive(Debug, Clone, FromRow)]
pub(crate) struct AssignmentRow {
    pub(crate) name: String,
    pub(crate) cron_expression: String,
    pub(crate) grader_url: String,
    pub(crate) teacher_email: Option<String>,
    pub(crate) send_mark_email_to_students: Option<bool>,
}

impl From<AssignmentRow> for Assignment {
    fn from(row: AssignmentRow) -> Self {
        Self {
            name: row.name,
            cron_expression: row.cron_expression,
            grader_url: row.grader_url,
            teacher_email: row.teacher_email.filter(|email| !email.trim().is_empty()),
            send_mark_email_to_students: row.send_mark_email_to_students.unwrap_or(false),
        }
    }
}

#[derive(Clone, FromRow)]
pub(crate) struct LabCredentialRow {
    pub(crate) email: String,
    pub(crate) app_id: String,
    pub(crate) display_name: String,
    pub(crate) password: String,
    pub(crate) tenant: String,
}

impl From<LabCredentialRow> for Student {
    fn from(row: LabCredentialRow) -> Self {
        Self {
            email: row.email,
            credentials: Credential {
                app_id: row.app_id,
                display_name: row.display_name,
                password: row.password,
                tenant: row.tenant,
            },
        }
    }
}
