use sqlx::PgPool;

use crate::db::models::AssignmentRow;

pub(crate) const COLUMNS: &str =
    "name, cron_expression, grader_url, teacher_email, send_mark_email_to_students";

pub(crate) async fn list_all(pool: &PgPool) -> Result<Vec<AssignmentRow>, sqlx::Error> {
    sqlx::query_as::<_, AssignmentRow>(&format!(
        "SELECT {COLUMNS}
         FROM assignments
         ORDER BY name"
    ))
    .fetch_all(pool)
    .await
}
