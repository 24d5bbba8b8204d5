use sqlx::PgPool;

use crate::db::models::LabCredentialRow;

pub(crate) const COLUMNS: &str = "email, app_id, display_name, password, tenant";

pub(crate) async fn list_by_project(
    pool: &PgPool,
    project: &str,
) -> Result<Vec<LabCredentialRow>, sqlx::Error> {
    sqlx::query_as::<_, LabCredentialRow>(&format!(
        "SELECT {COLUMNS}
         FROM lab_credentials
         WHERE project = $1
         ORDER BY email"
    ))
    .bind(project)
    .fetch_all(pool)
    .await
}

pub(crate) async fn find_by_project_and_email(
    pool: &PgPool,
    project: &str,
    email: &str,
) -> Result<Option<LabCredentialRow>, sqlx::Error> {
    sqlx::query_as::<_, LabCredentialRow>(&format!(
        "SELECT {COLUMNS}
         FROM lab_credentials
         WHERE project = $1 AND lower(email) = lower($2)"
    ))
    .bind(project)
    .bind(email)
    .fetch_optional(pool)
    .await
}
