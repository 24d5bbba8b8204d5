use std::sync::RwLock;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;

use crate::grading::model::{Assignment, Student};
use crate::repositories;

/// Assignment and lab-credential records.
#[async_trait]
pub(crate) trait EntityStore: Send + Sync {
    async fn list_assignments(&self) -> anyhow::Result<Vec<Assignment>>;

    /// Roster of a project: every student holding a credential for it.
    async fn credentials_for_project(&self, project: &str) -> anyhow::Result<Vec<Student>>;

    async fn credential(&self, project: &str, email: &str) -> anyhow::Result<Option<Student>>;
}

#[derive(Debug, Clone)]
pub(crate) struct PgEntityStore {
    pool: PgPool,
}

impl PgEntityStore {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntityStore for PgEntityStore {
    async fn list_assignments(&self) -> anyhow::Result<Vec<Assignment>> {
        let rows = repositories::assignments::list_all(&self.pool)
            .await
            .context("Failed to fetch assignments")?;
        Ok(rows.into_iter().map(Assignment::from).collect())
    }

    async fn credentials_for_project(&self, project: &str) -> anyhow::Result<Vec<Student>> {
        let rows = repositories::lab_credentials::list_by_project(&self.pool, project)
            .await
            .context("Failed to fetch lab credentials")?;
        Ok(rows.into_iter().map(Student::from).collect())
    }

    async fn credential(&self, project: &str, email: &str) -> anyhow::Result<Option<Student>> {
        let row = repositories::lab_credentials::find_by_project_and_email(&self.pool, project, email)
            .await
            .context("Failed to fetch lab credential")?;
        Ok(row.map(Student::from))
    }
}

#[derive(Debug, Default)]
pub(crate) struct MemoryEntityStore {
    assignments: RwLock<Vec<Assignment>>,
    credentials: RwLock<Vec<(String, Student)>>,
}

impl MemoryEntityStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn upsert_assignment(&self, assignment: Assignment) {
        if let Ok(mut assignments) = self.assignments.write() {
            assignments.retain(|existing| existing.name != assignment.name);
            assignments.push(assignment);
            assignments.sort_by(|a, b| a.name.cmp(&b.name));
        }
    }

    pub(crate) fn upsert_credential(&self, project: &str, student: Student) {
        if let Ok(mut credentials) = self.credentials.write() {
            credentials.retain(|(existing_project, existing)| {
                !(existing_project == project && existing.email.eq_ignore_ascii_case(&student.email))
            });
            credentials.push((project.to_string(), student));
            credentials.sort_by(|a, b| (&a.0, &a.1.email).cmp(&(&b.0, &b.1.email)));
        }
    }
}

#[async_trait]
impl EntityStore for MemoryEntityStore {
    async fn list_assignments(&self) -> anyhow::Result<Vec<Assignment>> {
        let assignments =
            self.assignments.read().map_err(|_| anyhow::anyhow!("entity store lock poisoned"))?;
        Ok(assignments.clone())
    }

    async fn credentials_for_project(&self, project: &str) -> anyhow::Result<Vec<Student>> {
        let credentials =
            self.credentials.read().map_err(|_| anyhow::anyhow!("entity store lock poisoned"))?;
        Ok(credentials
            .iter()
            .filter(|(owner, _)| owner == project)
            .map(|(_, student)| student.clone())
            .collect())
    }

    async fn credential(&self, project: &str, email: &str) -> anyhow::Result<Option<Student>> {
        let credentials =
            self.credentials.read().map_err(|_| anyhow::anyhow!("entity store lock poisoned"))?;
        Ok(credentials
            .iter()
            .find(|(owner, student)| owner == project && student.email.eq_ignore_ascii_case(email))
            .map(|(_, student)| student.clone()))
    }
}
