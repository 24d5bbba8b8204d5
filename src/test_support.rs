use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request},
    Router,
};
use time::OffsetDateTime;

use crate::api;
use crate::core::{config::Settings, state::AppState, state::GradingServices};
use crate::engine::RetryPolicy;
use crate::grading::model::{Assignment, AssignmentSnapshot, Credential, GradingJob, Student};
use crate::services::email::{EmailAttachment, EmailMessage, Mailer};
use crate::services::entity_store::MemoryEntityStore;
use crate::services::grader::Grader;
use crate::services::storage::{MemoryObject, MemoryObjectStore, ObjectStore, StoredObject};

pub(crate) const TEST_ADMIN_API_KEY: &str = "test-admin-key";

pub(crate) fn env_lock() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(())).lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) fn set_test_env() {
    std::env::set_var("ORCHESTRATOR_ENV", "test");
    std::env::set_var("ORCHESTRATOR_STRICT_CONFIG", "0");
    std::env::set_var("PROMETHEUS_ENABLED", "0");
    std::env::set_var("ADMIN_API_KEY", TEST_ADMIN_API_KEY);
    std::env::remove_var("S3_ENDPOINT");
    std::env::remove_var("S3_ACCESS_KEY");
    std::env::remove_var("S3_SECRET_KEY");
    std::env::remove_var("EMAIL_SMTP");
    std::env::remove_var("EMAIL_PASSWORD");
    std::env::remove_var("PERSIST_MAX_ATTEMPTS");
    std::env::remove_var("PERSIST_RETRY_INTERVAL_SECONDS");
    std::env::remove_var("INSTANCE_RETENTION_HOURS");
    std::env::remove_var("GRADER_TIMEOUT_SECONDS");
    std::env::remove_var("SCHEDULE_GRADER_CRON");
    std::env::remove_var("DAILY_GRADER_CRON");
    std::env::set_var("AWS_EC2_METADATA_DISABLED", "true");
}

pub(crate) fn test_settings() -> Settings {
    let _guard = env_lock();
    set_test_env();
    Settings::load().expect("settings")
}

pub(crate) fn student(email: &str) -> Student {
    Student {
        email: email.to_string(),
        credentials: Credential {
            app_id: format!("app-{email}"),
            display_name: format!("lab-{email}"),
            password: "secret".to_string(),
            tenant: "tenant".to_string(),
        },
    }
}

pub(crate) fn assignment(name: &str, cron_expression: &str, grader_url: &str) -> Assignment {
    Assignment {
        name: name.to_string(),
        cron_expression: cron_expression.to_string(),
        grader_url: grader_url.to_string(),
        teacher_email: None,
        send_mark_email_to_students: false,
    }
}

pub(crate) fn snapshot(name: &str, grader_url: &str, emails: &[&str]) -> AssignmentSnapshot {
    AssignmentSnapshot {
        name: name.to_string(),
        teacher_email: None,
        send_mark_email_to_students: false,
        grade_time: time::macros::datetime!(2025-03-03 10:00 UTC),
        grader_url: grader_url.to_string(),
        students: emails.iter().map(|email| student(email)).collect(),
    }
}

pub(crate) fn snapshot_at(name: &str, grade_time: OffsetDateTime) -> AssignmentSnapshot {
    AssignmentSnapshot { grade_time, ..snapshot(name, "http://grader.test/api", &[]) }
}

pub(crate) fn job(assignment: &str, grader_url: &str, email: &str) -> GradingJob {
    GradingJob {
        assignment: assignment.to_string(),
        grade_time: time::macros::datetime!(2025-03-03 10:00 UTC),
        grader_url: grader_url.to_string(),
        send_mark_email: false,
        student: student(email),
    }
}

/// Keeps every message instead of sending it.
#[derive(Default)]
pub(crate) struct RecordingMailer {
    sent: Mutex<Vec<(EmailMessage, Vec<EmailAttachment>)>>,
    failing: Mutex<Vec<String>>,
}

impl RecordingMailer {
    pub(crate) fn sent(&self) -> Vec<(EmailMessage, Vec<EmailAttachment>)> {
        self.sent.lock().expect("mailer lock").clone()
    }

    pub(crate) fn recipients(&self) -> Vec<String> {
        self.sent().into_iter().map(|(message, _)| message.to).collect()
    }

    pub(crate) fn fail_for(&self, email: &str) {
        self.failing.lock().expect("mailer lock").push(email.to_string());
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(
        &self,
        message: EmailMessage,
        attachments: Vec<EmailAttachment>,
    ) -> anyhow::Result<()> {
        if self.failing.lock().expect("mailer lock").contains(&message.to) {
            anyhow::bail!("mail relay rejected {}", message.to);
        }
        self.sent.lock().expect("mailer lock").push((message, attachments));
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub(crate) enum GraderScript {
    Respond(String),
    Delay(Duration, String),
    Fail(String),
}

/// Grader that answers from a per-student script.
#[derive(Default)]
pub(crate) struct FakeGrader {
    scripts: Mutex<HashMap<String, GraderScript>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl FakeGrader {
    pub(crate) fn script(&self, email: &str, script: GraderScript) {
        self.scripts.lock().expect("grader lock").insert(email.to_string(), script);
    }

    pub(crate) fn calls(&self, email: &str) -> usize {
        self.calls.lock().expect("grader lock").get(email).copied().unwrap_or(0)
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.calls.lock().expect("grader lock").values().sum()
    }
}

#[async_trait]
impl Grader for FakeGrader {
    async fn grade(&self, job: &GradingJob) -> anyhow::Result<String> {
        let email = job.student.email.clone();
        *self.calls.lock().expect("grader lock").entry(email.clone()).or_default() += 1;
        let script = self.scripts.lock().expect("grader lock").get(&email).cloned();

        match script {
            Some(GraderScript::Respond(body)) => Ok(body),
            Some(GraderScript::Delay(delay, body)) => {
                tokio::time::sleep(delay).await;
                Ok(body)
            }
            Some(GraderScript::Fail(reason)) => anyhow::bail!(reason),
            None => anyhow::bail!("no grader script for {email}"),
        }
    }
}

/// Memory store whose first `failures` writes are rejected.
#[derive(Default)]
pub(crate) struct FlakyObjectStore {
    inner: MemoryObjectStore,
    failures: AtomicUsize,
}

impl FlakyObjectStore {
    pub(crate) fn failing(failures: usize) -> Self {
        Self { inner: MemoryObjectStore::new(), failures: AtomicUsize::new(failures) }
    }

    pub(crate) fn snapshot(&self) -> std::collections::BTreeMap<String, MemoryObject> {
        self.inner.snapshot()
    }
}

#[async_trait]
impl ObjectStore for FlakyObjectStore {
    async fn put(
        &self,
        key: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> anyhow::Result<StoredObject> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            anyhow::bail!("report store unavailable");
        }
        self.inner.put(key, content_type, bytes).await
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        self.inner.get(key).await
    }

    async fn list(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        self.inner.list(prefix).await
    }
}

/// In-memory collaborators wired into `GradingServices`.
pub(crate) struct TestHarness {
    pub(crate) entities: Arc<MemoryEntityStore>,
    pub(crate) results: Arc<MemoryObjectStore>,
    pub(crate) reports: Arc<FlakyObjectStore>,
    pub(crate) mailer: Arc<RecordingMailer>,
    pub(crate) grader: Arc<FakeGrader>,
    pub(crate) services: GradingServices,
}

impl TestHarness {
    pub(crate) fn new() -> Self {
        Self::configured(0, RetryPolicy::new(2, Duration::from_millis(10)))
    }

    pub(crate) fn with_failing_reports(failures: usize) -> Self {
        Self::configured(failures, RetryPolicy::new(1, Duration::ZERO))
    }

    pub(crate) fn configured(report_failures: usize, persist_retry: RetryPolicy) -> Self {
        let entities = Arc::new(MemoryEntityStore::new());
        let results = Arc::new(MemoryObjectStore::new());
        let reports = Arc::new(FlakyObjectStore::failing(report_failures));
        let mailer = Arc::new(RecordingMailer::default());
        let grader = Arc::new(FakeGrader::default());
        let services = GradingServices::new(
            entities.clone(),
            results.clone(),
            reports.clone(),
            mailer.clone(),
            grader.clone(),
            persist_retry,
        );
        Self { entities, results, reports, mailer, grader, services }
    }

    /// Registers an assignment with a roster and a scripted grader answer per student.
    pub(crate) fn seed_assignment(&self, assignment: Assignment, roster: &[(&str, GraderScript)]) {
        for (email, script) in roster {
            self.entities.upsert_credential(&assignment.name, student(email));
            self.grader.script(email, script.clone());
        }
        self.entities.upsert_assignment(assignment);
    }

    pub(crate) fn app(&self) -> (AppState, Router) {
        let state = AppState::new(test_settings(), self.services.clone());
        let app = api::router::router(state.clone());
        (state, app)
    }
}

pub(crate) fn json_request(
    method: Method,
    uri: &str,
    api_key: Option<&str>,
    body: Option<serde_json::Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);

    if let Some(api_key) = api_key {
        builder = builder.header("x-api-key", api_key);
    }

    if let Some(body) = body {
        let bytes = serde_json::to_vec(&body).expect("serialize body");
        builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(bytes))
            .expect("request body")
    } else {
        builder.body(Body::empty()).expect("request body")
    }
}

pub(crate) async fn read_json(response: axum::response::Response<Body>) -> serde_json::Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.expect("response body");
    serde_json::from_slice(&body).unwrap_or_else(|err| {
        let body_text = String::from_utf8_lossy(&body);
        panic!("json parse: {err}; body: {body_text}");
    })
}
