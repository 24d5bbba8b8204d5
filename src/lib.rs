pub(crate) mod api;
pub(crate) mod core;
pub(crate) mod db;
pub(crate) mod engine;
pub(crate) mod grading;
pub(crate) mod repositories;
pub(crate) mod schemas;
pub(crate) mod services;
pub(crate) mod tasks;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use crate::core::{config::Settings, state::AppState, state::GradingServices, telemetry};
use crate::services::email::{LogMailer, Mailer, SmtpMailer};
use crate::services::entity_store::PgEntityStore;
use crate::services::grader::HttpGrader;
use crate::services::storage::{MemoryObjectStore, ObjectStore, S3ObjectStore};

/// HTTP API: manual triggers, instance status and credential lookup.
/// Timers run in [`run_worker`].
pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let services = build_services(&settings).await?;
    let state = AppState::new(settings, services);

    let listener = tokio::net::TcpListener::bind(state.settings().server_addr()).await?;

    tracing::info!(
        host = %state.settings().server_host(),
        port = state.settings().server_port(),
        environment = %state.settings().runtime().environment.as_str(),
        "Grading orchestrator listening"
    );

    serve(state, listener, core::shutdown::shutdown_signal()).await
}

async fn serve(
    state: AppState,
    listener: tokio::net::TcpListener,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = api::router::router(state);
    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;
    Ok(())
}

/// Both orchestration timers, no HTTP listener.
pub async fn run_worker() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let services = build_services(&settings).await?;
    let state = AppState::new(settings, services);

    tasks::scheduler::run(state).await
}

async fn build_services(settings: &Settings) -> anyhow::Result<GradingServices> {
    let db_pool = db::init_pool(settings).await?;
    db::run_migrations(&db_pool).await?;
    let entities = Arc::new(PgEntityStore::new(db_pool));

    let (results, reports): (Arc<dyn ObjectStore>, Arc<dyn ObjectStore>) =
        match S3ObjectStore::pair_from_settings(settings).await? {
            Some((results, reports)) => {
                tracing::info!(
                    result_bucket = %settings.s3().result_bucket,
                    report_bucket = %settings.s3().report_bucket,
                    "S3 object stores configured"
                );
                (Arc::new(results), Arc::new(reports))
            }
            None => {
                tracing::warn!("S3 is not configured; results and reports are kept in memory");
                (Arc::new(MemoryObjectStore::new()), Arc::new(MemoryObjectStore::new()))
            }
        };

    let mailer: Arc<dyn Mailer> = match SmtpMailer::from_settings(settings)? {
        Some(mailer) => Arc::new(mailer),
        None => {
            tracing::warn!("SMTP is not configured; emails are logged instead of sent");
            Arc::new(LogMailer)
        }
    };

    if settings.api().admin_api_key.is_none() {
        tracing::warn!("ADMIN_API_KEY is not set; operator endpoints are unauthenticated");
    }

    let grader = Arc::new(HttpGrader::from_settings(settings)?);

    Ok(GradingServices::new(
        entities,
        results,
        reports,
        mailer,
        grader,
        settings.orchestration().persist_retry_policy(),
    ))
}
