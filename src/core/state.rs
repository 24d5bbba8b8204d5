use std::sync::Arc;

use crate::core::config::Settings;
use crate::engine::{Engine, RetryPolicy};
use crate::services::email::Mailer;
use crate::services::entity_store::EntityStore;
use crate::services::grader::Grader;
use crate::services::storage::ObjectStore;

/// Collaborators shared by every activity of every orchestration instance.
#[derive(Clone)]
pub(crate) struct GradingServices {
    inner: Arc<ServicesInner>,
}

struct ServicesInner {
    entities: Arc<dyn EntityStore>,
    results: Arc<dyn ObjectStore>,
    reports: Arc<dyn ObjectStore>,
    mailer: Arc<dyn Mailer>,
    grader: Arc<dyn Grader>,
    persist_retry: RetryPolicy,
}

impl GradingServices {
    pub(crate) fn new(
        entities: Arc<dyn EntityStore>,
        results: Arc<dyn ObjectStore>,
        reports: Arc<dyn ObjectStore>,
        mailer: Arc<dyn Mailer>,
        grader: Arc<dyn Grader>,
        persist_retry: RetryPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(ServicesInner {
                entities,
                results,
                reports,
                mailer,
                grader,
                persist_retry,
            }),
        }
    }

    pub(crate) fn entities(&self) -> &dyn EntityStore {
        self.inner.entities.as_ref()
    }

    pub(crate) fn results(&self) -> &dyn ObjectStore {
        self.inner.results.as_ref()
    }

    pub(crate) fn reports(&self) -> &dyn ObjectStore {
        self.inner.reports.as_ref()
    }

    pub(crate) fn mailer(&self) -> &dyn Mailer {
        self.inner.mailer.as_ref()
    }

    pub(crate) fn grader(&self) -> &dyn Grader {
        self.inner.grader.as_ref()
    }

    pub(crate) fn persist_retry(&self) -> RetryPolicy {
        self.inner.persist_retry
    }
}

#[derive(Clone)]
pub(crate) struct AppState {
    inner: Arc<InnerState>,
}

struct InnerState {
    settings: Settings,
    services: GradingServices,
    engine: Engine,
}

impl AppState {
    pub(crate) fn new(settings: Settings, services: GradingServices) -> Self {
        let retention = settings.orchestration().instance_retention();
        let engine = Engine::with_retention(services.clone(), retention);
        Self { inner: Arc::new(InnerState { settings, services, engine }) }
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub(crate) fn services(&self) -> &GradingServices {
        &self.inner.services
    }

    pub(crate) fn engine(&self) -> &Engine {
        &self.inner.engine
    }
}
