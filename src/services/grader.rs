use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};

use crate::core::config::Settings;
use crate::grading::model::GradingJob;

/// Runs the test suite for one student and returns the raw result document.
#[async_trait]
pub(crate) trait Grader: Send + Sync {
    async fn grade(&self, job: &GradingJob) -> Result<String>;
}

#[derive(Debug, Clone)]
pub(crate) struct HttpGrader {
    client: Client,
}

impl HttpGrader {
    pub(crate) fn from_settings(settings: &Settings) -> Result<Self> {
        Self::with_timeout(settings.grading().grader_timeout())
    }

    pub(crate) fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Grader for HttpGrader {
    async fn grade(&self, job: &GradingJob) -> Result<String> {
        let url = grader_request_url(job)?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to call grader for {}", job.student.email))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Grader responded with {status} for {}", job.student.email);
        }

        response.text().await.context("Failed to read grader response")
    }
}

/// `{grader_url}?credentials={json}&trace={email}`.
pub(crate) fn grader_request_url(job: &GradingJob) -> Result<Url> {
    let credentials =
        serde_json::to_string(&job.student.credentials).context("Failed to serialize credentials")?;

    let mut url = Url::parse(&job.grader_url)
        .with_context(|| format!("Invalid grader URL {}", job.grader_url))?;
    url.query_pairs_mut()
        .append_pair("credentials", &credentials)
        .append_pair("trace", &job.student.email);
    Ok(url)
}
