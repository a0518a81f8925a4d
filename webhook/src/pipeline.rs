//! The ingestion pipeline run for every webhook delivery.
//!
//! The steps are strictly sequential: parse the payload, look up the
//! project version, fetch and normalize the measures, insert one row.
//! Any failure aborts the delivery before or during the single insert.

use crate::measures::normalize;
use crate::settings::SettingsProvider;
use crate::sonar_api::{SonarApiClient, SonarApiError};
use crate::store::{MeasurementStore, StoreError};
use crate::timestamp::{TimestampError, parse_timestamp};
use crate::types::AnalysisBuild;
use serde::Deserialize;
use std::sync::Arc;
use url::Url;

#[derive(thiserror::Error, Debug)]
pub enum PayloadError {
    #[error("webhook body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid analysedAt: {0}")]
    Timestamp(#[from] TimestampError),
    #[error("project key is missing")]
    MissingProjectKey,
    #[error("invalid serverUrl {url:?}: {reason}")]
    InvalidServerUrl { url: String, reason: String },
}

#[derive(thiserror::Error, Debug)]
pub enum WebhookError {
    #[error("malformed webhook payload: {0}")]
    Payload(#[from] PayloadError),
    #[error("Sonar API call failed: {0}")]
    SonarApi(#[from] SonarApiError),
    #[error("could not store measures: {0}")]
    Store(#[from] StoreError),
}

/// The fields of the Sonar webhook body used by the collector. The rest of
/// the payload (quality gate, branch, task) is ignored.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct WebhookPayload {
    #[serde(default)]
    analysed_at: String,
    #[serde(default)]
    project: PayloadProject,
    #[serde(default)]
    server_url: String,
}

#[derive(Deserialize, Debug, Default)]
struct PayloadProject {
    #[serde(default)]
    key: String,
}

/// Validated content of a webhook delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub analysed_at: i64,
    pub project_key: String,
    pub server_url: Url,
}

impl Delivery {
    pub fn parse(body: &[u8]) -> Result<Self, PayloadError> {
        let payload: WebhookPayload = serde_json::from_slice(body)?;

        let analysed_at = parse_timestamp(&payload.analysed_at)?;

        let project_key = payload.project.key.trim().to_string();
        if project_key.is_empty() {
            return Err(PayloadError::MissingProjectKey);
        }

        let server_url = parse_server_url(&payload.server_url)?;

        Ok(Delivery {
            analysed_at,
            project_key,
            server_url,
        })
    }
}

fn parse_server_url(raw: &str) -> Result<Url, PayloadError> {
    let invalid = |reason: String| PayloadError::InvalidServerUrl {
        url: raw.to_string(),
        reason,
    };

    let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" if url.has_host() => Ok(url),
        "http" | "https" => Err(invalid("no host".to_string())),
        scheme => Err(invalid(format!("unsupported scheme {scheme}"))),
    }
}

struct WebhookHandlerInner {
    sonar: SonarApiClient,
    store: MeasurementStore,
    settings: Arc<dyn SettingsProvider>,
}

/// Runs the pipeline. Holds no state between deliveries, so clones can be
/// handed to any number of concurrent requests.
#[derive(Clone)]
pub struct WebhookHandler {
    inner: Arc<WebhookHandlerInner>,
}

impl WebhookHandler {
    pub fn new(
        sonar: SonarApiClient,
        store: MeasurementStore,
        settings: Arc<dyn SettingsProvider>,
    ) -> Self {
        WebhookHandler {
            inner: Arc::new(WebhookHandlerInner {
                sonar,
                store,
                settings,
            }),
        }
    }

    pub fn store(&self) -> &MeasurementStore {
        &self.inner.store
    }

    /// Handles one delivery and returns the number of rows inserted.
    pub async fn handle(&self, body: &[u8]) -> Result<u64, WebhookError> {
        let build = self.collect_build(body).await?;
        Ok(self.inner.store.insert(&build).await?)
    }

    /// Parses the delivery and calls back into the Sonar server for the
    /// version and measures of the analysed project.
    pub async fn collect_build(&self, body: &[u8]) -> Result<AnalysisBuild, WebhookError> {
        let delivery = Delivery::parse(body)?;

        let component = self
            .inner
            .sonar
            .fetch_component_version(&delivery.server_url, &delivery.project_key)
            .await?;

        if component.version.is_empty() {
            tracing::warn!(
                project_key = %delivery.project_key,
                url = %component.url,
                "Version is missing from build, check the project version on the Sonar server"
            );
        }

        let mut build = AnalysisBuild::new(
            delivery.analysed_at,
            delivery.project_key,
            component.version,
            delivery.server_url,
        );

        let metric_keys = self.inner.settings.metric_keys();
        let measures = self
            .inner
            .sonar
            .fetch_measurements(&build.server_url, &build.project_key, &metric_keys)
            .await?;
        build.measurements = normalize(&measures);

        Ok(build)
    }
}
