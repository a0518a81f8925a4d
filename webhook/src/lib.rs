pub mod api;
pub mod config;
pub mod measures;
pub mod metrics_defs;
pub mod pipeline;
pub mod rating;
pub mod settings;
pub mod sonar_api;
pub mod store;
pub mod timestamp;
pub mod types;

#[cfg(test)]
mod testutils;

use api::WebhookApiError;
use config::Config;
use pipeline::WebhookHandler;
use settings::{LayeredSettings, SettingsProvider};
use sonar_api::{SonarApiClient, SonarApiError};
use std::sync::Arc;
use std::time::Duration;
use store::{MeasurementStore, StoreError};

#[derive(thiserror::Error, Debug)]
pub enum RunError {
    #[error("could not open measures database: {0}")]
    Store(#[from] StoreError),
    #[error("could not create Sonar API client: {0}")]
    SonarApi(#[from] SonarApiError),
    #[error(transparent)]
    Api(#[from] WebhookApiError),
}

/// Wires every collaborator of the pipeline from the configuration.
/// Nothing is resolved lazily, so a handler never sees a missing dependency.
pub async fn build_handler(config: &Config) -> Result<WebhookHandler, RunError> {
    let store = MeasurementStore::connect(&config.database).await?;
    store.ensure_schema().await?;

    let settings: Arc<dyn SettingsProvider> = Arc::new(LayeredSettings::from_config(&config.sonar));
    let sonar = SonarApiClient::new(Duration::from_secs(config.sonar.timeout_secs), settings.clone())?;

    Ok(WebhookHandler::new(sonar, store, settings))
}

pub async fn run(config: Config) -> Result<(), RunError> {
    let handler = build_handler(&config).await?;

    let result = api::serve(config.listener, handler.clone()).await;
    handler.store().close().await;
    Ok(result?)
}
