//! Runtime settings queried by the pipeline on every delivery.
//!
//! Values are looked up through an ordered list of resolvers and the first
//! one that knows a key wins: the values injected from the config file, then
//! the process environment, then the defaults bundled with the binary.

use crate::config::Sonar as SonarConfig;
use std::collections::HashMap;

pub const METRIC_KEYS: &str = "metric_keys";
pub const API_TOKEN: &str = "api_token";

const ENV_PREFIX: &str = "SONAR_COLLECTOR_";

pub const DEFAULT_METRIC_KEYS: &str = "lines,bugs,new_bugs,vulnerabilities,new_vulnerabilities,\
code_smells,new_code_smells,coverage,new_coverage,complexity,\
sqale_rating,new_maintainability_rating,security_rating,new_security_rating,reliability_rating";

pub trait SettingsProvider: Send + Sync {
    /// Metric keys to request from the measures API.
    fn metric_keys(&self) -> Vec<String>;

    /// Token used to authenticate against the Sonar API, if any.
    fn api_token(&self) -> Option<String>;
}

pub type Resolver = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

pub struct LayeredSettings {
    resolvers: Vec<Resolver>,
}

impl LayeredSettings {
    pub fn new(resolvers: Vec<Resolver>) -> Self {
        LayeredSettings { resolvers }
    }

    pub fn from_config(config: &SonarConfig) -> Self {
        let mut values = HashMap::new();
        if let Some(metric_keys) = &config.metric_keys {
            values.insert(METRIC_KEYS.to_string(), metric_keys.clone());
        }
        if let Some(api_token) = &config.api_token {
            values.insert(API_TOKEN.to_string(), api_token.clone());
        }

        Self::new(vec![injected(values), environment(), bundled_defaults()])
    }

    /// Blank values are treated as unset so that a lower layer can answer.
    pub fn get(&self, key: &str) -> Option<String> {
        self.resolvers
            .iter()
            .filter_map(|resolve| resolve(key))
            .find(|value| !value.trim().is_empty())
    }
}

impl SettingsProvider for LayeredSettings {
    fn metric_keys(&self) -> Vec<String> {
        self.get(METRIC_KEYS)
            .map(|keys| split_metric_keys(&keys))
            .unwrap_or_default()
    }

    fn api_token(&self) -> Option<String> {
        self.get(API_TOKEN).map(|token| token.trim().to_string())
    }
}

pub fn injected(values: HashMap<String, String>) -> Resolver {
    Box::new(move |key| values.get(key).cloned())
}

/// Reads `SONAR_COLLECTOR_<KEY>` at lookup time.
pub fn environment() -> Resolver {
    Box::new(|key| std::env::var(format!("{ENV_PREFIX}{}", key.to_uppercase())).ok())
}

pub fn bundled_defaults() -> Resolver {
    Box::new(|key| match key {
        METRIC_KEYS => Some(DEFAULT_METRIC_KEYS.to_string()),
        _ => None,
    })
}

pub fn split_metric_keys(keys: &str) -> Vec<String> {
    keys.split(',')
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(String::from)
        .collect()
}
