use std::collections::HashMap;
use url::Url;

const SNAPSHOT_SUFFIX: &str = "-SNAPSHOT";

/// A completed analysis, assembled from the webhook payload and the two
/// Sonar API lookups. Lives only for the duration of one delivery.
#[derive(Clone, Debug, PartialEq)]
pub struct AnalysisBuild {
    /// Milliseconds since the unix epoch, UTC.
    pub analysed_at: i64,
    pub project_key: String,
    /// Empty when the Sonar server could not resolve a version.
    pub version: String,
    pub server_url: Url,
    /// Raw, normalized values keyed by metric. Ratings stay numeric here.
    pub measurements: HashMap<String, String>,
}

impl AnalysisBuild {
    pub fn new<P, V>(analysed_at: i64, project_key: P, version: V, server_url: Url) -> Self
    where
        P: Into<String>,
        V: Into<String>,
    {
        AnalysisBuild {
            analysed_at,
            project_key: project_key.into(),
            version: version.into(),
            server_url,
            measurements: HashMap::new(),
        }
    }

    pub fn version_is_release(&self) -> bool {
        version_is_release(&self.version)
    }

    pub fn measurement(&self, metric: &str) -> Option<&str> {
        self.measurements.get(metric).map(String::as_str)
    }
}

/// A version is a release unless it is empty or a maven snapshot.
pub fn version_is_release(version: &str) -> bool {
    !version.is_empty() && !version.ends_with(SNAPSHOT_SUFFIX)
}
