//! Client for the two Sonar web API calls made for every delivery.

use crate::measures::Measure;
use crate::metrics_defs::SONAR_API_DURATION;
use crate::settings::SettingsProvider;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::StatusCode;
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;
use url::form_urlencoded::byte_serialize;

const COMPONENTS_SHOW_PATH: &str = "/api/components/show";
const MEASURES_COMPONENT_PATH: &str = "/api/measures/component";

#[derive(thiserror::Error, Debug)]
pub enum SonarApiError {
    #[error("could not build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
    #[error("invalid API URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("request to {url} failed: {source}")]
    Request {
        url: Url,
        #[source]
        source: reqwest::Error,
    },
    #[error("request to {url} returned HTTP {status}")]
    Status { url: Url, status: StatusCode },
    #[error("malformed response from {url}: {source}")]
    MalformedResponse {
        url: Url,
        #[source]
        source: serde_json::Error,
    },
}

// Sonar may send `null` for any of these nodes; that reads the same as absent.
#[derive(Deserialize, Default)]
struct ComponentShowResponse {
    #[serde(default)]
    component: Option<ShownComponent>,
}

#[derive(Deserialize, Default)]
struct ShownComponent {
    #[serde(default)]
    version: Option<String>,
}

#[derive(Deserialize, Default)]
struct MeasuresResponse {
    #[serde(default)]
    component: Option<MeasuredComponent>,
}

#[derive(Deserialize, Default)]
struct MeasuredComponent {
    #[serde(default)]
    measures: Option<Vec<Measure>>,
}

/// Result of the component lookup. The URL is kept so that a missing
/// version can be reported together with the request that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentVersion {
    pub version: String,
    pub url: Url,
}

#[derive(Clone)]
pub struct SonarApiClient {
    client: reqwest::Client,
    settings: Arc<dyn SettingsProvider>,
}

impl SonarApiClient {
    pub fn new(
        timeout: Duration,
        settings: Arc<dyn SettingsProvider>,
    ) -> Result<Self, SonarApiError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(SonarApiError::ClientBuild)?;

        Ok(SonarApiClient { client, settings })
    }

    /// Looks up the version of the analysed project. A component without a
    /// version yields an empty string.
    pub async fn fetch_component_version(
        &self,
        server_url: &Url,
        project_key: &str,
    ) -> Result<ComponentVersion, SonarApiError> {
        let url = components_show_url(server_url, project_key)?;
        let response: ComponentShowResponse = self.get_json(&url, "components_show").await?;

        Ok(ComponentVersion {
            version: response
                .component
                .and_then(|component| component.version)
                .unwrap_or_default(),
            url,
        })
    }

    /// Fetches the raw measures of the project for the given metric keys.
    pub async fn fetch_measurements(
        &self,
        server_url: &Url,
        project_key: &str,
        metric_keys: &[String],
    ) -> Result<Vec<Measure>, SonarApiError> {
        let url = measures_component_url(server_url, project_key, metric_keys)?;
        let response: MeasuresResponse = self.get_json(&url, "measures_component").await?;

        Ok(response
            .component
            .and_then(|component| component.measures)
            .unwrap_or_default())
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &Url,
        endpoint: &'static str,
    ) -> Result<T, SonarApiError> {
        let mut request = self.client.get(url.clone());

        // Read on every request so a rotated token is picked up immediately.
        if let Some(token) = self.settings.api_token() {
            request = request.header(AUTHORIZATION, basic_auth_header(&token));
        }

        let start = Instant::now();
        let result = self.send(request, url).await;
        metrics::histogram!(SONAR_API_DURATION.name, "endpoint" => endpoint)
            .record(start.elapsed().as_secs_f64());

        let body = result?;
        serde_json::from_slice(&body).map_err(|source| SonarApiError::MalformedResponse {
            url: url.clone(),
            source,
        })
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        url: &Url,
    ) -> Result<Vec<u8>, SonarApiError> {
        let request_error = |source: reqwest::Error| SonarApiError::Request {
            url: url.clone(),
            source,
        };

        let response = request.send().await.map_err(request_error)?;

        if !response.status().is_success() {
            return Err(SonarApiError::Status {
                url: url.clone(),
                status: response.status(),
            });
        }

        let body = response.bytes().await.map_err(request_error)?;
        Ok(body.to_vec())
    }
}

/// Value of the `Authorization` header for a Sonar user token: the token is
/// the basic auth username and the password is left empty.
pub fn basic_auth_header(token: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{token}:")))
}

pub fn components_show_url(server_url: &Url, project_key: &str) -> Result<Url, url::ParseError> {
    let mut url = server_url.join(COMPONENTS_SHOW_PATH)?;
    url.set_query(Some(&format!("component={}", encode(project_key))));
    Ok(url)
}

pub fn measures_component_url(
    server_url: &Url,
    project_key: &str,
    metric_keys: &[String],
) -> Result<Url, url::ParseError> {
    let metric_keys = metric_keys
        .iter()
        .map(|key| encode(key))
        .collect::<Vec<_>>()
        .join(",");

    let mut url = server_url.join(MEASURES_COMPONENT_PATH)?;
    url.set_query(Some(&format!(
        "component={}&metricKeys={metric_keys}",
        encode(project_key)
    )));
    Ok(url)
}

fn encode(value: &str) -> String {
    byte_serialize(value.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::TestSettings;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(settings: TestSettings) -> SonarApiClient {
        SonarApiClient::new(Duration::from_secs(5), Arc::new(settings)).unwrap()
    }

    #[test]
    fn test_components_show_url() {
        let server_url = Url::parse("http://localhost:9000").unwrap();
        let url = components_show_url(&server_url, "org.sonarqube:example").unwrap();

        assert_eq!(
            url.as_str(),
            "http://localhost:9000/api/components/show?component=org.sonarqube%3Aexample"
        );
    }

    #[test]
    fn test_measures_component_url() {
        let server_url = Url::parse("https://sonar.example.com:8443/").unwrap();
        let keys = vec!["lines".to_string(), "bugs".to_string(), "new_bugs".to_string()];
        let url = measures_component_url(&server_url, "g:a", &keys).unwrap();

        assert_eq!(url.scheme(), "https");
        assert_eq!(url.host_str(), Some("sonar.example.com"));
        assert_eq!(url.port(), Some(8443));
        assert_eq!(url.path(), "/api/measures/component");
        assert_eq!(url.query(), Some("component=g%3Aa&metricKeys=lines,bugs,new_bugs"));
    }

    #[test]
    fn test_api_path_replaces_server_path() {
        let server_url = Url::parse("http://localhost:9000/sonar?x=1#top").unwrap();
        let url = components_show_url(&server_url, "p").unwrap();

        assert_eq!(url.as_str(), "http://localhost:9000/api/components/show?component=p");
    }

    #[test]
    fn test_basic_auth_header() {
        assert_eq!(basic_auth_header("squ_token"), "Basic c3F1X3Rva2VuOg==");
    }

    #[tokio::test]
    async fn test_fetch_component_version() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/components/show"))
            .and(query_param("component", "org.sonarqube:example"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"component": {"key": "org.sonarqube:example", "version": "1.0.0-SNAPSHOT"}}"#,
            ))
            .expect(1)
            .mount(&mock_server)
            .await;

        let server_url = Url::parse(&mock_server.uri()).unwrap();
        let result = client(TestSettings::default())
            .fetch_component_version(&server_url, "org.sonarqube:example")
            .await
            .unwrap();

        assert_eq!(result.version, "1.0.0-SNAPSHOT");
        assert_eq!(result.url.path(), "/api/components/show");

        // No token configured, no credentials sent
        let requests = mock_server.received_requests().await.unwrap();
        assert!(!requests[0].headers.contains_key("authorization"));
    }

    #[tokio::test]
    async fn test_missing_version_is_empty() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/components/show"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"{"component": {"key": "p"}}"#),
            )
            .mount(&mock_server)
            .await;

        let server_url = Url::parse(&mock_server.uri()).unwrap();
        let result = client(TestSettings::default())
            .fetch_component_version(&server_url, "p")
            .await
            .unwrap();

        assert_eq!(result.version, "");
    }

    #[tokio::test]
    async fn test_fetch_measurements() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/measures/component"))
            .and(query_param("component", "g:a"))
            .and(query_param("metricKeys", "lines,new_bugs"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"component": {"key": "g:a", "measures": [
                    {"metric": "lines", "value": "100"},
                    {"metric": "new_bugs", "periods": [{"index": 1, "value": "7"}]}
                ]}}"#,
            ))
            .expect(1)
            .mount(&mock_server)
            .await;

        let server_url = Url::parse(&mock_server.uri()).unwrap();
        let keys = vec!["lines".to_string(), "new_bugs".to_string()];
        let measures = client(TestSettings::default())
            .fetch_measurements(&server_url, "g:a", &keys)
            .await
            .unwrap();

        assert_eq!(measures.len(), 2);
        assert_eq!(measures[0].metric, "lines");
        assert_eq!(measures[1].best_value(), Some("7"));
    }

    #[tokio::test]
    async fn test_null_nodes_read_as_absent() {
        let server_url_for = |mock_server: &MockServer| Url::parse(&mock_server.uri()).unwrap();
        let keys = vec!["lines".to_string()];

        for body in [
            r#"{"component": {"key": "g:a", "measures": null}}"#,
            r#"{"component": null}"#,
            r#"{}"#,
        ] {
            let mock_server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(200).set_body_string(body))
                .mount(&mock_server)
                .await;

            let client = client(TestSettings::default());
            let measures = client
                .fetch_measurements(&server_url_for(&mock_server), "g:a", &keys)
                .await
                .unwrap();
            assert!(measures.is_empty(), "{body}");

            let component = client
                .fetch_component_version(&server_url_for(&mock_server), "g:a")
                .await
                .unwrap();
            assert_eq!(component.version, "", "{body}");
        }
    }

    #[tokio::test]
    async fn test_token_is_read_per_request() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/components/show"))
            .and(header("authorization", "Basic c3F1X3Rva2VuOg=="))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"component": {"version": "1"}}"#))
            .expect(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path("/api/components/show"))
            .and(header("authorization", "Basic c3F1X3JvdGF0ZWQ6"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"component": {"version": "2"}}"#))
            .expect(1)
            .mount(&mock_server)
            .await;

        let settings = Arc::new(TestSettings::default().with_token("squ_token"));
        let client = SonarApiClient::new(Duration::from_secs(5), settings.clone()).unwrap();
        let server_url = Url::parse(&mock_server.uri()).unwrap();

        let first = client.fetch_component_version(&server_url, "p").await.unwrap();
        assert_eq!(first.version, "1");

        settings.set_token(Some("squ_rotated"));
        let second = client.fetch_component_version(&server_url, "p").await.unwrap();
        assert_eq!(second.version, "2");
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/measures/component"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&mock_server)
            .await;

        let server_url = Url::parse(&mock_server.uri()).unwrap();
        let result = client(TestSettings::default())
            .fetch_measurements(&server_url, "p", &["lines".to_string()])
            .await;

        match result {
            Err(SonarApiError::Status { status, .. }) => assert_eq!(status, StatusCode::UNAUTHORIZED),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_json() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/components/show"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
            .mount(&mock_server)
            .await;

        let server_url = Url::parse(&mock_server.uri()).unwrap();
        let result = client(TestSettings::default())
            .fetch_component_version(&server_url, "p")
            .await;

        assert!(matches!(result, Err(SonarApiError::MalformedResponse { .. })));
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/components/show"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"component": {"version": "1"}}"#)
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&mock_server)
            .await;

        let client = SonarApiClient::new(
            Duration::from_millis(200),
            Arc::new(TestSettings::default()),
        )
        .unwrap();
        let server_url = Url::parse(&mock_server.uri()).unwrap();
        let result = client.fetch_component_version(&server_url, "p").await;

        match result {
            Err(SonarApiError::Request { source, .. }) => assert!(source.is_timeout()),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
