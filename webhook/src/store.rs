//! Persistence of one `measures` row per completed analysis.

use crate::config::Database as DatabaseConfig;
use crate::rating::translate_rating;
use crate::types::AnalysisBuild;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::num::{ParseFloatError, ParseIntError};
use std::str::FromStr;
use std::time::Duration;

const SCHEMA: &str = include_str!("../schema.sql");

const READY_TIMEOUT: Duration = Duration::from_secs(1);

const INSERT_MEASURES: &str = "insert into measures (\
    project_key, version, version_is_release, analysis_time, \
    lines, bugs, new_bugs, vulnerabilities, new_vulnerabilities, code_smells, new_code_smells, \
    coverage, new_coverage, complexity, \
    sqale_rating, new_maintainability_rating, security_rating, new_security_rating, reliability_rating\
    ) values (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("measurement {metric} has non-integer value {value:?}: {source}")]
    InvalidInteger {
        metric: &'static str,
        value: String,
        #[source]
        source: ParseIntError,
    },
    #[error("measurement {metric} has non-numeric value {value:?}: {source}")]
    InvalidFloat {
        metric: &'static str,
        value: String,
        #[source]
        source: ParseFloatError,
    },
    #[error("analysis time {0} is out of range")]
    InvalidAnalysisTime(i64),
}

/// A `measures` row with every value converted to its column type.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasuresRow {
    pub project_key: String,
    pub version: String,
    pub version_is_release: bool,
    pub analysis_time: DateTime<Utc>,
    pub lines: i64,
    pub bugs: i64,
    pub new_bugs: i64,
    pub vulnerabilities: i64,
    pub new_vulnerabilities: i64,
    pub code_smells: i64,
    pub new_code_smells: i64,
    pub coverage: f64,
    pub new_coverage: f64,
    pub complexity: i64,
    pub sqale_rating: String,
    pub new_maintainability_rating: String,
    pub security_rating: String,
    pub new_security_rating: String,
    pub reliability_rating: String,
}

impl MeasuresRow {
    /// Converts the normalized measurements. Metrics that are absent or
    /// empty are stored as zero, values that do not parse are an error.
    /// Ratings are translated to letters here and nowhere else.
    pub fn from_build(build: &AnalysisBuild) -> Result<Self, StoreError> {
        let integer = |metric| integer_measurement(build, metric);
        let float = |metric| float_measurement(build, metric);
        let rating = |field| translate_rating(field, build.measurement(field));

        Ok(MeasuresRow {
            project_key: build.project_key.clone(),
            version: build.version.clone(),
            version_is_release: build.version_is_release(),
            analysis_time: DateTime::from_timestamp_millis(build.analysed_at)
                .ok_or(StoreError::InvalidAnalysisTime(build.analysed_at))?,
            lines: integer("lines")?,
            bugs: integer("bugs")?,
            new_bugs: integer("new_bugs")?,
            vulnerabilities: integer("vulnerabilities")?,
            new_vulnerabilities: integer("new_vulnerabilities")?,
            code_smells: integer("code_smells")?,
            new_code_smells: integer("new_code_smells")?,
            coverage: float("coverage")?,
            new_coverage: float("new_coverage")?,
            complexity: integer("complexity")?,
            sqale_rating: rating("sqale_rating"),
            new_maintainability_rating: rating("new_maintainability_rating"),
            security_rating: rating("security_rating"),
            new_security_rating: rating("new_security_rating"),
            reliability_rating: rating("reliability_rating"),
        })
    }
}

fn present<'a>(build: &'a AnalysisBuild, metric: &str) -> Option<&'a str> {
    build.measurement(metric).map(str::trim).filter(|v| !v.is_empty())
}

fn integer_measurement(build: &AnalysisBuild, metric: &'static str) -> Result<i64, StoreError> {
    present(build, metric).map_or(Ok(0), |value| {
        value.parse().map_err(|source| StoreError::InvalidInteger {
            metric,
            value: value.to_string(),
            source,
        })
    })
}

fn float_measurement(build: &AnalysisBuild, metric: &'static str) -> Result<f64, StoreError> {
    present(build, metric).map_or(Ok(0.0), |value| {
        value.parse().map_err(|source| StoreError::InvalidFloat {
            metric,
            value: value.to_string(),
            source,
        })
    })
}

#[derive(Clone)]
pub struct MeasurementStore {
    pool: SqlitePool,
}

impl MeasurementStore {
    pub fn new(pool: SqlitePool) -> Self {
        MeasurementStore { pool }
    }

    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(&config.url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        Ok(Self::new(pool))
    }

    /// Creates the measures table if it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    /// Inserts one row for the build and returns the number of rows written.
    /// Conversion happens before a connection is taken from the pool.
    pub async fn insert(&self, build: &AnalysisBuild) -> Result<u64, StoreError> {
        let row = MeasuresRow::from_build(build)?;

        let result = sqlx::query(INSERT_MEASURES)
            .bind(&row.project_key)
            .bind(&row.version)
            .bind(row.version_is_release)
            .bind(row.analysis_time)
            .bind(row.lines)
            .bind(row.bugs)
            .bind(row.new_bugs)
            .bind(row.vulnerabilities)
            .bind(row.new_vulnerabilities)
            .bind(row.code_smells)
            .bind(row.new_code_smells)
            .bind(row.coverage)
            .bind(row.new_coverage)
            .bind(row.complexity)
            .bind(&row.sqale_rating)
            .bind(&row.new_maintainability_rating)
            .bind(&row.security_rating)
            .bind(&row.new_security_rating)
            .bind(&row.reliability_rating)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    pub async fn count_rows(&self) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("select count(*) from measures")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Runs a trivial query so that readiness follows the database, not
    /// just the pool handle.
    pub async fn is_ready(&self) -> bool {
        let probe = sqlx::query("select 1").execute(&self.pool);
        match tokio::time::timeout(READY_TIMEOUT, probe).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                tracing::warn!(error = &e as &dyn std::error::Error, "Database is not ready");
                false
            }
            Err(_) => {
                tracing::warn!(timeout = ?READY_TIMEOUT, "Database readiness check timed out");
                false
            }
        }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
