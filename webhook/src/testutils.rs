use crate::settings::SettingsProvider;
use crate::store::MeasurementStore;
use sqlx::sqlite::SqlitePoolOptions;
use std::io;
use std::sync::{Arc, Mutex};
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::fmt::MakeWriter;

/// Log sink for asserting on emitted warnings.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn capturing_subscriber(logs: CapturedLogs) -> impl tracing::Subscriber + Send + Sync {
    tracing_subscriber::fmt()
        .with_writer(logs)
        .with_ansi(false)
        .finish()
}

/// Runs `f` with a subscriber that records everything logged on this thread.
pub fn capture_logs<T>(f: impl FnOnce() -> T) -> (T, String) {
    let logs = CapturedLogs::default();
    let result = tracing::subscriber::with_default(capturing_subscriber(logs.clone()), f);
    (result, logs.contents())
}

/// Records everything logged on this thread until the guard is dropped.
/// For async tests, which must then run on the current-thread runtime.
pub fn capture_logs_scoped() -> (CapturedLogs, DefaultGuard) {
    let logs = CapturedLogs::default();
    let guard = tracing::subscriber::set_default(capturing_subscriber(logs.clone()));
    (logs, guard)
}

/// In-memory store with the measures table created. A single connection is
/// used since every SQLite memory connection is its own database.
pub async fn memory_store() -> MeasurementStore {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();

    let store = MeasurementStore::new(pool);
    store.ensure_schema().await.unwrap();
    store
}

/// Settings double whose token can be swapped while a client holds it.
#[derive(Default)]
pub struct TestSettings {
    metric_keys: Vec<String>,
    token: Mutex<Option<String>>,
}

impl TestSettings {
    pub fn with_metric_keys(mut self, keys: &[&str]) -> Self {
        self.metric_keys = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn with_token(self, token: &str) -> Self {
        self.set_token(Some(token));
        self
    }

    pub fn set_token(&self, token: Option<&str>) {
        *self.token.lock().unwrap() = token.map(String::from);
    }
}

impl SettingsProvider for TestSettings {
    fn metric_keys(&self) -> Vec<String> {
        self.metric_keys.clone()
    }

    fn api_token(&self) -> Option<String> {
        self.token.lock().unwrap().clone()
    }
}
