#![cfg(feature = "sqlite")]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use sql_data_factory::prelude::*;
use sql_data_factory::profiler::ProfilerProviderFactory;
use sql_data_factory::provider::shared_provider_factory;
use tempfile::tempdir;

#[derive(Debug, Default)]
struct RecordingProfiler {
    events: Mutex<Vec<String>>,
}

impl RecordingProfiler {
    fn push(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl DbProfiler for RecordingProfiler {
    fn on_opening(&self, _provider: DataProvider) {
        self.push("opening");
    }

    fn on_opened(&self, _provider: DataProvider, _elapsed: Duration) {
        self.push("opened");
    }

    fn on_closed(&self, _provider: DataProvider) {
        self.push("closed");
    }

    fn on_started_transaction(&self, _provider: DataProvider) {
        self.push("begin");
    }

    fn on_committed(&self, _provider: DataProvider) {
        self.push("commit");
    }

    fn on_reader_finish(&self, _command: &DbCommand, record_count: usize, _elapsed: Duration) {
        self.push(format!("reader:{record_count}"));
    }

    fn on_execute_non_query_finish(&self, _command: &DbCommand, rows: u64, _elapsed: Duration) {
        self.push(format!("non_query:{rows}"));
    }

    fn on_execute_scalar_finish(
        &self,
        _command: &DbCommand,
        value: Option<&DbValue>,
        _elapsed: Duration,
    ) {
        self.push(format!("scalar:{}", value.map_or("none".to_string(), ToString::to_string)));
    }

    fn on_command_error(&self, _command: &DbCommand, _error: &DataError) {
        self.push("error");
    }
}

#[derive(Debug, Default)]
struct SilentProfiler;

impl DbProfiler for SilentProfiler {
    fn is_enabled(&self) -> bool {
        false
    }

    fn on_opened(&self, _provider: DataProvider, _elapsed: Duration) {
        panic!("disabled profiler must not be called");
    }
}

fn unique_connection_string(prefix: &str) -> String {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join(format!("{prefix}.db"));
    std::mem::forget(dir);
    format!("Data Source={}", path.display())
}

fn profiled_factory(
    cs: &str,
    profiler: Arc<dyn DbProfiler>,
) -> Result<DatabaseFactory, DataError> {
    let inner: Arc<dyn ProviderFactory> = shared_provider_factory(DataProvider::Sqlite, cs)?;
    let profiled = Arc::new(ProfilerProviderFactory::new(inner, profiler));
    Ok(DatabaseFactory::with_provider_factory(cs, profiled))
}

#[tokio::test]
async fn hooks_follow_the_command_lifecycle() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = Arc::new(RecordingProfiler::default());
    let cs = unique_connection_string("hooks");
    let mut factory = profiled_factory(&cs, recorder.clone())?;

    factory
        .execute_non_query(
            "CREATE TABLE t (v INTEGER); INSERT INTO t VALUES (1), (2);",
            CommandType::Text,
            ExecutingConnectionState::CloseOnExit,
        )
        .await?;
    factory
        .execute_data_set("SELECT v FROM t", CommandType::Text, ExecutingConnectionState::KeepOpen)
        .await?;
    factory
        .execute_scalar("SELECT MAX(v) FROM t", CommandType::Text, ExecutingConnectionState::CloseOnExit)
        .await?;

    assert_eq!(
        recorder.events(),
        [
            "opening",
            "opened",
            "non_query:2",
            "closed",
            "opening",
            "opened",
            "reader:2",
            "scalar:2",
            "closed",
        ]
    );
    Ok(())
}

#[tokio::test]
async fn failures_fire_error_and_finish_hooks() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = Arc::new(RecordingProfiler::default());
    let cs = unique_connection_string("failures");
    let mut factory = profiled_factory(&cs, recorder.clone())?;

    let scalar = factory
        .execute_scalar("SELECT v FROM missing", CommandType::Text, ExecutingConnectionState::KeepOpen)
        .await;
    assert!(scalar.is_err());
    let reader = factory
        .execute_reader("SELECT v FROM missing", CommandType::Text, ExecutingConnectionState::KeepOpen)
        .await;
    assert!(reader.is_err());

    let events = recorder.events();
    assert!(events.contains(&"scalar:none".to_string()));
    assert_eq!(events.iter().filter(|e| *e == "error").count(), 2);
    assert!(!events.iter().any(|e| e.starts_with("reader:")));
    Ok(())
}

#[tokio::test]
async fn transactions_are_reported() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = Arc::new(RecordingProfiler::default());
    let cs = unique_connection_string("txn_hooks");
    let mut factory = profiled_factory(&cs, recorder.clone())?;

    factory.begin_transaction().await?;
    factory
        .execute_non_query("CREATE TABLE x (v INTEGER)", CommandType::Text, ExecutingConnectionState::KeepOpen)
        .await?;
    factory.commit_transaction().await?;

    let events = recorder.events();
    let begin = events.iter().position(|e| e == "begin").expect("begin hook");
    let commit = events.iter().position(|e| e == "commit").expect("commit hook");
    assert!(begin < commit);
    assert_eq!(events.last().map(String::as_str), Some("closed"));
    Ok(())
}

#[tokio::test]
async fn disabled_profiler_is_bypassed() -> Result<(), Box<dyn std::error::Error>> {
    let cs = unique_connection_string("silent");
    let mut factory = profiled_factory(&cs, Arc::new(SilentProfiler))?;
    let value = factory
        .execute_scalar("SELECT 41 + 1", CommandType::Text, ExecutingConnectionState::CloseOnExit)
        .await?;
    assert_eq!(value, DbValue::Int(42));
    Ok(())
}

// The only test in this binary that touches the global registration.
#[tokio::test]
async fn registration_is_one_shot() -> Result<(), Box<dyn std::error::Error>> {
    assert!(!ProfilerFactory::is_initialized());
    assert!(matches!(
        ProfilerFactory::get_profiler(),
        Err(DataError::ProfilerError(_))
    ));

    ProfilerFactory::initialize::<RecordingProfiler>()?;
    assert!(ProfilerFactory::is_initialized());
    assert!(matches!(
        ProfilerFactory::initialize::<RecordingProfiler>(),
        Err(DataError::ProfilerError(_))
    ));
    let profiler = ProfilerFactory::get_profiler()?;
    assert!(profiler.is_enabled());

    let setting = DatabaseSetting::new(unique_connection_string("registered"), DataProvider::Sqlite)
        .with_profiling(true);
    let mut factory = DatabaseFactory::from_setting(&setting)?;
    let value = factory
        .execute_scalar("SELECT 'ok'", CommandType::Text, ExecutingConnectionState::CloseOnExit)
        .await?;
    assert_eq!(value, DbValue::Text("ok".into()));
    Ok(())
}
