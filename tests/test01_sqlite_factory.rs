#![cfg(feature = "sqlite")]

use sql_data_factory::prelude::*;
use tempfile::tempdir;

fn unique_connection_string(prefix: &str) -> String {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join(format!("{prefix}.db"));
    // Leak the tempdir so the file persists for the duration of the test binary.
    std::mem::forget(dir);
    format!("Data Source={};Command Timeout=10", path.display())
}

async fn seeded_factory(prefix: &str) -> Result<DatabaseFactory, DataError> {
    let mut factory = DatabaseFactory::new(&unique_connection_string(prefix), DataProvider::Sqlite)?;
    factory
        .execute_non_query(
            "CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT NOT NULL, price REAL);
             INSERT INTO items (id, name, price) VALUES (1, 'bolt', 0.25), (2, 'nut', 0.1), (3, 'gear', 4.5);",
            CommandType::Text,
            ExecutingConnectionState::CloseOnExit,
        )
        .await?;
    Ok(factory)
}

#[tokio::test]
async fn execute_modes_over_one_factory() -> Result<(), Box<dyn std::error::Error>> {
    let mut factory = seeded_factory("modes").await?;

    factory.add_parameter("@min", 0.2);
    let count = factory
        .execute_scalar(
            "SELECT COUNT(*) FROM items WHERE price > @min",
            CommandType::Text,
            ExecutingConnectionState::KeepOpen,
        )
        .await?;
    assert_eq!(count, DbValue::Int(2));
    assert_eq!(factory.connection_state(), ConnectionState::Open);

    factory.add_parameter("@id", 2);
    factory.add_parameter("@name", "hex nut");
    let updated = factory
        .execute_non_query(
            "UPDATE items SET name = @name WHERE id = @id",
            CommandType::Text,
            ExecutingConnectionState::KeepOpen,
        )
        .await?;
    assert_eq!(updated, 1);

    let mut reader = factory
        .execute_reader(
            "SELECT id, name FROM items ORDER BY id",
            CommandType::Text,
            ExecutingConnectionState::CloseOnExit,
        )
        .await?;
    assert_eq!(factory.connection_state(), ConnectionState::Closed);
    assert_eq!(reader.field_count(), 2);
    let mut names = Vec::new();
    while let Some(row) = reader.read() {
        names.push(row.get("name").and_then(DbValue::as_text).unwrap_or_default().to_string());
    }
    assert_eq!(names, ["bolt", "hex nut", "gear"]);
    assert!(!reader.next_result());

    let table = factory
        .execute_data_table("items", CommandType::TableDirect, ExecutingConnectionState::CloseOnExit)
        .await?;
    assert_eq!(table.len(), 3);
    assert_eq!(table.column_count(), 3);

    let empty = factory
        .execute_data_table(
            "SELECT id FROM items WHERE id < 0",
            CommandType::Text,
            ExecutingConnectionState::CloseOnExit,
        )
        .await?;
    assert!(empty.is_empty());
    Ok(())
}

#[tokio::test]
async fn null_scalar_when_no_rows() -> Result<(), Box<dyn std::error::Error>> {
    let mut factory = seeded_factory("noscalar").await?;
    let value = factory
        .execute_scalar(
            "SELECT name FROM items WHERE id = 99",
            CommandType::Text,
            ExecutingConnectionState::CloseOnExit,
        )
        .await?;
    assert!(value.is_null());
    Ok(())
}

#[tokio::test]
async fn stored_procedures_are_rejected_on_sqlite() -> Result<(), Box<dyn std::error::Error>> {
    let mut factory = seeded_factory("noproc").await?;
    factory.add_parameter("@id", 1);
    let err = factory
        .execute_non_query(
            "usp_anything",
            CommandType::StoredProcedure,
            ExecutingConnectionState::CloseOnExit,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DataError::Unsupported(_)));
    assert!(factory.command().parameters.is_empty());
    Ok(())
}

#[tokio::test]
async fn rollback_discards_and_commit_keeps() -> Result<(), Box<dyn std::error::Error>> {
    let cs = unique_connection_string("txn");
    let mut factory = DatabaseFactory::new(&cs, DataProvider::Sqlite)?;
    factory
        .execute_non_query(
            "CREATE TABLE ledger (id INTEGER PRIMARY KEY, amount INTEGER)",
            CommandType::Text,
            ExecutingConnectionState::CloseOnExit,
        )
        .await?;

    factory.begin_transaction().await?;
    assert!(factory.in_transaction());
    factory.add_parameter("@amount", 10);
    factory
        .execute_non_query(
            "INSERT INTO ledger (amount) VALUES (@amount)",
            CommandType::Text,
            ExecutingConnectionState::CloseOnExit,
        )
        .await?;
    // CloseOnExit waits for the transaction to finish.
    assert_eq!(factory.connection_state(), ConnectionState::Open);
    factory.rollback_transaction().await?;
    assert!(!factory.in_transaction());
    assert_eq!(factory.connection_state(), ConnectionState::Closed);

    factory.begin_transaction().await?;
    factory.add_parameter("@amount", 25);
    factory
        .execute_non_query(
            "INSERT INTO ledger (amount) VALUES (@amount)",
            CommandType::Text,
            ExecutingConnectionState::KeepOpen,
        )
        .await?;
    factory.commit_transaction().await?;

    let mut check = DatabaseFactory::new(&cs, DataProvider::Sqlite)?;
    let total = check
        .execute_scalar(
            "SELECT COALESCE(SUM(amount), 0) FROM ledger",
            CommandType::Text,
            ExecutingConnectionState::CloseOnExit,
        )
        .await?;
    assert_eq!(total, DbValue::Int(25));
    Ok(())
}

#[tokio::test]
async fn dropped_factory_rolls_back_open_transaction() -> Result<(), Box<dyn std::error::Error>> {
    let cs = unique_connection_string("drop");
    {
        let mut factory = DatabaseFactory::new(&cs, DataProvider::Sqlite)?;
        factory
            .execute_non_query(
                "CREATE TABLE audit (msg TEXT)",
                CommandType::Text,
                ExecutingConnectionState::CloseOnExit,
            )
            .await?;
        factory.begin_transaction().await?;
        factory.add_parameter("@msg", "never committed");
        factory
            .execute_non_query(
                "INSERT INTO audit (msg) VALUES (@msg)",
                CommandType::Text,
                ExecutingConnectionState::KeepOpen,
            )
            .await?;
    }

    let mut check = DatabaseFactory::new(&cs, DataProvider::Sqlite)?;
    let rows = check
        .execute_scalar(
            "SELECT COUNT(*) FROM audit",
            CommandType::Text,
            ExecutingConnectionState::CloseOnExit,
        )
        .await?;
    assert_eq!(rows, DbValue::Int(0));
    Ok(())
}

#[tokio::test]
async fn second_begin_is_an_error() -> Result<(), Box<dyn std::error::Error>> {
    let mut factory = seeded_factory("double_begin").await?;
    factory.begin_transaction().await?;
    let err = factory.begin_transaction().await.unwrap_err();
    assert!(matches!(err, DataError::ExecutionError(_)));
    factory.rollback_transaction().await?;
    Ok(())
}

#[tokio::test]
async fn zero_connect_timeout_means_no_limit() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let cs = format!("Data Source={};Connect Timeout=0", dir.path().join("zero.db").display());
    let mut factory = DatabaseFactory::new(&cs, DataProvider::Sqlite)?;
    assert!(factory.command().command_timeout.is_zero());
    let value = factory
        .execute_scalar("SELECT 6 * 7", CommandType::Text, ExecutingConnectionState::CloseOnExit)
        .await?;
    assert_eq!(value, DbValue::Int(42));
    Ok(())
}

#[tokio::test]
async fn bare_memory_path_opens() -> Result<(), Box<dyn std::error::Error>> {
    let mut factory = DatabaseFactory::new(":memory:", DataProvider::Sqlite)?;
    factory
        .execute_non_query(
            "CREATE TABLE scratch (v INTEGER); INSERT INTO scratch VALUES (5);",
            CommandType::Text,
            ExecutingConnectionState::KeepOpen,
        )
        .await?;
    let value = factory
        .execute_scalar("SELECT v FROM scratch", CommandType::Text, ExecutingConnectionState::CloseOnExit)
        .await?;
    assert_eq!(value, DbValue::Int(5));

    let setting = DatabaseSetting::new(":memory:", DataProvider::Sqlite);
    assert!(DatabaseFactory::from_setting(&setting).is_ok());
    Ok(())
}

#[tokio::test]
async fn query_run_as_non_query_changes_nothing() -> Result<(), Box<dyn std::error::Error>> {
    let mut factory = seeded_factory("select_non_query").await?;
    factory.statistics_enabled();
    let rows = factory
        .execute_non_query("SELECT id FROM items", CommandType::Text, ExecutingConnectionState::CloseOnExit)
        .await?;
    assert_eq!(rows, 0);
    let stats = factory.retrieve_statistics().expect("statistics enabled");
    assert_eq!(stats["IduRows"], 0);
    Ok(())
}
