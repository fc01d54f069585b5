#![cfg(feature = "sqlite")]

use serde::Deserialize;
use sql_data_factory::prelude::*;
use tempfile::tempdir;

#[derive(Debug, Deserialize, PartialEq)]
struct Customer {
    id: i64,
    name: String,
    email: Option<String>,
}

fn unique_connection_string(prefix: &str) -> String {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join(format!("{prefix}.db"));
    std::mem::forget(dir);
    format!("Data Source={}", path.display())
}

async fn seeded_client(prefix: &str) -> Result<DatabaseClient, DataError> {
    let mut client = DatabaseClient::new(&unique_connection_string(prefix), DataProvider::Sqlite)?;
    client
        .execute_non_query(
            "CREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT NOT NULL, email TEXT);
             INSERT INTO customers VALUES (1, 'Ada', 'ada@example.com'), (2, 'Grace', NULL);",
            CommandType::Text,
            &[],
            ExecutingConnectionState::CloseOnExit,
        )
        .await?;
    Ok(client)
}

#[tokio::test]
async fn poco_mapping_by_column_name() -> Result<(), Box<dyn std::error::Error>> {
    let mut client = seeded_client("poco").await?;

    let params = [DbParameter::new("@id", 2)];
    let grace: Option<Customer> = client
        .execute_poco_mapping(
            "SELECT id, name, email FROM customers WHERE id = @id",
            &params,
            CommandType::Text,
        )
        .await?;
    assert_eq!(
        grace,
        Some(Customer {
            id: 2,
            name: "Grace".into(),
            email: None,
        })
    );

    let params = [DbParameter::new("@id", 42)];
    let nobody: Option<Customer> = client
        .execute_poco_mapping(
            "SELECT id, name, email FROM customers WHERE id = @id",
            &params,
            CommandType::Text,
        )
        .await?;
    assert!(nobody.is_none());

    let everyone: Vec<Customer> = client
        .execute_poco_mappings("SELECT id, name, email FROM customers ORDER BY id", &[], CommandType::Text)
        .await?;
    assert_eq!(everyone.len(), 2);
    assert_eq!(everyone[0].email.as_deref(), Some("ada@example.com"));
    Ok(())
}

#[tokio::test]
async fn poco_mapping_reports_missing_columns() -> Result<(), Box<dyn std::error::Error>> {
    let mut client = seeded_client("poco_err").await?;
    let err = client
        .execute_poco_mappings::<Customer>("SELECT id FROM customers", &[], CommandType::Text)
        .await
        .unwrap_err();
    assert!(matches!(err, DataError::MappingError(_)));
    Ok(())
}

#[tokio::test]
async fn dynamic_rows_keep_nulls() -> Result<(), Box<dyn std::error::Error>> {
    let mut client = seeded_client("dynamic").await?;
    let rows = client
        .execute_dynamic("SELECT id, email FROM customers ORDER BY id", &[], CommandType::Text)
        .await?;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["email"], serde_json::json!("ada@example.com"));
    assert_eq!(rows[1]["email"], serde_json::Value::Null);
    assert_eq!(rows[1]["id"], serde_json::json!(2));
    Ok(())
}

#[tokio::test]
async fn data_set_and_scalar_with_parameters() -> Result<(), Box<dyn std::error::Error>> {
    let mut client = seeded_client("dataset").await?;
    let params = [client.create_parameter("TEXT", "@name", "Ada", ParameterDirection::Input)];
    let data_set = client
        .execute_data_set(
            "SELECT id FROM customers WHERE name = @name",
            CommandType::Text,
            &params,
            ExecutingConnectionState::CloseOnExit,
        )
        .await?;
    assert_eq!(data_set.len(), 1);
    assert_eq!(
        data_set.first_table().and_then(DataTable::first_value),
        Some(&DbValue::Int(1))
    );

    let count = client
        .execute_scalar(
            "SELECT COUNT(*) FROM customers",
            CommandType::Text,
            &[],
            ExecutingConnectionState::CloseOnExit,
        )
        .await?;
    assert_eq!(count, DbValue::Int(2));
    Ok(())
}

#[tokio::test]
async fn client_transaction_rolls_back() -> Result<(), Box<dyn std::error::Error>> {
    let mut client = seeded_client("client_txn").await?;
    client.begin_transaction().await?;
    client
        .execute_non_query(
            "DELETE FROM customers",
            CommandType::Text,
            &[],
            ExecutingConnectionState::KeepOpen,
        )
        .await?;
    client.rollback_transaction().await?;

    let count = client
        .execute_scalar(
            "SELECT COUNT(*) FROM customers",
            CommandType::Text,
            &[],
            ExecutingConnectionState::CloseOnExit,
        )
        .await?;
    assert_eq!(count, DbValue::Int(2));
    client.dispose().await?;
    Ok(())
}

#[tokio::test]
async fn command_text_without_derivation() -> Result<(), Box<dyn std::error::Error>> {
    let mut client = seeded_client("cmdtext").await?;
    let params = [
        DbParameter::new("@CustomerId", 7),
        DbParameter::new("@Note", "it's due"),
        DbParameter::new("@Since", DbValue::Null),
    ];
    let text = client.execute_command_text("dbo.usp_Orders", &params).await?;
    assert_eq!(
        text,
        "exec dbo.usp_Orders @CustomerId='7', @Note='it''s due', @Since=NULL;"
    );
    assert_eq!(
        client.execute_command_text("dbo.usp_Orders", &[]).await?,
        "exec dbo.usp_Orders;"
    );
    Ok(())
}

#[tokio::test]
async fn derive_mode_needs_procedure_metadata() -> Result<(), Box<dyn std::error::Error>> {
    let mut client = seeded_client("derive").await?;
    client.set_derive_parameters(true);
    assert!(client.is_derive_parameters());

    let params = [DbParameter::new("@id", 1)];
    let err = client
        .execute_command_text("usp_customers", &params)
        .await
        .unwrap_err();
    assert!(matches!(err, DataError::Unsupported(_)));

    let err = client
        .execute_procedure_fmt_only("usp_customers", &params, ExecutingConnectionState::CloseOnExit)
        .await
        .unwrap_err();
    assert!(matches!(err, DataError::Unsupported(_)));
    Ok(())
}

#[tokio::test]
async fn derive_mode_binds_cached_signature() -> Result<(), Box<dyn std::error::Error>> {
    let mut client = seeded_client("derive_cached").await?;
    DbParameterCache::cache_parameter_set(
        DataProvider::Sqlite,
        "dbo.usp_OrdersByCustomer",
        vec![
            DbParameter::new("@CustomerId", DbValue::Null).with_db_type("int"),
            DbParameter::new("@Status", DbValue::Null).with_db_type("varchar"),
            DbParameter::output("@Total", "money"),
        ],
    );
    client.set_derive_parameters(true);

    let params = [
        DbParameter::new("customerid", 7),
        DbParameter::new("@Bogus", "dropped"),
        DbParameter::new(":status", "open"),
    ];
    let text = client
        .execute_command_text("dbo.usp_OrdersByCustomer", &params)
        .await?;
    assert_eq!(
        text,
        "exec dbo.usp_OrdersByCustomer @CustomerId='7', @Status='open';"
    );

    // the cached signature keeps its own values
    let cached = DbParameterCache::get_cached_parameter_set(
        DataProvider::Sqlite,
        "dbo.usp_OrdersByCustomer",
    )
    .expect("signature cached");
    assert_eq!(cached.len(), 3);
    assert!(cached.iter().all(|p| p.value.is_null()));
    Ok(())
}

#[tokio::test]
async fn statistics_pass_through() -> Result<(), Box<dyn std::error::Error>> {
    let mut client = seeded_client("client_stats").await?;
    assert!(client.retrieve_statistics().is_none());
    client.statistics_enabled();
    client
        .execute_scalar(
            "SELECT COUNT(*) FROM customers",
            CommandType::Text,
            &[],
            ExecutingConnectionState::CloseOnExit,
        )
        .await?;
    let stats = client.retrieve_statistics().expect("statistics enabled");
    assert_eq!(stats["SelectCount"], 1);
    assert_eq!(stats["SelectRows"], 1);
    Ok(())
}
