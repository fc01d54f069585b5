//! `DatabaseClient`: the facade applications use, for every provider.
//!
//! Text commands bind the caller's parameters as given. Stored procedures go
//! through derive mode when it is on: the procedure's signature is fetched via
//! [`DbParameterCache`] and only the signature entries the caller supplied are
//! bound, with the caller's value and the signature's direction and type.

use std::collections::BTreeMap;
use std::future::Future;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value as JsonValue};
use tracing::debug;

use crate::config::DatabaseSetting;
use crate::error::DataError;
use crate::factory::DatabaseFactory;
use crate::parameter::{DbParameter, ParameterDirection, find_parameter};
use crate::parameter_cache::DbParameterCache;
use crate::provider::validate_identifier;
use crate::results::{DataReader, DataSet};
use crate::sql_text::{build_exec_text, parameter_value_for_sql};
use crate::types::{CommandType, DataProvider, DbValue, ExecutingConnectionState};

#[derive(Debug)]
pub struct DatabaseClient {
    factory: DatabaseFactory,
    derive_parameters: bool,
    use_parameter_cache: bool,
}

impl DatabaseClient {
    /// # Errors
    /// See [`DatabaseFactory::new`].
    pub fn new(connection_string: &str, provider: DataProvider) -> Result<Self, DataError> {
        Ok(Self::from_factory(DatabaseFactory::new(connection_string, provider)?))
    }

    /// # Errors
    /// See [`DatabaseFactory::from_setting`].
    pub fn from_setting(setting: &DatabaseSetting) -> Result<Self, DataError> {
        let mut client = Self::from_factory(DatabaseFactory::from_setting(setting)?);
        client.use_parameter_cache = setting.parameter_cache;
        Ok(client)
    }

    /// Client configured from the `DATA_FACTORY_*` environment variables.
    ///
    /// # Errors
    /// See [`DatabaseSetting::from_env`] and [`DatabaseFactory::from_setting`].
    pub fn from_env() -> Result<Self, DataError> {
        Self::from_setting(&DatabaseSetting::from_env()?)
    }

    #[must_use]
    pub fn from_factory(factory: DatabaseFactory) -> Self {
        Self {
            factory,
            derive_parameters: false,
            use_parameter_cache: true,
        }
    }

    #[must_use]
    pub fn factory(&self) -> &DatabaseFactory {
        &self.factory
    }

    pub fn factory_mut(&mut self) -> &mut DatabaseFactory {
        &mut self.factory
    }

    #[must_use]
    pub fn connection_string(&self) -> &str {
        self.factory.connection_string()
    }

    #[must_use]
    pub fn provider(&self) -> DataProvider {
        self.factory.provider()
    }

    #[must_use]
    pub fn is_derive_parameters(&self) -> bool {
        self.derive_parameters
    }

    pub fn set_derive_parameters(&mut self, derive: bool) {
        self.derive_parameters = derive;
    }

    pub fn statistics_enabled(&mut self) {
        self.factory.statistics_enabled();
    }

    #[must_use]
    pub fn retrieve_statistics(&self) -> Option<BTreeMap<&'static str, u64>> {
        self.factory.retrieve_statistics()
    }

    /// Parameter with an explicit provider type name.
    #[must_use]
    pub fn create_parameter(
        &self,
        db_type: &str,
        name: &str,
        value: impl Into<DbValue>,
        direction: ParameterDirection,
    ) -> DbParameter {
        self.factory
            .command()
            .create_parameter(name, value)
            .with_db_type(db_type)
            .with_direction(direction)
    }

    /// `exec procedure @a='x', ...;` text for the call. In derive mode only
    /// signature parameters the caller supplied are rendered.
    ///
    /// # Errors
    /// Returns signature discovery errors or `DataError::ParameterError` for
    /// an invalid procedure name.
    pub async fn execute_command_text(
        &mut self,
        procedure: &str,
        parameters: &[DbParameter],
    ) -> Result<String, DataError> {
        if parameters.is_empty() || !self.derive_parameters {
            return build_exec_text(procedure, parameters);
        }
        let bound = self.matched_signature(procedure, parameters).await?;
        build_exec_text(procedure, &bound)
    }

    /// # Errors
    /// Returns the connection or driver error.
    pub async fn execute_data_set(
        &mut self,
        command_text: &str,
        command_type: CommandType,
        parameters: &[DbParameter],
        connection_state: ExecutingConnectionState,
    ) -> Result<DataSet, DataError> {
        self.bind(command_text, command_type, parameters).await?;
        self.factory
            .execute_data_set(command_text, command_type, connection_state)
            .await
    }

    /// Run a procedure and return its result sets with the parameters as they
    /// stood after the call (output values filled in).
    ///
    /// # Errors
    /// Returns the connection or driver error.
    pub async fn execute_data_set_with_output(
        &mut self,
        procedure: &str,
        parameters: &[DbParameter],
        connection_state: ExecutingConnectionState,
    ) -> Result<(DataSet, Vec<DbParameter>), DataError> {
        self.bind(procedure, CommandType::StoredProcedure, parameters)
            .await?;
        self.factory.set_output_parameter(true);
        let data_set = self
            .factory
            .execute_data_set(procedure, CommandType::StoredProcedure, connection_state)
            .await?;
        Ok((data_set, self.factory.output_parameters().to_vec()))
    }

    /// Result-set metadata of a SQL Server procedure without running it,
    /// via `SET FMTONLY ON`.
    ///
    /// # Errors
    /// Returns `DataError::Unsupported` for other providers.
    pub async fn execute_procedure_fmt_only(
        &mut self,
        procedure: &str,
        parameters: &[DbParameter],
        connection_state: ExecutingConnectionState,
    ) -> Result<DataSet, DataError> {
        if self.provider() != DataProvider::SqlServer {
            return Err(DataError::Unsupported(format!(
                "FMTONLY is a SQL Server feature, not available on {}",
                self.provider()
            )));
        }
        let bound = if self.derive_parameters {
            self.matched_signature(procedure, parameters).await?
        } else {
            parameters.to_vec()
        };
        let args: Vec<String> = bound
            .iter()
            .map(|p| format!("@{}={}", p.bare_name(), parameter_value_for_sql(p)))
            .collect();
        let procedure = validate_identifier(procedure)?;
        let sql = if args.is_empty() {
            format!("SET FMTONLY ON;EXEC {procedure};SET FMTONLY OFF;")
        } else {
            format!(
                "SET FMTONLY ON;EXEC {procedure} {};SET FMTONLY OFF;",
                args.join(",")
            )
        };
        self.factory
            .execute_data_set(&sql, CommandType::Text, connection_state)
            .await
    }

    /// # Errors
    /// Returns the connection or driver error.
    pub async fn execute_non_query(
        &mut self,
        command_text: &str,
        command_type: CommandType,
        parameters: &[DbParameter],
        connection_state: ExecutingConnectionState,
    ) -> Result<u64, DataError> {
        self.bind(command_text, command_type, parameters).await?;
        self.factory
            .execute_non_query(command_text, command_type, connection_state)
            .await
    }

    /// # Errors
    /// Returns the connection or driver error.
    pub async fn execute_non_query_with_output(
        &mut self,
        procedure: &str,
        parameters: &[DbParameter],
        connection_state: ExecutingConnectionState,
    ) -> Result<(u64, Vec<DbParameter>), DataError> {
        self.bind(procedure, CommandType::StoredProcedure, parameters)
            .await?;
        self.factory.set_output_parameter(true);
        let rows = self
            .factory
            .execute_non_query(procedure, CommandType::StoredProcedure, connection_state)
            .await?;
        Ok((rows, self.factory.output_parameters().to_vec()))
    }

    /// # Errors
    /// Returns the connection or driver error.
    pub async fn execute_scalar(
        &mut self,
        command_text: &str,
        command_type: CommandType,
        parameters: &[DbParameter],
        connection_state: ExecutingConnectionState,
    ) -> Result<DbValue, DataError> {
        self.bind(command_text, command_type, parameters).await?;
        self.factory
            .execute_scalar(command_text, command_type, connection_state)
            .await
    }

    /// # Errors
    /// Returns the connection or driver error.
    pub async fn execute_scalar_with_output(
        &mut self,
        procedure: &str,
        parameters: &[DbParameter],
        connection_state: ExecutingConnectionState,
    ) -> Result<(DbValue, Vec<DbParameter>), DataError> {
        self.bind(procedure, CommandType::StoredProcedure, parameters)
            .await?;
        self.factory.set_output_parameter(true);
        let value = self
            .factory
            .execute_scalar(procedure, CommandType::StoredProcedure, connection_state)
            .await?;
        Ok((value, self.factory.output_parameters().to_vec()))
    }

    /// Reader over every result set; the connection closes afterwards.
    ///
    /// # Errors
    /// Returns the connection or driver error.
    pub async fn execute_reader(
        &mut self,
        command_text: &str,
        command_type: CommandType,
        parameters: &[DbParameter],
    ) -> Result<DataReader, DataError> {
        self.bind(command_text, command_type, parameters).await?;
        self.factory
            .execute_reader(
                command_text,
                command_type,
                ExecutingConnectionState::CloseOnExit,
            )
            .await
    }

    /// First row mapped onto `T` by column name, `None` without rows.
    ///
    /// # Errors
    /// Returns the driver error, or `DataError::MappingError` when the row
    /// does not fit `T`.
    pub async fn execute_poco_mapping<T: DeserializeOwned>(
        &mut self,
        command_text: &str,
        parameters: &[DbParameter],
        command_type: CommandType,
    ) -> Result<Option<T>, DataError> {
        let mut reader = self
            .execute_reader(command_text, command_type, parameters)
            .await?;
        reader.read().map(|row| row.deserialize::<T>()).transpose()
    }

    /// Every row of the first result set mapped onto `T`.
    ///
    /// # Errors
    /// Returns the driver error, or `DataError::MappingError` when a row
    /// does not fit `T`.
    pub async fn execute_poco_mappings<T: DeserializeOwned>(
        &mut self,
        command_text: &str,
        parameters: &[DbParameter],
        command_type: CommandType,
    ) -> Result<Vec<T>, DataError> {
        let mut reader = self
            .execute_reader(command_text, command_type, parameters)
            .await?;
        let mut mapped = Vec::with_capacity(reader.record_count());
        while let Some(row) = reader.read() {
            mapped.push(row.deserialize::<T>()?);
        }
        Ok(mapped)
    }

    /// Rows of the first result set as column-name maps; NULL becomes `null`.
    ///
    /// # Errors
    /// Returns the connection or driver error.
    pub async fn execute_dynamic(
        &mut self,
        command_text: &str,
        parameters: &[DbParameter],
        command_type: CommandType,
    ) -> Result<Vec<Map<String, JsonValue>>, DataError> {
        let mut reader = self
            .execute_reader(command_text, command_type, parameters)
            .await?;
        let mut rows = Vec::new();
        while let Some(row) = reader.read() {
            rows.push(row.to_json_map());
        }
        Ok(rows)
    }

    /// # Errors
    /// Returns the connection or driver error.
    pub async fn begin_transaction(&mut self) -> Result<(), DataError> {
        self.factory.begin_transaction().await
    }

    /// # Errors
    /// Returns the driver error.
    pub async fn commit_transaction(&mut self) -> Result<(), DataError> {
        self.factory.commit_transaction().await
    }

    /// # Errors
    /// Returns the driver error.
    pub async fn rollback_transaction(&mut self) -> Result<(), DataError> {
        self.factory.rollback_transaction().await
    }

    /// # Errors
    /// Returns the driver error of the close.
    pub async fn dispose(&mut self) -> Result<(), DataError> {
        self.factory.dispose().await
    }

    async fn bind(
        &mut self,
        command_text: &str,
        command_type: CommandType,
        parameters: &[DbParameter],
    ) -> Result<(), DataError> {
        let bound = if command_type == CommandType::StoredProcedure && self.derive_parameters {
            self.matched_signature(command_text, parameters).await?
        } else {
            parameters.to_vec()
        };
        for parameter in bound {
            self.factory.add_db_parameter(parameter);
        }
        Ok(())
    }

    /// Signature entries the caller supplied, carrying the caller's values.
    /// The returned future owns its inputs.
    fn matched_signature(
        &self,
        procedure: &str,
        parameters: &[DbParameter],
    ) -> impl Future<Output = Result<Vec<DbParameter>, DataError>> + Send + use<> {
        let provider = self.provider();
        let connection_string = self.connection_string().to_string();
        let use_cache = self.use_parameter_cache;
        let procedure = procedure.to_string();
        let supplied = parameters.to_vec();
        async move {
            let signature = DbParameterCache::get_sp_parameter_set(
                provider,
                &connection_string,
                &procedure,
                false,
                use_cache,
            )
            .await?;
            debug!(
                procedure = %procedure,
                declared = signature.len(),
                supplied = supplied.len(),
                "binding derived parameters"
            );
            Ok(match_signature(signature, &supplied))
        }
    }
}

/// Keep the signature entries named by `supplied`, taking the supplied values.
pub(crate) fn match_signature(
    signature: Vec<DbParameter>,
    supplied: &[DbParameter],
) -> Vec<DbParameter> {
    signature
        .into_iter()
        .filter_map(|mut declared| {
            let given = find_parameter(supplied, &declared.name)?;
            declared.value = given.value.clone();
            Some(declared)
        })
        .collect()
}
