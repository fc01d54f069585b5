use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use lazy_static::lazy_static;
use tracing::debug;

use crate::error::DataError;
use crate::parameter::{DbParameter, ParameterDirection};
use crate::provider::{DbConnection, ProviderFactory, shared_provider_factory};
use crate::types::DataProvider;

lazy_static! {
    static ref PARAMETER_CACHE: RwLock<HashMap<String, Vec<DbParameter>>> =
        RwLock::new(HashMap::new());
}

const OUTPUT_SUFFIX: &str = ":OutputParameter";

/// Process-wide cache of stored-procedure parameter signatures.
///
/// Reads hand out clones, so a caller filling in values never affects the
/// cached signature or another caller's copy.
pub struct DbParameterCache;

impl DbParameterCache {
    /// `"{provider}:{procedure}"`, suffixed with `:OutputParameter` for
    /// signatures that keep the return-value parameter.
    #[must_use]
    pub fn cache_key(provider: DataProvider, procedure: &str, output: bool) -> String {
        if output {
            format!("{provider}:{procedure}{OUTPUT_SUFFIX}")
        } else {
            format!("{provider}:{procedure}")
        }
    }

    /// Clone of the cached signature, if any.
    #[must_use]
    pub fn get_cached_parameter_set(
        provider: DataProvider,
        procedure: &str,
    ) -> Option<Vec<DbParameter>> {
        PARAMETER_CACHE
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&Self::cache_key(provider, procedure, false))
            .cloned()
    }

    /// Store or replace a signature.
    pub fn cache_parameter_set(
        provider: DataProvider,
        procedure: &str,
        parameters: Vec<DbParameter>,
    ) {
        PARAMETER_CACHE
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(Self::cache_key(provider, procedure, false), parameters);
    }

    /// Signature for `procedure`, discovered from database metadata on a miss.
    ///
    /// With `use_cache` false the signature is always rediscovered; the fresh
    /// result still replaces the cached entry.
    ///
    /// # Errors
    /// Returns the error of [`discover_sp_parameter_set`](Self::discover_sp_parameter_set).
    pub async fn get_sp_parameter_set(
        provider: DataProvider,
        connection_string: &str,
        procedure: &str,
        output: bool,
        use_cache: bool,
    ) -> Result<Vec<DbParameter>, DataError> {
        let key = Self::cache_key(provider, procedure, output);
        if use_cache {
            let cached = PARAMETER_CACHE
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&key)
                .cloned();
            if let Some(cached) = cached {
                return Ok(cached);
            }
        }

        let discovered =
            Self::discover_sp_parameter_set(provider, connection_string, procedure, output)
                .await?;
        PARAMETER_CACHE
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, discovered.clone());
        Ok(discovered)
    }

    /// Read the signature over a dedicated connection.
    ///
    /// For SQL Server the leading `@RETURN_VALUE` is dropped unless `output`
    /// is set.
    ///
    /// # Errors
    /// Returns `DataError::Unsupported` for providers without parameter
    /// metadata, or the driver error when the lookup fails.
    pub async fn discover_sp_parameter_set(
        provider: DataProvider,
        connection_string: &str,
        procedure: &str,
        output: bool,
    ) -> Result<Vec<DbParameter>, DataError> {
        debug!(%provider, procedure, output, "discovering procedure parameters");
        let factory = shared_provider_factory(provider, connection_string)?;
        let mut conn = factory.create_connection().await?;
        conn.open().await?;
        let derived = Self::derive_parameters(conn.as_mut(), procedure).await;
        conn.close().await?;

        let mut parameters = derived?;
        if provider == DataProvider::SqlServer
            && !output
            && parameters
                .first()
                .is_some_and(|p| p.direction == ParameterDirection::ReturnValue)
        {
            parameters.remove(0);
        }
        Ok(parameters)
    }

    /// Ask an open connection for the signature of `procedure`.
    ///
    /// # Errors
    /// Returns `DataError::Unsupported` when the provider has no stored procedures.
    pub async fn derive_parameters(
        connection: &mut dyn DbConnection,
        procedure: &str,
    ) -> Result<Vec<DbParameter>, DataError> {
        let provider = connection.provider();
        if !provider.supports_stored_procedures() {
            return Err(DataError::Unsupported(format!(
                "{provider} does not expose stored procedure parameters"
            )));
        }
        connection.derive_parameters(procedure).await
    }

    /// Forget every cached signature.
    pub fn clear() {
        PARAMETER_CACHE
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    #[must_use]
    pub fn len() -> usize {
        PARAMETER_CACHE
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty() -> bool {
        Self::len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DbValue;

    #[test]
    fn keys_carry_provider_and_output_flag() {
        assert_eq!(
            DbParameterCache::cache_key(DataProvider::SqlServer, "dbo.GetOrders", false),
            "SqlServer:dbo.GetOrders"
        );
        assert_eq!(
            DbParameterCache::cache_key(DataProvider::PostgreSql, "list_orders", true),
            "PostgreSQL:list_orders:OutputParameter"
        );
    }

    #[test]
    fn reads_are_independent_clones() {
        DbParameterCache::cache_parameter_set(
            DataProvider::MySql,
            "clone_on_read",
            vec![DbParameter::new("id", DbValue::Null)],
        );

        let mut first =
            DbParameterCache::get_cached_parameter_set(DataProvider::MySql, "clone_on_read")
                .unwrap();
        first[0].value = DbValue::Int(42);

        let second =
            DbParameterCache::get_cached_parameter_set(DataProvider::MySql, "clone_on_read")
                .unwrap();
        assert_eq!(second[0].value, DbValue::Null);
        assert!(DbParameterCache::len() >= 1);
    }

    #[test]
    fn missing_signature_is_none() {
        assert!(
            DbParameterCache::get_cached_parameter_set(DataProvider::Oracle, "never_cached")
                .is_none()
        );
    }

    #[tokio::test]
    async fn cached_signature_skips_discovery() {
        // Oracle has no driver, so reaching discovery would fail.
        DbParameterCache::cache_parameter_set(
            DataProvider::Oracle,
            "pkg.cached_proc",
            vec![DbParameter::new(":p_id", DbValue::Null)],
        );
        let params = DbParameterCache::get_sp_parameter_set(
            DataProvider::Oracle,
            "Data Source=orcl",
            "pkg.cached_proc",
            false,
            true,
        )
        .await
        .unwrap();
        assert_eq!(params.len(), 1);

        let err = DbParameterCache::get_sp_parameter_set(
            DataProvider::Oracle,
            "Data Source=orcl",
            "pkg.cached_proc",
            false,
            false,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DataError::ProviderUnavailable(_)));
    }
}
