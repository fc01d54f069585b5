use std::sync::{Arc, PoisonError, RwLock};

use lazy_static::lazy_static;

use super::DbProfiler;
use crate::error::DataError;

type ProfilerConstructor = Arc<dyn Fn() -> Arc<dyn DbProfiler> + Send + Sync>;

lazy_static! {
    static ref CONSTRUCTOR: RwLock<Option<ProfilerConstructor>> = RwLock::new(None);
}

/// Process-wide registration of the profiler every profiled connection uses.
///
/// Registration happens once; each [`get_profiler`](Self::get_profiler) call
/// builds a fresh profiler from the registered constructor.
pub struct ProfilerFactory;

impl ProfilerFactory {
    /// Register `P::default` as the profiler constructor.
    ///
    /// # Errors
    /// Returns `DataError::ProfilerError` if a profiler is already registered.
    pub fn initialize<P>() -> Result<(), DataError>
    where
        P: DbProfiler + Default + 'static,
    {
        Self::initialize_with(|| Arc::new(P::default()) as Arc<dyn DbProfiler>)
    }

    /// Register a custom constructor.
    ///
    /// # Errors
    /// Returns `DataError::ProfilerError` if a profiler is already registered.
    pub fn initialize_with<F>(constructor: F) -> Result<(), DataError>
    where
        F: Fn() -> Arc<dyn DbProfiler> + Send + Sync + 'static,
    {
        let mut slot = CONSTRUCTOR.write().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(DataError::ProfilerError(
                "profiler factory has already been initialized".into(),
            ));
        }
        *slot = Some(Arc::new(constructor));
        Ok(())
    }

    /// Build a profiler from the registered constructor.
    ///
    /// # Errors
    /// Returns `DataError::ProfilerError` before [`initialize`](Self::initialize).
    pub fn get_profiler() -> Result<Arc<dyn DbProfiler>, DataError> {
        let constructor = CONSTRUCTOR
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| {
                DataError::ProfilerError("profiler factory has not been initialized".into())
            })?;
        Ok(constructor())
    }

    #[must_use]
    pub fn is_initialized() -> bool {
        CONSTRUCTOR
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}
