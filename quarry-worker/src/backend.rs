//! Store construction from configuration

use quarry_config::{StoreBackend, StoreConfig, Validatable};
use quarry_store::{MemoryStore, Store};
use std::sync::Arc;
use tracing::debug;

use crate::error::{WorkerError, WorkerResult};

/// Build the shared store selected by `config.backend`.
///
/// The redis backend needs the `redis` feature; without it a redis
/// configuration is rejected as a configuration error.
pub async fn store_from_config(config: &StoreConfig) -> WorkerResult<Arc<dyn Store>> {
    config.validate()?;
    match config.backend {
        StoreBackend::Memory => {
            debug!("Using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
        #[cfg(feature = "redis")]
        StoreBackend::Redis => {
            let store =
                quarry_store::RedisStore::connect(&config.url, Some(&config.namespace)).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "redis"))]
        StoreBackend::Redis => Err(WorkerError::configuration(
            "store backend 'redis' requires quarry-worker to be built with the `redis` feature",
        )),
    }
}
