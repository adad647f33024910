pub mod manager;
pub mod ring;
pub mod store;
pub mod types;

#[cfg(test)]
pub mod tests;

pub use manager::{DEFAULT_RETRIEVE_LIMIT, MemoryManager};
pub use ring::RingBuffer;
pub use store::{FileMemoryStore, InMemoryMemoryStore, MemoryStore};
pub use types::{
    MemoryConfig, MemoryEntry, MemoryId, MemoryMetadata, MemoryQuery, MemoryStoreConfig, MemoryType,
    RankingWeights, SessionStats,
};

use crate::error::AIError;
use std::sync::Arc;

/// Open the store selected by the configuration.
pub async fn open_store(config: &MemoryStoreConfig) -> Result<Arc<dyn MemoryStore>, AIError> {
    Ok(match config {
        MemoryStoreConfig::InMemory => Arc::new(InMemoryMemoryStore::new()),
        MemoryStoreConfig::File { path } => Arc::new(FileMemoryStore::open(path.clone()).await?),
    })
}
