//! History storage adapters (C3) and the unified cache-through manager (C4).

pub mod disk_storage;
pub mod entry;
pub mod manager;
pub mod memory_storage;
pub mod remote_storage;
pub mod storage;

pub use disk_storage::DiskHistoryStorage;
pub use entry::{ApiCallMetadata, HistoryEntry, HistoryKey};
pub use manager::HistoryManager;
pub use memory_storage::MemoryHistoryStorage;
pub use remote_storage::RemoteHistoryStorage;
pub use storage::HistoryStorage;

use std::path::PathBuf;
use std::sync::Arc;

/// Which storage adapter the client should construct, mirroring the config
/// surface's `historyAdapter` field.
#[derive(Debug, Clone)]
pub enum HistoryAdapterConfig {
    Memory,
    Disk { dir: PathBuf },
    Remote { base_url: String },
}

impl HistoryAdapterConfig {
    pub fn build(&self, http: reqwest::Client) -> Arc<dyn HistoryStorage> {
        match self {
            HistoryAdapterConfig::Memory => Arc::new(MemoryHistoryStorage::new()),
            HistoryAdapterConfig::Disk { dir } => Arc::new(DiskHistoryStorage::new(dir.clone())),
            HistoryAdapterConfig::Remote { base_url } => {
                Arc::new(RemoteHistoryStorage::new(http, base_url.clone()))
            }
        }
    }
}
