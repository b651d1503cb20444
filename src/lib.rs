// Export public modules
pub mod common;
pub mod container;
pub mod index;
pub mod storage;
pub mod transaction;

// Re-export key items for convenient access
pub use common::config::EngineConfig;
pub use container::hash::ExtendibleHashTable;
pub use index::btree::BPlusTree;
pub use storage::buffer::BufferPoolError;
pub use storage::buffer::BufferPoolManager;
pub use storage::disk::DiskManager;
pub use transaction::{LockManager, LockMode, Transaction, TransactionManager};
