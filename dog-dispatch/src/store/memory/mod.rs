pub mod reaper;
pub mod storage;

pub use reaper::ExpiryReaper;
pub use storage::MemoryStore;
