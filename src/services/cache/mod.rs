pub mod client;
pub mod memory;
pub mod valkey;

pub use client::{CacheClient, CacheError, SharedCache};
pub use memory::MemoryCache;
pub use valkey::ValkeyCache;
