pub mod generation;
pub mod keys;
pub mod memory;
pub mod redis;
pub mod store;

pub use generation::{Generation, GenerationPointer, StoreSlot};
pub use keys::{CacheKey, KeyFamily};
pub use memory::MemoryStore;
pub use self::redis::RedisStore;
pub use store::KvStore;
