mod disk;
mod memory;
mod redis;

pub use disk::{DiskBackend, SweepStats};
pub use memory::MemoryBackend;
pub use self::redis::RedisBackend;
