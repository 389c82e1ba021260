//! Portico response cache.
//!
//! - [`CacheBackend`]: byte-oriented storage (memory, disk or redis)
//! - [`CacheManager`]: key derivation, TTL policy, negative entries and
//!   single-flight population over any backend
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! backend = "redis"
//! redis_url = "redis://127.0.0.1:6379"
//! default_ttl_seconds = 3600
//! negative_ttl_seconds = 30
//! ```

mod backend;
mod config;
mod entry;
mod flight;
mod keys;
mod manager;
mod policy;
mod store;

pub use backend::{BackendError, CacheBackend, open_backend};
pub use config::{BackendKind, CacheConfig};
pub use entry::{CacheEntry, EntryKind, EnvelopeError};
pub use flight::{Flight, FlightGuard, FlightWaiter, InFlight};
pub use keys::CacheKey;
pub use manager::{CacheManager, CacheMode, CacheStatus, Fetched, PopulateError};
pub use policy::{TtlPolicy, TtlRule};
pub use store::{DiskBackend, MemoryBackend, RedisBackend, SweepStats};
