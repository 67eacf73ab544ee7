//! Bounded, disk-backed cache for remotely sourced files
//!
//! Keeps a fixed number of downloaded files on local disk behind an
//! in-memory LRU index, and guarantees at most one in-flight download per
//! key no matter how many callers ask for it at once. Remote identifiers map
//! onto a sharded, content-addressed directory layout.

mod cache;
mod descriptor;
mod error;
mod fetcher;
mod index;
pub mod naming;
mod single_flight;
mod types;

pub use cache::{EvictionObserver, FileCache};
pub use descriptor::{ArgAllowList, BackendSelector, BackendTag, Descriptor, DescriptorRules};
pub use error::{CacheError, DescriptorError, FetchError, Result};
pub use fetcher::{Fetcher, FetcherRegistry};
pub use index::{EvictionListener, LruIndex, NoopListener};
pub use single_flight::{Flight, FlightGuard, FlightWaiter, SingleFlight};
pub use types::{CacheStats, FileCacheConfig};
