//! # ipproxycache
//!
//! Process-wide lookup cache in front of an IP metadata resolver.
//!
//! ## Architecture
//! - **Store**: AHash map from key to the resolver's full output record
//! - **FrequencyIndex**: per-count buckets for least-queried-first eviction
//! - **Staleness**: entries older than the window are refreshed on access;
//!   a failed refresh keeps serving the old value
//! - **Locking**: one mutex around the whole lookup, resolver call included

#![warn(missing_docs)]

mod cache;
mod clock;
mod config;
mod error;
mod event;
mod frequency;
mod resolver;
mod stats;

pub use cache::LookupCache;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CacheConfig, DEFAULT_CACHE_SIZE, DEFAULT_STALE_AFTER_SECS, DEFAULT_TARGET};
pub use error::{Error, Result};
pub use event::{Event, TAGS_FIELD};
pub use frequency::FrequencyIndex;
pub use resolver::{resolve_uncached, Lookup, ResolveError, Resolver};
pub use stats::CacheStats;
