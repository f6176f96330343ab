//! # ipproxydb
//!
//! Read-only IP2Proxy range database used as the lookup backend.
//!
//! ## Design
//! - CSV rows parsed with nom (PX1, PX2 and PX4 layouts)
//! - File read into memory or through a read-only memory map
//! - Ranges kept sorted; lookups are a binary search

#![warn(missing_docs)]

mod database;
mod error;
mod parser;
mod record;

pub use database::{AddressSpace, LoadOptions, ProxyDatabase};
pub use error::{Error, Result};
pub use parser::{parse_database, parse_row};
pub use record::{IpRange, Layout, ProxyRecord, NOT_SUPPORTED};
