//! Range database loading and lookups
//!
//! The CSV file is parsed once at open into a sorted vector of ranges;
//! lookups are a binary search over it. With `memory_mapped` the file is
//! parsed straight out of the mapping, which is released once the table is
//! built.

use std::fs::File;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use tracing::info;

use crate::error::{Error, Result};
use crate::parser::parse_database;
use crate::record::{IpRange, Layout, ProxyRecord};

/// How the database file is read at open
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    /// Read through a memory map instead of a heap buffer
    pub memory_mapped: bool,
}

/// Numbering used by a file's `ip_from`/`ip_to` columns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressSpace {
    /// 32-bit IPv4 numbers
    Ipv4,
    /// 128-bit IPv6 numbers, with IPv4 rows stored under `::ffff:0:0/96`
    Ipv6,
}

impl AddressSpace {
    /// Numbering implied by the ranges: any number past 32 bits means IPv6
    fn of(ranges: &[IpRange]) -> Self {
        if ranges.iter().all(|r| r.to <= u128::from(u32::MAX)) {
            AddressSpace::Ipv4
        } else {
            AddressSpace::Ipv6
        }
    }

    /// IP number of `addr` in this numbering
    ///
    /// `None` when the address cannot appear in the table (IPv6 against an
    /// IPv4-only file).
    fn number(self, addr: IpAddr) -> Option<u128> {
        match (self, addr) {
            (AddressSpace::Ipv4, IpAddr::V4(v4)) => Some(u128::from(u32::from(v4))),
            (AddressSpace::Ipv4, IpAddr::V6(v6)) => v6.to_ipv4_mapped().map(|v4| u128::from(u32::from(v4))),
            (AddressSpace::Ipv6, IpAddr::V4(v4)) => Some(u128::from(v4.to_ipv6_mapped())),
            (AddressSpace::Ipv6, IpAddr::V6(v6)) => Some(u128::from(v6)),
        }
    }
}

/// ProxyDatabase is the resolver's read-only range table
#[derive(Debug)]
pub struct ProxyDatabase {
    /// Path the database was loaded from
    path: PathBuf,

    /// Column layout shared by every row
    layout: Layout,

    /// IPv4 or IPv6 numbering
    space: AddressSpace,

    /// Ranges sorted by start, non-overlapping
    ranges: Vec<IpRange>,
}

impl ProxyDatabase {
    /// Open and parse a database file
    ///
    /// # Arguments
    /// * `path` - Path to the IP2Proxy CSV file
    /// * `options` - Whether to memory-map the file
    ///
    /// # Returns
    /// * `Result<ProxyDatabase>` - Loaded database
    pub fn open<P: AsRef<Path>>(path: P, options: LoadOptions) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;

        let (layout, ranges) = if options.memory_mapped {
            if file.metadata()?.len() == 0 {
                return Err(Error::Empty);
            }
            // SAFETY: the mapping is read-only and dropped once parsing is done;
            // the file must not be truncated while it is being parsed.
            let mmap = unsafe { Mmap::map(&file)? };
            parse_database(&mmap)?
        } else {
            let bytes = std::fs::read(path)?;
            parse_database(&bytes)?
        };

        let db = Self::from_ranges(layout, ranges)?;
        info!(
            path = %path.display(),
            layout = layout.name(),
            space = ?db.space,
            ranges = db.len(),
            memory_mapped = options.memory_mapped,
            "Loaded proxy database"
        );

        Ok(Self {
            path: path.to_path_buf(),
            ..db
        })
    }

    /// Build a database from already-parsed ranges
    ///
    /// Ranges are sorted by start; overlapping ranges are rejected. The
    /// address space is IPv6 as soon as one range ends past 32 bits.
    pub fn from_ranges(layout: Layout, mut ranges: Vec<IpRange>) -> Result<Self> {
        if ranges.is_empty() {
            return Err(Error::Empty);
        }

        ranges.sort_by_key(|r| r.from);
        for pair in ranges.windows(2) {
            if pair[1].from <= pair[0].to {
                return Err(Error::Overlap {
                    first: pair[0].from,
                    second: pair[1].from,
                });
            }
        }

        Ok(Self {
            path: PathBuf::new(),
            layout,
            space: AddressSpace::of(&ranges),
            ranges,
        })
    }

    /// Find the record covering `addr`
    pub fn lookup(&self, addr: IpAddr) -> Option<&ProxyRecord> {
        let ip = self.space.number(addr)?;
        let idx = self.ranges.partition_point(|r| r.from <= ip);
        if idx == 0 {
            return None;
        }

        let range = &self.ranges[idx - 1];
        range.contains(ip).then_some(&range.record)
    }

    /// Parse `addr` and find the record covering it
    pub fn lookup_str(&self, addr: &str) -> Result<Option<&ProxyRecord>> {
        let parsed: IpAddr = addr
            .trim()
            .parse()
            .map_err(|_| Error::InvalidAddress(addr.to_string()))?;
        Ok(self.lookup(parsed))
    }

    /// Column layout of the loaded file
    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Numbering of the loaded file
    pub fn address_space(&self) -> AddressSpace {
        self.space
    }

    /// Path the database was opened from (empty when built in memory)
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the number of ranges
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Check if the database is empty
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}
