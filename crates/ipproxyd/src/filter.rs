//! Proxy metadata filter applied to each event

use std::sync::Arc;

use ipproxycache::{resolve_uncached, CacheConfig, Event, Lookup, LookupCache, Resolver};
use tracing::debug;

/// Tag added to events whose lookup produced nothing
pub const LOOKUP_FAILURE_TAG: &str = "_ip2proxy_lookup_failure";

/// Filter settings
#[derive(Debug, Clone)]
pub struct FilterConfig {
    /// Field containing the IP address
    pub source: String,
    /// Field the proxy metadata is written to
    pub target: String,
    /// Route lookups through the cache
    pub use_cache: bool,
    /// Cache capacity
    pub cache_size: usize,
}

/// What the filter did with an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOutcome {
    /// Target field set
    Matched,
    /// Lookup produced nothing; event tagged
    Unsuccessful,
    /// No usable source IP; event untouched
    Skipped,
}

pub struct ProxyFilter {
    source: String,
    target: String,
    resolver: Arc<dyn Resolver>,
    cache: Option<Arc<LookupCache>>,
}

impl ProxyFilter {
    /// Build the filter, creating the shared cache when caching is on
    pub fn new(config: FilterConfig, resolver: Arc<dyn Resolver>) -> ipproxycache::Result<Self> {
        let cache = if config.use_cache {
            let cache_config = CacheConfig {
                capacity: config.cache_size,
                target: config.target.clone(),
                ..CacheConfig::default()
            };
            Some(Arc::new(LookupCache::new(cache_config, Arc::clone(&resolver))?))
        } else {
            None
        };

        Ok(Self::with_cache(config, resolver, cache))
    }

    /// Build the filter around an existing cache (or none)
    pub fn with_cache(config: FilterConfig, resolver: Arc<dyn Resolver>, cache: Option<Arc<LookupCache>>) -> Self {
        Self {
            source: config.source,
            target: config.target,
            resolver,
            cache,
        }
    }

    pub fn filter(&self, event: &mut Event) -> FilterOutcome {
        let ip = match event.source_ip(&self.source) {
            Some(ip) => ip.to_string(),
            None => return FilterOutcome::Skipped,
        };

        let lookup = match &self.cache {
            Some(cache) => cache.find(&ip, event),
            None => resolve_uncached(self.resolver.as_ref(), &ip, event, &self.target),
        };

        match lookup {
            Lookup::Found(value) => {
                event.set(self.target.as_str(), value);
                FilterOutcome::Matched
            }
            outcome => {
                debug!(ip = %ip, ?outcome, "IP was not found in the database");
                event.add_tag(LOOKUP_FAILURE_TAG);
                FilterOutcome::Unsuccessful
            }
        }
    }

    /// The shared cache, when caching is on
    pub fn cache(&self) -> Option<&LookupCache> {
        self.cache.as_deref()
    }
}
