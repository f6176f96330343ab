//! Per-line event handler

use std::sync::Arc;

use ipproxycache::Event;
use tracing::warn;

use crate::codec::error_line;
use crate::filter::ProxyFilter;

pub struct EventHandler {
    filter: Arc<ProxyFilter>,
}

impl EventHandler {
    pub fn new(filter: Arc<ProxyFilter>) -> Self {
        Self { filter }
    }

    /// Filter one JSON line and return the reply line
    ///
    /// Blocks on the cache lock; call from a blocking context.
    pub fn handle(&self, line: &str) -> Vec<u8> {
        let mut event = match Event::from_json(line) {
            Ok(event) => event,
            Err(e) => {
                warn!("Malformed event: {}", e);
                return error_line(&format!("invalid event: {}", e));
            }
        };

        self.filter.filter(&mut event);

        let mut reply = event.to_string().into_bytes();
        reply.push(b'\n');
        reply
    }

    pub fn filter(&self) -> &ProxyFilter {
        &self.filter
    }
}
