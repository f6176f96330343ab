//! Resolver backed by the proxy range database

use ipproxycache::{Event, ResolveError, Resolver};
use ipproxydb::ProxyDatabase;
use serde_json::Value;

/// Writes the database record for an IP into the target field
pub struct DatabaseResolver {
    db: ProxyDatabase,
    target: String,
    hide_unsupported_fields: bool,
}

impl DatabaseResolver {
    pub fn new(db: ProxyDatabase, target: impl Into<String>, hide_unsupported_fields: bool) -> Self {
        Self {
            db,
            target: target.into(),
            hide_unsupported_fields,
        }
    }
}

impl Resolver for DatabaseResolver {
    fn resolve(&self, key: &str, event: &mut Event) -> Result<bool, ResolveError> {
        match self.db.lookup_str(key) {
            Ok(Some(record)) => {
                let fields = record.to_fields(self.hide_unsupported_fields);
                event.set(self.target.as_str(), Value::Object(fields));
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(e) => Err(ResolveError::InvalidKey(e.to_string())),
        }
    }
}
