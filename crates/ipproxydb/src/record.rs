//! Range rows and the proxy metadata they carry

use serde_json::{Map, Value};

/// Value reported for a column the database layout does not carry
pub const NOT_SUPPORTED: &str = "NOT SUPPORTED";

/// Column layout of a database file, selected by column count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Country only
    Px1,
    /// Proxy type and country
    Px2,
    /// Proxy type, country, region, city and ISP
    Px4,
}

impl Layout {
    /// Layout for a row with `columns` fields (including `ip_from`/`ip_to`)
    pub fn from_columns(columns: usize) -> Option<Self> {
        match columns {
            4 => Some(Layout::Px1),
            5 => Some(Layout::Px2),
            8 => Some(Layout::Px4),
            _ => None,
        }
    }

    /// Short product name
    pub fn name(&self) -> &'static str {
        match self {
            Layout::Px1 => "PX1",
            Layout::Px2 => "PX2",
            Layout::Px4 => "PX4",
        }
    }
}

/// Metadata for one address range
///
/// `None` columns are not part of the database layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRecord {
    /// Proxy type code (`VPN`, `PUB`, `DCH`, ... or `-` for none)
    pub proxy_type: Option<String>,
    /// ISO 3166 country code
    pub country_short: String,
    /// Country name
    pub country_long: String,
    /// Region or state
    pub region: Option<String>,
    /// City
    pub city: Option<String>,
    /// Internet service provider
    pub isp: Option<String>,
}

impl ProxyRecord {
    /// Proxy classification: 0 not a proxy, 1 proxy, 2 data center or search engine
    pub fn is_proxy(&self) -> u8 {
        match self.proxy_type.as_deref() {
            // Country-only databases list proxy ranges exclusively
            None => 1,
            Some("-") | Some("") => 0,
            Some("DCH") | Some("SES") => 2,
            Some(_) => 1,
        }
    }

    /// Result fields as a JSON object
    ///
    /// Columns missing from the layout read [`NOT_SUPPORTED`] unless
    /// `hide_unsupported` is set, in which case they are left out.
    pub fn to_fields(&self, hide_unsupported: bool) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert("is_proxy".to_string(), Value::from(self.is_proxy()));

        let optional = [
            ("proxy_type", &self.proxy_type),
            ("region", &self.region),
            ("city", &self.city),
            ("isp", &self.isp),
        ];
        for (name, value) in optional {
            match value {
                Some(v) => {
                    fields.insert(name.to_string(), Value::from(v.as_str()));
                }
                None if !hide_unsupported => {
                    fields.insert(name.to_string(), Value::from(NOT_SUPPORTED));
                }
                None => {}
            }
        }

        fields.insert("country_short".to_string(), Value::from(self.country_short.as_str()));
        fields.insert("country_long".to_string(), Value::from(self.country_long.as_str()));
        fields
    }
}

/// Inclusive range of IP numbers sharing one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpRange {
    /// First IP number in the range
    pub from: u128,
    /// Last IP number in the range
    pub to: u128,
    /// Metadata for every address in the range
    pub record: ProxyRecord,
}

impl IpRange {
    /// Check whether `ip` falls inside the range
    pub fn contains(&self, ip: u128) -> bool {
        self.from <= ip && ip <= self.to
    }
}
