//! IP2Proxy CSV parser using nom
//!
//! Row format (one range per line, fields optionally double-quoted):
//! ```text
//! "ip_from","ip_to","country_short","country_long"                              PX1
//! "ip_from","ip_to","proxy_type","country_short","country_long"                 PX2
//! "ip_from","ip_to","proxy_type","country_short","country_long","region","city","isp"   PX4
//! ```
//!
//! `ip_from` and `ip_to` are decimal IP numbers. Blank lines and lines starting
//! with `#` are ignored.

use nom::{
    branch::alt,
    bytes::complete::take_while,
    character::complete::char,
    combinator::all_consuming,
    multi::separated_list1,
    sequence::delimited,
    IResult,
};

use crate::error::{Error, Result};
use crate::record::{IpRange, Layout, ProxyRecord};

/// Parse a single CSV field, quoted or bare
fn field(input: &str) -> IResult<&str, &str> {
    alt((
        delimited(char('"'), take_while(|c| c != '"'), char('"')),
        take_while(|c| c != ',' && c != '"'),
    ))(input)
}

/// Split one row into its fields
///
/// The whole line must be consumed; trailing garbage is an error.
pub fn parse_fields(line: &str) -> IResult<&str, Vec<&str>> {
    all_consuming(separated_list1(char(','), field))(line)
}

fn parse_number(line_no: usize, name: &str, raw: &str) -> Result<u128> {
    raw.trim()
        .parse::<u128>()
        .map_err(|_| Error::parse(line_no, format!("{} is not a decimal IP number: {:?}", name, raw)))
}

fn owned(raw: &str) -> String {
    raw.trim().to_string()
}

/// Parse one row into a range, returning the layout its column count implies
pub fn parse_row(line_no: usize, line: &str) -> Result<(Layout, IpRange)> {
    let (_, fields) = parse_fields(line)
        .map_err(|e| Error::parse(line_no, format!("malformed row: {:?}", e)))?;

    let layout = Layout::from_columns(fields.len()).ok_or_else(|| {
        Error::parse(line_no, format!("unexpected column count {}", fields.len()))
    })?;

    let from = parse_number(line_no, "ip_from", fields[0])?;
    let to = parse_number(line_no, "ip_to", fields[1])?;
    if to < from {
        return Err(Error::parse(line_no, "ip_to is smaller than ip_from"));
    }

    let record = match layout {
        Layout::Px1 => ProxyRecord {
            proxy_type: None,
            country_short: owned(fields[2]),
            country_long: owned(fields[3]),
            region: None,
            city: None,
            isp: None,
        },
        Layout::Px2 => ProxyRecord {
            proxy_type: Some(owned(fields[2])),
            country_short: owned(fields[3]),
            country_long: owned(fields[4]),
            region: None,
            city: None,
            isp: None,
        },
        Layout::Px4 => ProxyRecord {
            proxy_type: Some(owned(fields[2])),
            country_short: owned(fields[3]),
            country_long: owned(fields[4]),
            region: Some(owned(fields[5])),
            city: Some(owned(fields[6])),
            isp: Some(owned(fields[7])),
        },
    };

    Ok((layout, IpRange { from, to, record }))
}

/// Parse a whole database file
///
/// All rows must share one layout.
pub fn parse_database(input: &[u8]) -> Result<(Layout, Vec<IpRange>)> {
    let text = std::str::from_utf8(input).map_err(|e| {
        // Report the line the bad byte sits on
        let line = input[..e.valid_up_to()].iter().filter(|&&b| b == b'\n').count() + 1;
        Error::parse(line, "invalid UTF-8")
    })?;

    let mut layout = None;
    let mut ranges = Vec::new();

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let line_no = idx + 1;
        let (row_layout, range) = parse_row(line_no, line)?;
        match layout {
            None => layout = Some(row_layout),
            Some(expected) if expected != row_layout => {
                return Err(Error::parse(
                    line_no,
                    format!("{} row in a {} database", row_layout.name(), expected.name()),
                ));
            }
            Some(_) => {}
        }
        ranges.push(range);
    }

    match layout {
        Some(layout) => Ok((layout, ranges)),
        None => Err(Error::Empty),
    }
}
