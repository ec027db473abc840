//! Parsing helpers for device option maps

use std::collections::HashMap;
use std::time::Duration;

use crate::error::{Error, Result};

/// Read a boolean option, falling back to `default` when unset
///
/// Accepts the usual spellings: `true`/`false`, `1`/`0`, `t`/`f`, `yes`/`no`.
pub fn parse_bool(
    op: &str,
    options: &HashMap<String, String>,
    key: &str,
    default: bool,
) -> Result<bool> {
    let Some(raw) = options.get(key) else {
        return Ok(default);
    };
    match raw.trim().to_lowercase().as_str() {
        "" => Ok(default),
        "true" | "t" | "1" | "yes" | "y" | "on" => Ok(true),
        "false" | "f" | "0" | "no" | "n" | "off" => Ok(false),
        _ => Err(Error::external_options(
            op,
            format!("unable to parse '{key}': {raw:?} is not a boolean"),
        )),
    }
}

/// Parse a duration such as `2s`, `500ms`, `1m30s` or a bare number of seconds
pub fn parse_duration(input: &str) -> std::result::Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("empty duration".to_string());
    }
    if let Ok(secs) = input.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = input;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| format!("missing unit in duration {input:?}"))?;
        if digits == 0 {
            return Err(format!("invalid duration {input:?}"));
        }
        let value: f64 = rest[..digits]
            .parse()
            .map_err(|_| format!("invalid duration {input:?}"))?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        let nanos_per_unit: f64 = match unit {
            "ns" => 1.0,
            "us" | "µs" => 1_000.0,
            "ms" => 1_000_000.0,
            "s" => 1_000_000_000.0,
            "m" => 60_000_000_000.0,
            "h" => 3_600_000_000_000.0,
            other => return Err(format!("unknown unit {other:?} in duration {input:?}")),
        };
        total += Duration::from_nanos((value * nanos_per_unit) as u64);
    }
    Ok(total)
}
