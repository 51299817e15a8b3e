//! Volume size grammar and tolerance comparison.
//!
//! The array reports capacity in 512-byte blocks and rounds aggressively,
//! so equality is checked within max(8 MiB, 0.1%) of the requested size.

use std::sync::OnceLock;

use regex::Regex;

use msa_client::Volume;

use crate::error::{DriverError, Result};

const MIN_TOLERANCE_BYTES: i64 = 8 * 1024 * 1024;

fn size_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^([0-9]*\.?[0-9]+)\s*([A-Za-z]+)?$").expect("size regex"))
}

/// Parses `<number><unit>` with decimal (KB/MB/GB/TB/PB, powers of 1000)
/// and binary (KiB/MiB/GiB/TiB/PiB) suffixes, case-insensitive, optional
/// interior whitespace. Zero, negative, and unitless forms are rejected.
pub fn parse_size_to_bytes(raw: &str) -> Result<i64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(DriverError::Validation("size is required".to_string()));
    }

    let invalid = || DriverError::Validation(format!("invalid size {raw:?}"));

    let captures = size_pattern().captures(raw).ok_or_else(invalid)?;
    let value: f64 = captures
        .get(1)
        .ok_or_else(invalid)?
        .as_str()
        .parse()
        .map_err(|_| invalid())?;
    if value <= 0.0 {
        return Err(invalid());
    }

    let unit = captures
        .get(2)
        .map(|m| m.as_str().trim().to_uppercase())
        .unwrap_or_default();
    if unit.is_empty() {
        return Err(invalid());
    }

    let multiplier: f64 = match unit.as_str() {
        "B" => 1.0,
        "K" | "KB" => 1e3,
        "M" | "MB" => 1e6,
        "G" | "GB" => 1e9,
        "T" | "TB" => 1e12,
        "P" | "PB" => 1e15,
        "KIB" => 1024.0,
        "MIB" => 1024.0 * 1024.0,
        "GIB" => 1024.0 * 1024.0 * 1024.0,
        "TIB" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        "PIB" => 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0,
        _ => {
            return Err(DriverError::Validation(format!(
                "invalid size unit {unit:?}"
            )))
        }
    };

    Ok((value * multiplier + 0.5) as i64)
}

/// Renders a byte count with the largest decimal unit that keeps three
/// significant digits, for diagnostics.
pub fn format_size(bytes: i64) -> String {
    const UNITS: [(&str, f64); 5] = [
        ("PB", 1e15),
        ("TB", 1e12),
        ("GB", 1e9),
        ("MB", 1e6),
        ("KB", 1e3),
    ];

    for (unit, scale) in UNITS {
        if bytes.unsigned_abs() as f64 >= scale {
            return format!("{:.1}{unit}", bytes as f64 / scale);
        }
    }
    format!("{bytes}B")
}

pub fn size_tolerance(plan_bytes: i64) -> i64 {
    let relative = (plan_bytes as f64 * 0.001) as i64;
    relative.max(MIN_TOLERANCE_BYTES)
}

/// Whether the array-reported size matches the planned one within
/// tolerance. `size-numeric` counts 512-byte blocks.
pub fn volume_size_matches(plan_size: &str, volume: &Volume) -> Result<bool> {
    let plan_bytes = parse_size_to_bytes(plan_size)?;
    if volume.size_numeric.is_empty() {
        return Err(DriverError::State(
            "volume size-numeric is missing".to_string(),
        ));
    }

    let blocks: i64 = volume.size_numeric.parse().map_err(|_| {
        DriverError::State(format!("invalid size-numeric {:?}", volume.size_numeric))
    })?;
    let volume_bytes = blocks * 512;

    Ok((plan_bytes - volume_bytes).abs() <= size_tolerance(plan_bytes))
}
