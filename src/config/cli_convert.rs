//! CLI to Config conversion utilities

use crate::config::cli;
use crate::config::AxisConfig;
use crate::distributed::Role;
use anyhow::{Context, Result};

/// Parse a size string (e.g., "1G", "100M", "4k") to bytes
pub fn parse_size(s: &str) -> Result<u64> {
    let s = s.trim().to_lowercase();

    let (num_str, multiplier) = if s.ends_with("k") || s.ends_with("kb") {
        (s.trim_end_matches("kb").trim_end_matches("k"), 1024u64)
    } else if s.ends_with("m") || s.ends_with("mb") {
        (s.trim_end_matches("mb").trim_end_matches("m"), 1024 * 1024)
    } else if s.ends_with("g") || s.ends_with("gb") {
        (s.trim_end_matches("gb").trim_end_matches("g"), 1024 * 1024 * 1024)
    } else {
        (s.as_str(), 1)
    };

    let num: u64 = num_str.parse()
        .with_context(|| format!("Invalid size format: {}", s))?;

    num.checked_mul(multiplier)
        .with_context(|| format!("Size out of range: {}", s))
}

/// Parse a duration string (e.g., "500ms", "5s", "1m") to milliseconds
pub fn parse_duration_ms(s: &str) -> Result<u64> {
    let s = s.trim().to_lowercase();

    let (num_str, multiplier) = if s.ends_with("ms") {
        (s.trim_end_matches("ms"), 1u64)
    } else if s.ends_with("s") {
        (s.trim_end_matches("s"), 1000)
    } else if s.ends_with("m") {
        (s.trim_end_matches("m"), 60_000)
    } else {
        (s.as_str(), 1)
    };

    let num: u64 = num_str.parse()
        .with_context(|| format!("Invalid duration format: {}", s))?;

    Ok(num * multiplier)
}

/// Parse axes written as `first:last[:stride]`, comma separated
///
/// `"0:9,0:18:2"` describes a 2-D block: rows 0..=9, every other column of
/// 0..=18.
pub fn parse_axes(s: &str) -> Result<Vec<AxisConfig>> {
    s.split(',')
        .map(|axis| {
            let parts: Vec<&str> = axis.trim().split(':').collect();
            let field = |i: usize, what: &str| -> Result<u64> {
                parts[i].trim().parse()
                    .with_context(|| format!("Invalid {} '{}' in axis '{}'", what, parts[i], axis))
            };

            match parts.len() {
                2 => Ok(AxisConfig { first: field(0, "first")?, last: field(1, "last")?, stride: 1 }),
                3 => Ok(AxisConfig {
                    first: field(0, "first")?,
                    last: field(1, "last")?,
                    stride: field(2, "stride")?,
                }),
                _ => anyhow::bail!("Axis '{}' is not of the form first:last[:stride]", axis),
            }
        })
        .collect()
}

/// Split a bind address into host and optional port
pub fn parse_bind(s: &str) -> Result<(String, Option<u16>)> {
    let s = s.trim();

    // Bare IPv6 literal
    if s.matches(':').count() > 1 && !s.starts_with('[') {
        return Ok((s.to_string(), None));
    }

    match s.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse::<u16>()
                .with_context(|| format!("Invalid port in bind address: {}", s))?;
            let host = host.trim_start_matches('[').trim_end_matches(']');
            Ok((host.to_string(), Some(port)))
        }
        None => Ok((s.to_string(), None)),
    }
}

pub fn convert_role(cli_role: cli::RoleArg) -> Role {
    match cli_role {
        cli::RoleArg::Provider => Role::Provider,
        cli::RoleArg::Consumer => Role::Consumer,
    }
}
