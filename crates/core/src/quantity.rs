//! Minimal Kubernetes quantity parsing: CPU in millicores, memory in bytes.

use crate::{Error, Result};

pub fn parse_cpu_millis(q: &str) -> Result<i64> {
    let s = q.trim();
    if let Some(m) = s.strip_suffix('m') {
        return m.parse::<i64>().map_err(|_| invalid("cpu", q));
    }
    let cores: f64 = s.parse().map_err(|_| invalid("cpu", q))?;
    Ok((cores * 1000.0).round() as i64)
}

pub fn parse_memory_bytes(q: &str) -> Result<i64> {
    const UNITS: [(&str, i64); 12] = [
        ("Ki", 1 << 10),
        ("Mi", 1 << 20),
        ("Gi", 1 << 30),
        ("Ti", 1 << 40),
        ("Pi", 1 << 50),
        ("Ei", 1 << 60),
        ("k", 1_000),
        ("M", 1_000_000),
        ("G", 1_000_000_000),
        ("T", 1_000_000_000_000),
        ("P", 1_000_000_000_000_000),
        ("E", 1_000_000_000_000_000_000),
    ];
    let s = q.trim();
    for (suffix, mult) in UNITS {
        if let Some(num) = s.strip_suffix(suffix) {
            let v: f64 = num.parse().map_err(|_| invalid("memory", q))?;
            return Ok((v * mult as f64).round() as i64);
        }
    }
    s.parse::<i64>().map_err(|_| invalid("memory", q))
}

/// Compare two quantities of the given resource, falling back to textual equality when
/// either side does not parse.
pub fn same_quantity(resource: &str, a: &str, b: &str) -> bool {
    let parsed = match resource {
        "cpu" => parse_cpu_millis(a).ok().zip(parse_cpu_millis(b).ok()),
        _ => parse_memory_bytes(a).ok().zip(parse_memory_bytes(b).ok()),
    };
    match parsed {
        Some((x, y)) => x == y,
        None => a == b,
    }
}

fn invalid(kind: &str, q: &str) -> Error { Error::Validation(format!("could not parse {} quantity {:?}", kind, q)) }
