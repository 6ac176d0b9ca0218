use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Parse a comma-separated port list into a deduplicated list of TCP ports (1..=65535).
///
/// Pieces are trimmed; empty pieces, non-numbers, non-integers and values outside
/// the port range are dropped silently. First occurrence wins, so the output keeps
/// input order. Nothing valid means an empty list, not an error.
pub fn parse_ports(s: &str) -> Vec<u16> {
    let mut out: Vec<u16> = Vec::new();
    let mut seen = HashSet::new();

    for piece in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        if let Some(p) = parse_port_str(piece) {
            if seen.insert(p) {
                out.push(p);
            }
        }
    }
    out
}

/// Load a ports list from a file: commas or newlines separate values and
/// everything after `#` on a line is a comment.
pub fn load_ports_from_path(path: impl AsRef<Path>) -> Result<Vec<u16>> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("failed to read ports file: {}", path.as_ref().display()))?;
    let joined = content
        .lines()
        .map(|line| line.split('#').next().unwrap_or(""))
        .collect::<Vec<_>>()
        .join(",");
    Ok(parse_ports(&joined))
}

/// A conservative default list of commonly used TCP ports, used when a subnet
/// scan is requested without ports.
pub fn default_ports() -> Vec<u16> {
    const DEFAULT: &[u16] = &[
        21, 22, 23, 25, 53, 80, 110, 135, 139, 143, 443, 445, 631, 993, 995, 1433, 1883, 2375,
        3000, 3306, 3389, 5000, 5432, 5900, 6379, 8000, 8008, 8080, 8081, 8443, 8888, 9000, 9090,
        9200, 27017,
    ];
    DEFAULT.to_vec()
}

/// Numeric value strictly between 0 and 65536 with no fractional part.
/// Decimal or float notation (`80`, `80.0`, `1e3`) and unsigned `0x`/`0o`/`0b`
/// literals (`0x50`) are accepted when they name an integer in 1..=65535.
fn parse_port_str(s: &str) -> Option<u16> {
    let radix = match s.get(..2).map(str::to_ascii_lowercase).as_deref() {
        Some("0x") => Some(16),
        Some("0o") => Some(8),
        Some("0b") => Some(2),
        _ => None,
    };
    if let Some(radix) = radix {
        let digits = &s[2..];
        if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
            return None;
        }
        return u16::from_str_radix(digits, radix).ok().filter(|&p| p != 0);
    }
    let val: f64 = s.parse().ok()?;
    if !val.is_finite() || val.fract() != 0.0 || val <= 0.0 || val >= 65536.0 {
        return None;
    }
    Some(val as u16)
}
