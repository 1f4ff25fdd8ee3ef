//! Identity normalization.
//!
//! Every protocol names a machine differently: DHCP by raw hardware address,
//! PXELinux by `01-<dashed-mac>` or an 8-digit hex IPv4, HTTP by a slug.
//! These helpers reduce all of them to one comparable form:
//!
//! - MACs become lower-case and colon-separated (`aa:bb:cc:dd:ee:ff`)
//! - hex IPs become [`Ipv4Addr`]
//! - slugs replace `.` and `:` with `-`
//!
//! Empty input is "no identity" (`Ok(None)`), never an error. Non-empty
//! malformed input is an identity error.

use crate::error::{PxeError, Result};
use std::net::Ipv4Addr;

/// Normalize a MAC address to lower-case colon-separated form.
///
/// Accepts `aa:bb:cc:dd:ee:ff`, `AA-BB-CC-DD-EE-FF`, Cisco-style
/// `aabb.ccdd.eeff`, and bare `aabbccddeeff`. Idempotent.
pub fn normalize_mac(raw: &str) -> Result<Option<String>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }

    let invalid = || PxeError::InvalidMac(raw.to_string());

    let groups: Vec<&str> = if raw.contains([':', '-']) {
        raw.split([':', '-']).collect()
    } else if raw.contains('.') {
        raw.split('.').collect()
    } else {
        vec![raw]
    };

    let group_len = match groups.len() {
        6 => 2,
        3 => 4,
        1 => 12,
        _ => return Err(invalid()),
    };

    let mut hex = String::with_capacity(12);
    for group in &groups {
        if group.len() != group_len || !group.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        hex.push_str(group);
    }

    let hex = hex.to_ascii_lowercase();
    let octets: Vec<&str> = (0..6).map(|i| &hex[i * 2..i * 2 + 2]).collect();
    Ok(Some(octets.join(":")))
}

/// Normalize a list of MACs, dropping blanks, malformed entries and duplicates
/// while keeping first-seen order.
pub fn normalize_mac_list<I, S>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut normalized: Vec<String> = Vec::new();
    for raw in values {
        if let Ok(Some(mac)) = normalize_mac(raw.as_ref()) {
            if !normalized.contains(&mac) {
                normalized.push(mac);
            }
        }
    }
    normalized
}

/// Format a hardware address from a DHCP `chaddr` field.
pub fn mac_from_bytes(bytes: &[u8]) -> Result<String> {
    let octets = bytes
        .get(..6)
        .ok_or_else(|| PxeError::InvalidMac(format!("{} byte hardware address", bytes.len())))?;
    Ok(octets
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":"))
}

/// Decode a PXELinux hex-encoded IPv4 address (`0A000005` -> `10.0.0.5`).
///
/// Returns `None` unless the input is exactly eight hex digits.
pub fn decode_pxelinux_hex_ip(value: &str) -> Option<Ipv4Addr> {
    let value = value.trim();
    if value.len() != 8 || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(value, 16).ok().map(Ipv4Addr::from)
}

/// Encode an IPv4 address the way PXELinux requests it.
pub fn encode_pxelinux_hex_ip(addr: Ipv4Addr) -> String {
    format!("{:08X}", u32::from(addr))
}

/// Parse a dotted-decimal IPv4 address.
pub fn parse_ipv4(raw: &str) -> Result<Option<Ipv4Addr>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse()
        .map(Some)
        .map_err(|_| PxeError::InvalidAddress(raw.to_string()))
}

/// Derive the URL-safe slug for a management address (`10.0.0.5` -> `10-0-0-5`).
pub fn host_slug(value: &str) -> String {
    value.trim().to_lowercase().replace(['.', ':'], "-")
}

/// Alphanumeric slug; runs of anything else collapse to a single dash.
fn alnum_slug(value: &str) -> String {
    let mut slug = String::new();
    let mut last_dash = false;
    for ch in value.trim().to_lowercase().chars() {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            slug.push(ch);
            last_dash = false;
        } else if !last_dash && !slug.is_empty() {
            slug.push('-');
            last_dash = true;
        }
    }
    slug.trim_matches('-').to_string()
}

/// Directory name under `artifacts/` holding an image's boot payloads.
///
/// `<slug>-<crc32 of the name>`, so names that slug identically stay apart.
pub fn artifact_dir_name(image_name: &str) -> String {
    let name = match image_name.trim() {
        "" => "iso",
        trimmed => trimmed,
    };
    let slug = match alnum_slug(name) {
        slug if slug.is_empty() => "iso".to_string(),
        slug => slug,
    };
    format!("{slug}-{:08x}", crc32fast::hash(name.as_bytes()))
}

/// Hostname handed to installers: `opn-<slug>`, DNS-label safe.
pub fn safe_hostname(slug: &str) -> String {
    let slug = if slug.is_empty() { "opn" } else { slug };
    let mut hostname: String = format!("opn-{slug}")
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-')
        .collect();
    if hostname.is_empty() {
        hostname = "opn-host".to_string();
    }
    hostname.truncate(63);
    hostname
}

/// Cloud-init instance id for a slug.
pub fn instance_id(slug: &str) -> String {
    format!("laas-{slug}")
}
