//! Key codec
//!
//! Physical key layout on the shared default family:
//! ```text
//! ┌──────────────┬──────┬──────────────┐
//! │ prefix bytes │ 0x00 │ suffix bytes │
//! └──────────────┴──────┴──────────────┘
//! ```
//! Dedicated families store the suffix alone; the family implies the prefix.
//!
//! Prefixes must not contain `0x00`, and no other prefix may sort between
//! `prefix` and `prefix 0x01`, since prefix-wide deletes on the shared family
//! cover exactly `[prefix 0x00, prefix 0x01)`.

use crate::error::{Result, StoreError};

/// Separates prefix from suffix on the shared family
pub const SEPARATOR: u8 = 0x00;

/// Sorts after every key of a prefix on the shared family
pub const PAST_SEPARATOR: u8 = 0x01;

/// `prefix 0x00 suffix`
pub fn encode_shared(prefix: &str, suffix: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + 1 + suffix.len());
    key.extend_from_slice(prefix.as_bytes());
    key.push(SEPARATOR);
    key.extend_from_slice(suffix);
    key
}

/// Split a shared-family key at its first `0x00`
pub fn decode_shared(key: &[u8]) -> Result<(String, Vec<u8>)> {
    let split = key
        .iter()
        .position(|&b| b == SEPARATOR)
        .ok_or_else(|| StoreError::MalformedKey(format!("no separator in {:?}", escape(key))))?;
    let prefix = std::str::from_utf8(&key[..split])
        .map_err(|_| StoreError::MalformedKey(format!("prefix is not UTF-8 in {:?}", escape(key))))?;
    Ok((prefix.to_string(), key[split + 1..].to_vec()))
}

/// Suffix of a shared-family key, if it belongs to `prefix`
pub fn strip_shared<'k>(prefix: &str, key: &'k [u8]) -> Option<&'k [u8]> {
    let rest = key.strip_prefix(prefix.as_bytes())?;
    match rest.split_first() {
        Some((&SEPARATOR, suffix)) => Some(suffix),
        _ => None,
    }
}

/// Keys on a dedicated family are the suffix itself
pub fn encode_dedicated(suffix: &[u8]) -> Vec<u8> {
    suffix.to_vec()
}

/// First key past every key of `prefix` on the shared family
pub fn past_prefix(prefix: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + 1);
    key.extend_from_slice(prefix.as_bytes());
    key.push(PAST_SEPARATOR);
    key
}

/// Printable form of a binary key for errors and logs
pub fn escape(key: &[u8]) -> String {
    key.iter()
        .flat_map(|b| std::ascii::escape_default(*b))
        .map(char::from)
        .collect()
}
