//! Weak ETags derived from a row's ETag property.

use sha2::{Digest, Sha256};

use crate::descriptor::EntityDescriptor;
use crate::row::Row;

/// `W/"<hex>"` over the first 16 bytes of SHA-256 of the ETag property value.
///
/// `None` when the entity type declares no ETag property.
#[must_use]
pub fn compute(descriptor: &EntityDescriptor, row: &Row) -> Option<String> {
    let prop = descriptor.etag_descriptor()?;
    let canonical = row.get_or_null(&prop.name).to_literal();
    let digest = Sha256::digest(canonical.as_bytes());
    Some(format!("W/\"{}\"", hex::encode(&digest[..16])))
}

/// Evaluate an `If-Match` header against the current ETag.
///
/// `*` matches any existing entity; a comma-separated list matches when any
/// element matches. Weak and strong forms of the same opaque tag compare equal.
#[must_use]
pub fn if_match(header: &str, current: &str) -> bool {
    header_matches(header, current)
}

/// Evaluate an `If-None-Match` header: true when the request's cached copy is current.
#[must_use]
pub fn if_none_match(header: &str, current: &str) -> bool {
    header_matches(header, current)
}

fn header_matches(header: &str, current: &str) -> bool {
    let header = header.trim();
    if header == "*" {
        return true;
    }
    let current = opaque(current);
    header
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .any(|t| opaque(t) == current)
}

fn opaque(tag: &str) -> &str {
    tag.trim().trim_start_matches("W/").trim_matches('"')
}
