//! Deterministic event fingerprinting.
//!
//! Turns a structured error event into a stable grouping key: free text is
//! scrubbed of volatile substrings (timestamps, ids, addresses) by an
//! ordered, idempotent normalization pipeline, then hashed together with the
//! stack trace shape or, absent one, the event's level and platform.

pub mod normalize;

use oxtrack_common::types::{Event, StackFrame};
use std::collections::HashSet;

pub use normalize::normalize_message;

/// Number of hex characters kept from the digest. 16 bytes is compact but
/// still collision-resistant for grouping purposes.
const FINGERPRINT_HEX_LEN: usize = 32;

/// Compute the stable fingerprint of an event.
///
/// Stack-based hashing is used when the first exception carries at least one
/// frame; otherwise the normalized message, level, and platform are hashed.
/// Line numbers are rounded down to the nearest multiple of 10 so that
/// unrelated edits shifting code within a small region do not split issues.
pub fn fingerprint(event: &Event) -> String {
    let mut hasher = blake3::Hasher::new();

    if has_stack(event) {
        for exc in &event.exceptions {
            hasher.update(exc.exception_type.as_bytes());
            hasher.update(b"|");
            for frame in select_frames(&exc.frames) {
                hasher.update(frame.module.as_bytes());
                hasher.update(b":");
                hasher.update(frame.function.as_bytes());
                hasher.update(b":");
                if let Some(line) = frame.line_no {
                    hasher.update((line / 10 * 10).to_string().as_bytes());
                }
                hasher.update(b"|");
            }
            hasher.update(normalize_message(&exc.value).as_bytes());
            hasher.update(b"|");
        }
    } else {
        hasher.update(normalize_message(&event.message).as_bytes());
        hasher.update(b"|");
        hasher.update(event.level.as_bytes());
        hasher.update(b"|");
        hasher.update(event.platform.as_bytes());
    }

    let hex = hasher.finalize().to_hex();
    hex[..FINGERPRINT_HEX_LEN].to_string()
}

/// The stack-based path requires frames on the first exception; a chain
/// whose first entry is frameless falls through to message hashing.
fn has_stack(event: &Event) -> bool {
    event
        .exceptions
        .first()
        .is_some_and(|exc| !exc.frames.is_empty())
}

/// Prefer in-app frames; fall back to the full frame list when none are
/// flagged.
fn select_frames(frames: &[StackFrame]) -> impl Iterator<Item = &StackFrame> {
    let any_in_app = frames.iter().any(|f| f.in_app);
    frames.iter().filter(move |f| !any_in_app || f.in_app)
}

/// Precomputed `key=value` membership set for an event's tags. The analytics
/// store persists this alongside the raw tag map so that tag predicates are
/// O(1) membership tests instead of array scans.
pub fn tag_hashes(event: &Event) -> HashSet<String> {
    event
        .tags
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect()
}
