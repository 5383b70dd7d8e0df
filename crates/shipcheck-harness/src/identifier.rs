//! Unique resource names for scenarios
//!
//! Every scenario gets a name of the form `<label>-<suffix>` that is used
//! for both its Build and BuildRun. Names are unique within the process:
//! a registry of names in use makes concurrent scenarios redraw on
//! collision instead of stepping on each other. A scenario releases its
//! name when it finishes.

use std::sync::OnceLock;

use dashmap::DashSet;
use rand::Rng;

/// Length of the random suffix
pub const SUFFIX_LEN: usize = 5;

/// Longest name Kubernetes accepts for a label value
pub const MAX_NAME_LEN: usize = 63;

const SUFFIX_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Collisions tolerated at one suffix length before it grows
const COLLISIONS_PER_LENGTH: u32 = 8;

const FALLBACK_LABEL: &str = "scenario";

static ISSUED: OnceLock<DashSet<String>> = OnceLock::new();

/// Generate a name for a scenario, unique within this process.
///
/// The label is sanitized to DNS-1123 form and truncated so the whole name
/// fits in [`MAX_NAME_LEN`] characters.
pub fn generate(label: &str) -> String {
    let issued = ISSUED.get_or_init(DashSet::new);
    let base = sanitize_label(label);
    let mut suffix_len = SUFFIX_LEN;
    let mut collisions = 0u32;

    loop {
        let id = compose(&base, &random_suffix(suffix_len));
        if issued.insert(id.clone()) {
            return id;
        }
        collisions += 1;
        if collisions % COLLISIONS_PER_LENGTH == 0 {
            suffix_len += 1;
        }
    }
}

/// Return a name to the pool once its scenario has finished
pub fn release(id: &str) -> bool {
    ISSUED.get().is_some_and(|issued| issued.remove(id).is_some())
}

#[cfg(test)]
pub(crate) fn is_issued(id: &str) -> bool {
    ISSUED.get().is_some_and(|issued| issued.contains(id))
}

/// Lowercase the label and collapse anything outside `[a-z0-9-]` into `-`
pub fn sanitize_label(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    for c in label.chars().flat_map(char::to_lowercase) {
        let c = if c.is_ascii_lowercase() || c.is_ascii_digit() {
            c
        } else {
            '-'
        };
        if c == '-' && (out.is_empty() || out.ends_with('-')) {
            continue;
        }
        out.push(c);
    }
    let trimmed = out.trim_end_matches('-');
    if trimmed.is_empty() {
        FALLBACK_LABEL.to_string()
    } else {
        trimmed.to_string()
    }
}

fn compose(base: &str, suffix: &str) -> String {
    let room = MAX_NAME_LEN.saturating_sub(suffix.len() + 1);
    // base is ASCII after sanitizing, so byte slicing is safe
    let prefix = base[..base.len().min(room)].trim_end_matches('-');
    if prefix.is_empty() {
        suffix.to_string()
    } else {
        format!("{prefix}-{suffix}")
    }
}

fn random_suffix(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| SUFFIX_CHARSET[rng.gen_range(0..SUFFIX_CHARSET.len())] as char)
        .collect()
}
