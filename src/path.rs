//! Storage path codec.
//!
//! FQDNs are stored under reverse-label paths so that a hierarchical backend
//! can answer sibling listings with a prefix scan: `a.b.c.example.com`
//! becomes `<prefix>/com/example/c/b/a`. Names are lowercased and the
//! protocol-form trailing dot is stripped before encoding; the DNS frontend
//! restores it when rendering answers.

use lazy_static::lazy_static;
use regex::Regex;

/// Wildcard labels. Both forms collapse sibling sets under one answer.
const WILDCARD_LABELS: [&str; 2] = ["*", "any"];

lazy_static! {
    // Dotted-quad with dots replaced by underscores, e.g. "1_2_3_4". Hosts of
    // wildcard records are stored under leaf labels of this shape.
    static ref HOST_LABEL: Regex = Regex::new(r"^\d{1,3}_\d{1,3}_\d{1,3}_\d{1,3}$").unwrap();
}

/// Lowercase a name and strip its terminal dot.
pub fn canonicalize(name: &str) -> String {
    name.trim_end_matches('.').to_lowercase()
}

/// Labels of a canonicalized name, left to right.
pub fn labels(name: &str) -> Vec<String> {
    canonicalize(name)
        .split('.')
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Encode a name into its full storage key, wildcard labels included.
pub fn path(name: &str, prefix: &str) -> String {
    let mut segments = vec![prefix.to_string()];
    let mut ls = labels(name);
    ls.reverse();
    segments.extend(ls);
    segments.join("/")
}

/// Encode a name, cutting the key at the first wildcard label.
///
/// Returns the path up to but excluding the wildcard, and whether a wildcard
/// was present; the resolver uses the flag to switch from an exact fetch to
/// a recursive prefix scan.
pub fn path_with_wildcard(name: &str, prefix: &str) -> (String, bool) {
    let mut segments = vec![prefix.to_string()];
    let mut ls = labels(name);
    ls.reverse();
    for l in ls {
        if is_wildcard_label(&l) {
            return (segments.join("/"), true);
        }
        segments.push(l);
    }
    (segments.join("/"), false)
}

/// Invert [`path`]: recover the canonical name from a storage key.
pub fn decode(key: &str, prefix: &str) -> String {
    let mut segments: Vec<&str> = key
        .trim_start_matches('/')
        .strip_prefix(prefix)
        .unwrap_or(key)
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();
    segments.reverse();
    segments.join(".")
}

pub fn is_wildcard_label(label: &str) -> bool {
    WILDCARD_LABELS.contains(&label)
}

/// True for the underscore-encoded IPv4 leaf labels of wildcard records.
pub fn is_host_label(label: &str) -> bool {
    HOST_LABEL.is_match(label)
}

/// Leaf label for a host of a wildcard record: `1.2.3.4` -> `1_2_3_4`.
pub fn host_label(host: &str) -> String {
    host.replace('.', "_")
}
