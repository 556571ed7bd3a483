// src/core/resource/http_index.rs

//! Extracts directory entries from an HTTP server's generated index page.

use crate::core::protocol::{DirectoryEntry, EntryKind};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use url::Url;

static HREF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)href\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>"']+))"#)
        .expect("href pattern is a valid regex")
});

/// Parses the entries of the index page `body` served for the directory `base`.
///
/// Links are resolved against `base`; only direct children of `base` on the same
/// origin are kept. A trailing `/` marks a subdirectory. Names are percent-decoded,
/// duplicates are dropped, and the result is sorted by name.
pub fn parse_index(body: &str, base: &Url) -> Vec<DirectoryEntry> {
    let mut entries: BTreeMap<String, EntryKind> = BTreeMap::new();

    for captures in HREF.captures_iter(body) {
        let Some(raw) = captures
            .get(1)
            .or_else(|| captures.get(2))
            .or_else(|| captures.get(3))
        else {
            continue;
        };
        if let Some((name, kind)) = child_entry(raw.as_str(), base) {
            // A name listed as both a file and a directory keeps the directory.
            entries
                .entry(name)
                .and_modify(|existing| *existing = (*existing).max(kind))
                .or_insert(kind);
        }
    }

    entries
        .into_iter()
        .map(|(name, kind)| DirectoryEntry { name, kind })
        .collect()
}

fn child_entry(href: &str, base: &Url) -> Option<(String, EntryKind)> {
    // Query-only and fragment links point back at the index itself.
    let href = href.trim();
    let href = href.split(['?', '#']).next().unwrap_or_default();
    if href.is_empty() {
        return None;
    }

    let target = base.join(href).ok()?;
    if target.scheme() != base.scheme()
        || target.host_str() != base.host_str()
        || target.port_or_known_default() != base.port_or_known_default()
    {
        return None;
    }

    let relative = target.path().strip_prefix(base.path())?;
    let (raw_name, kind) = match relative.strip_suffix('/') {
        Some(dir) => (dir, EntryKind::Directory),
        None => (relative, EntryKind::File),
    };
    if raw_name.is_empty() || raw_name.contains('/') {
        return None;
    }

    let name = urlencoding::decode(raw_name).ok()?.into_owned();
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return None;
    }
    Some((name, kind))
}
