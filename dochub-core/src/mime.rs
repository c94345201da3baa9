//! MIME filter matching and open-path negotiation.

use crate::error::{Error, Result};
use crate::model::DocumentInfo;
use crate::store::SizeHint;

/// Filter matching anything.
pub const MIME_ANY: &str = "*/*";

/// How an open request should be served.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenStrategy {
    /// Serve the thumbnail path, independent of the MIME filter.
    Thumbnail(SizeHint),
    /// The existing byte stream can be served as-is.
    Direct,
    /// Delegate to the provider's type-converting open.
    Convert,
}

/// Whether `candidate` satisfies `filter`.
///
/// An empty candidate never matches. An empty filter or `*/*` matches any
/// non-empty candidate. Otherwise exact equality matches, and a filter
/// ending in `/*` matches iff the candidate up to and including its `/`
/// equals the filter up to its `/`. No other wildcard forms are legal.
pub fn mime_type_matches(filter: &str, candidate: &str) -> bool {
    if candidate.is_empty() {
        return false;
    }
    if filter.is_empty() || filter == MIME_ANY {
        return true;
    }
    if filter == candidate {
        return true;
    }
    if filter.ends_with("/*") {
        let prefix = &filter[..filter.len() - 1];
        if let Some(slash) = candidate.find('/') {
            return &candidate[..=slash] == prefix;
        }
    }
    false
}

/// Reject filters using `*` anywhere other than the legal `*/*` and
/// `type/*` forms, so malformed callers fail loudly instead of silently
/// never matching.
pub fn validate_filter(filter: &str) -> Result<()> {
    if filter.is_empty() || filter == MIME_ANY || !filter.contains('*') {
        return Ok(());
    }
    match filter.strip_suffix("/*") {
        Some(prefix) if !prefix.is_empty() && !prefix.contains(['*', '/']) => Ok(()),
        _ => Err(Error::InvalidMimeFilter(filter.to_string())),
    }
}

/// Resolve how to open `doc` given a MIME filter and an optional thumbnail
/// size hint. First match wins: a size hint forces the thumbnail path, a
/// wildcard-any filter or a concrete type match serves the stream directly,
/// anything else goes through the converting open. A virtual document's
/// concrete type is advisory only, so it never resolves to a direct open.
pub fn resolve_open(
    doc: &DocumentInfo,
    mime_filter: &str,
    size_hint: Option<SizeHint>,
) -> Result<OpenStrategy> {
    validate_filter(mime_filter)?;
    if let Some(hint) = size_hint {
        return Ok(OpenStrategy::Thumbnail(hint));
    }
    if doc.flags.virtual_document {
        return Ok(OpenStrategy::Convert);
    }
    if mime_filter.is_empty() || mime_filter == MIME_ANY {
        return Ok(OpenStrategy::Direct);
    }
    if mime_type_matches(mime_filter, &doc.mime_type) {
        return Ok(OpenStrategy::Direct);
    }
    Ok(OpenStrategy::Convert)
}
