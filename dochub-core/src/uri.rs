//! Parses request paths into typed operation descriptors.

use crate::error::{Error, Result};

/// URI scheme accepted by [`parse_uri`].
pub const SCHEME: &str = "dochub";

const PATH_ROOT: &str = "root";
const PATH_DOCUMENT: &str = "document";
const PATH_TREE: &str = "tree";
const PATH_CHILDREN: &str = "children";
const PATH_RECENT: &str = "recent";
const PATH_SEARCH: &str = "search";
const QUERY_PARAM: &str = "query";

/// The closed set of operations a request path can address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    Roots,
    Root { root_id: String },
    Recent { root_id: String },
    Search { root_id: String, query: String },
    Document { document_id: String },
    Children { document_id: String },
    DocumentTree { anchor_id: String, document_id: String },
    ChildrenTree { anchor_id: String, document_id: String },
}

impl Operation {
    /// Whether the request arrived through a tree-scoped URI.
    pub fn is_tree(&self) -> bool {
        matches!(
            self,
            Operation::DocumentTree { .. } | Operation::ChildrenTree { .. }
        )
    }

    pub fn tree_anchor(&self) -> Option<&str> {
        match self {
            Operation::DocumentTree { anchor_id, .. }
            | Operation::ChildrenTree { anchor_id, .. } => Some(anchor_id),
            _ => None,
        }
    }

    pub fn document_id(&self) -> Option<&str> {
        match self {
            Operation::Document { document_id }
            | Operation::Children { document_id }
            | Operation::DocumentTree { document_id, .. }
            | Operation::ChildrenTree { document_id, .. } => Some(document_id),
            _ => None,
        }
    }
}

/// Route a request path to its operation descriptor. The eight shapes are
/// disjoint by segment count and literal segments; anything else is a fatal
/// [`Error::UnsupportedPath`], never a partial match.
pub fn route(path: &str) -> Result<Operation> {
    let (raw_path, raw_query) = match path.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path, None),
    };
    let segments: Vec<&str> = raw_path.trim_matches('/').split('/').collect();

    let unsupported = || Error::UnsupportedPath(path.to_string());
    if segments.iter().any(|s| s.is_empty()) {
        return Err(unsupported());
    }

    let op = match segments.as_slice() {
        [PATH_ROOT] => Operation::Roots,
        [PATH_ROOT, root] => Operation::Root {
            root_id: percent_decode(root),
        },
        [PATH_ROOT, root, PATH_RECENT] => Operation::Recent {
            root_id: percent_decode(root),
        },
        [PATH_ROOT, root, PATH_SEARCH] => {
            let query = raw_query
                .and_then(query_param)
                .ok_or_else(unsupported)?;
            Operation::Search {
                root_id: percent_decode(root),
                query,
            }
        }
        [PATH_DOCUMENT, doc] => Operation::Document {
            document_id: percent_decode(doc),
        },
        [PATH_DOCUMENT, doc, PATH_CHILDREN] => Operation::Children {
            document_id: percent_decode(doc),
        },
        [PATH_TREE, anchor, PATH_DOCUMENT, doc] => Operation::DocumentTree {
            anchor_id: percent_decode(anchor),
            document_id: percent_decode(doc),
        },
        [PATH_TREE, anchor, PATH_DOCUMENT, doc, PATH_CHILDREN] => Operation::ChildrenTree {
            anchor_id: percent_decode(anchor),
            document_id: percent_decode(doc),
        },
        _ => return Err(unsupported()),
    };
    Ok(op)
}

/// Parse a full request URI of the form `dochub://{authority}/{path}` into
/// the authority and the routed operation. Authority comparison against the
/// provider's own identity is the facade's job.
pub fn parse_uri(uri: &str) -> Result<(String, Operation)> {
    let rest = uri
        .strip_prefix(SCHEME)
        .and_then(|r| r.strip_prefix("://"))
        .ok_or_else(|| Error::UnsupportedPath(uri.to_string()))?;
    let (authority, path) = rest
        .split_once('/')
        .ok_or_else(|| Error::UnsupportedPath(uri.to_string()))?;
    if authority.is_empty() {
        return Err(Error::UnsupportedPath(uri.to_string()));
    }
    Ok((authority.to_string(), route(path)?))
}

fn query_param(raw_query: &str) -> Option<String> {
    raw_query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == QUERY_PARAM).then(|| percent_decode(value))
    })
}

/// Decode `%XX` escapes. Ids are opaque byte strings, so a stray or malformed
/// escape is kept literally rather than rejected.
fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let (Some(hi), Some(lo)) = (
                bytes.get(i + 1).and_then(|b| (*b as char).to_digit(16)),
                bytes.get(i + 2).and_then(|b| (*b as char).to_digit(16)),
            ) {
                out.push((hi * 16 + lo) as u8);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
