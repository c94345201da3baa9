//! Data model for documents, roots and projected result rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// MIME type of a directory document.
pub const MIME_TYPE_DIR: &str = "vnd.dochub.document/directory";

/// Column names used when documents and roots are projected into rows. The
/// constants match the serialized field names of [`DocumentInfo`] and
/// [`RootInfo`].
pub mod columns {
    pub const DOCUMENT_ID: &str = "document_id";
    pub const DISPLAY_NAME: &str = "display_name";
    pub const MIME_TYPE: &str = "mime_type";
    pub const FLAGS: &str = "flags";
    pub const LAST_MODIFIED: &str = "last_modified";
    pub const SIZE: &str = "size";
    pub const SUMMARY: &str = "summary";
    pub const ICON: &str = "icon";

    pub const ROOT_ID: &str = "root_id";
    pub const ROOT_DOCUMENT_ID: &str = "document_id";
    pub const TITLE: &str = "title";
    pub const AVAILABLE_BYTES: &str = "available_bytes";
    pub const MIME_TYPES: &str = "mime_types";
}

/// Capability flags of a single document.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentFlags {
    pub supports_thumbnail: bool,
    pub supports_write: bool,
    pub supports_delete: bool,
    pub supports_rename: bool,
    pub supports_move: bool,
    pub supports_copy: bool,
    pub supports_remove: bool,
    pub virtual_document: bool,
    pub dir_supports_create: bool,
    pub dir_prefers_grid: bool,
    pub dir_prefers_last_modified: bool,
    pub web_linkable: bool,
}

/// Capability flags of a root.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RootFlags {
    pub supports_recents: bool,
    pub supports_search: bool,
    pub supports_create: bool,
    pub supports_is_child: bool,
    pub local_only: bool,
    pub advanced: bool,
    pub empty_loading: bool,
}

/// A node in a provider's document tree. The id is opaque, unique within the
/// provider, stable across reads, and may change on rename, move or copy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub document_id: String,
    pub display_name: String,
    pub mime_type: String,
    pub flags: DocumentFlags,
    pub last_modified: DateTime<Utc>,
    pub size: Option<u64>,
    pub summary: Option<String>,
    pub icon: Option<String>,
}

impl DocumentInfo {
    pub fn new(
        document_id: impl Into<String>,
        display_name: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            display_name: display_name.into(),
            mime_type: mime_type.into(),
            flags: DocumentFlags::default(),
            last_modified: Utc::now(),
            size: None,
            summary: None,
            icon: None,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.mime_type == MIME_TYPE_DIR
    }
}

/// An entry point exposing one document subtree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RootInfo {
    pub root_id: String,
    pub document_id: String,
    pub title: String,
    pub flags: RootFlags,
    pub summary: Option<String>,
    pub icon: Option<String>,
    pub available_bytes: Option<u64>,
    pub mime_types: Option<Vec<String>>,
}

impl RootInfo {
    pub fn new(
        root_id: impl Into<String>,
        document_id: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            root_id: root_id.into(),
            document_id: document_id.into(),
            title: title.into(),
            flags: RootFlags::default(),
            summary: None,
            icon: None,
            available_bytes: None,
            mime_types: None,
        }
    }
}

/// Sort order requested for a child-document query. Interpretation beyond
/// these well-known orders is up to the provider.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    #[default]
    DisplayName,
    LastModified,
    Size,
}

/// One projected result row.
pub type Row = serde_json::Map<String, Value>;

/// A set of projected rows plus the out-of-band loading flag. Absence of the
/// flag means "no known outstanding fetch", not a completeness guarantee.
#[derive(Clone, Debug, Default)]
pub struct RowSet {
    pub rows: Vec<Row>,
    pub loading: bool,
}

impl RowSet {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Typed multi-document query result returned by a backing store before
/// projection is applied.
#[derive(Clone, Debug, Default)]
pub struct DocSet {
    pub docs: Vec<DocumentInfo>,
    pub loading: bool,
}

impl DocSet {
    pub fn from_docs(docs: Vec<DocumentInfo>) -> Self {
        Self {
            docs,
            loading: false,
        }
    }
}

/// Serialize a model value into a row, keeping only the projected columns.
/// `None` means all columns; unknown requested columns are simply absent.
pub fn project<T: Serialize>(value: &T, projection: Option<&[&str]>) -> Row {
    let mut row = match serde_json::to_value(value) {
        Ok(Value::Object(map)) => map,
        _ => Row::new(),
    };
    if let Some(wanted) = projection {
        row.retain(|key, _| wanted.contains(&key.as_str()));
    }
    row
}
