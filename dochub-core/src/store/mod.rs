//! The backing store capability set.
//!
//! A provider implements [`DocumentStore`] for its storage; the facade holds
//! the implementation behind `Arc<dyn DocumentStore>` and never subclasses.
//! Every unimplemented mutating primitive reports `NotSupported`, fatal to
//! that call only.

pub mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::mime;
use crate::model::{DocSet, DocumentInfo, RootInfo, SortOrder};

/// Access mode for opening a document's byte stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpenMode {
    Read,
    Write,
    ReadWrite,
}

impl OpenMode {
    pub fn requires_write(self) -> bool {
        matches!(self, OpenMode::Write | OpenMode::ReadWrite)
    }
}

/// Requested thumbnail dimensions. Providers may return a larger or smaller
/// image than asked for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeHint {
    pub width: u32,
    pub height: u32,
}

/// An opened byte stream together with the type it is served as.
#[derive(Clone, Debug)]
pub struct ByteStream {
    pub mime_type: String,
    pub data: Bytes,
}

/// Provider-side primitives the facade dispatches to.
///
/// Long-running implementations (open, thumbnail generation, network-backed
/// queries) must poll the cancellation token periodically during blocking
/// work and abort promptly with [`Error::Cancelled`], releasing any partial
/// resource. Cancellation is advisory-cooperative, not preemptive.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn query_roots(&self) -> Result<Vec<RootInfo>>;

    /// Exactly one record, or [`Error::NotFound`].
    async fn query_document(&self, document_id: &str) -> Result<DocumentInfo>;

    async fn query_child_documents(&self, parent_id: &str, sort: SortOrder) -> Result<DocSet>;

    async fn query_recent_documents(&self, root_id: &str) -> Result<DocSet>;

    async fn query_search_documents(&self, root_id: &str, query: &str) -> Result<DocSet>;

    /// Single-step descendant predicate used for tree-scope validation. A
    /// provider may answer from shallow cached data or walk internally; the
    /// default declines everything.
    async fn is_child_document(&self, _parent_id: &str, _child_id: &str) -> Result<bool> {
        Ok(false)
    }

    /// Create a document under `parent_id`. The provider may alter the
    /// display name to avoid collisions; callers must not assume the
    /// returned id encodes the requested name.
    async fn create_document(
        &self,
        _parent_id: &str,
        _mime_type: &str,
        _display_name: &str,
    ) -> Result<String> {
        Err(Error::NotSupported("create_document"))
    }

    /// Rename a document. `Some(new_id)` reassigns the identity, `None`
    /// signals the id is unchanged.
    async fn rename_document(
        &self,
        _document_id: &str,
        _display_name: &str,
    ) -> Result<Option<String>> {
        Err(Error::NotSupported("rename_document"))
    }

    /// Delete a document. A directory deletion may cascade to descendants;
    /// revoking the descendants' grants is the provider's responsibility,
    /// the facade only revokes the one id it was asked about.
    async fn delete_document(&self, _document_id: &str) -> Result<()> {
        Err(Error::NotSupported("delete_document"))
    }

    /// Copy a document under a new parent. Must return a distinct, non-empty
    /// new id or fail; a silently-kept id is not a legal outcome.
    async fn copy_document(&self, _source_id: &str, _target_parent_id: &str) -> Result<String> {
        Err(Error::NotSupported("copy_document"))
    }

    /// Move a document between parents, returning its (possibly new) id.
    /// If the move makes the old id permanently unreachable the provider
    /// must revoke the old id's grants itself.
    async fn move_document(
        &self,
        _source_id: &str,
        _source_parent_id: &str,
        _target_parent_id: &str,
    ) -> Result<String> {
        Err(Error::NotSupported("move_document"))
    }

    /// Remove one parent edge, for documents that may live under several
    /// directories. Whether that was the last edge, and what follows from
    /// it, is the provider's call.
    async fn remove_document(&self, _document_id: &str, _parent_id: &str) -> Result<()> {
        Err(Error::NotSupported("remove_document"))
    }

    async fn open_document(
        &self,
        _document_id: &str,
        _mode: OpenMode,
        _cancel: &CancellationToken,
    ) -> Result<ByteStream> {
        Err(Error::NotSupported("open_document"))
    }

    async fn open_document_thumbnail(
        &self,
        _document_id: &str,
        _size_hint: SizeHint,
        _cancel: &CancellationToken,
    ) -> Result<ByteStream> {
        Err(Error::NotSupported("open_document_thumbnail"))
    }

    /// Type-converting open. `options` is an opaque bag the hosting layer
    /// passes through untouched.
    async fn open_typed_document(
        &self,
        _document_id: &str,
        _mime_filter: &str,
        _options: Option<&serde_json::Value>,
        _cancel: &CancellationToken,
    ) -> Result<ByteStream> {
        Err(Error::NotSupported("open_typed_document"))
    }

    /// Stream types servable for a document under `mime_filter`. The default
    /// derives from the declared type of [`query_document`], filtered by the
    /// matching rule and excluding virtual documents; a failing query yields
    /// an empty answer here rather than an error.
    async fn document_stream_types(
        &self,
        document_id: &str,
        mime_filter: &str,
    ) -> Result<Vec<String>> {
        let doc = match self.query_document(document_id).await {
            Ok(doc) => doc,
            Err(_) => return Ok(Vec::new()),
        };
        if doc.flags.virtual_document {
            return Ok(Vec::new());
        }
        if mime::mime_type_matches(mime_filter, &doc.mime_type) {
            Ok(vec![doc.mime_type])
        } else {
            Ok(Vec::new())
        }
    }
}
