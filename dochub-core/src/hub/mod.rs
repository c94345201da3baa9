//! The document operation facade.
//!
//! Each request is one stateless transition: route, check permission,
//! dispatch to the backing store, then run the grant choreography the
//! operation mandates. The facade holds no request-spanning locks; ordering
//! between concurrent operations on the same id is the backing store's
//! discipline, and the loser of such a race fails with the store's
//! `NotFound` without corrupting grant state.

use std::sync::Arc;

use anyhow::anyhow;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::HubConfig;
use crate::error::{Error, Result};
use crate::grants::{GrantManager, Mode, TargetRef};
use crate::mime::{self, OpenStrategy};
use crate::model::{project, DocSet, RowSet, SortOrder};
use crate::notify::{ChangeBus, ChangeEvent};
use crate::store::{ByteStream, DocumentStore, OpenMode, SizeHint};
use crate::tree;
use crate::uri::{self, Operation};

/// Hard cap on rows returned from a recent-documents query.
pub const RECENT_LIMIT: usize = 64;

pub struct DocumentHub {
    store: Arc<dyn DocumentStore>,
    grants: Arc<GrantManager>,
    changes: ChangeBus,
    config: HubConfig,
}

impl DocumentHub {
    pub fn new(store: Arc<dyn DocumentStore>, config: HubConfig) -> Self {
        Self::with_parts(store, Arc::new(GrantManager::new()), ChangeBus::new(), config)
    }

    /// Build a hub around externally shared grant and notification state,
    /// so a backing store can hold the same handles for its own revocation
    /// and announcement obligations.
    pub fn with_parts(
        store: Arc<dyn DocumentStore>,
        grants: Arc<GrantManager>,
        changes: ChangeBus,
        config: HubConfig,
    ) -> Self {
        Self {
            store,
            grants,
            changes,
            config,
        }
    }

    pub fn grants(&self) -> &Arc<GrantManager> {
        &self.grants
    }

    pub fn changes(&self) -> &ChangeBus {
        &self.changes
    }

    pub fn authority(&self) -> &str {
        &self.config.authority
    }

    /// Parse a full request URI, reject foreign authorities, route, and run
    /// the addressed query, returning projected rows.
    pub async fn dispatch(
        &self,
        caller: &str,
        request_uri: &str,
        projection: Option<&[&str]>,
    ) -> Result<RowSet> {
        let (authority, op) = uri::parse_uri(request_uri)?;
        if authority != self.config.authority {
            warn!(requested = %authority, "request for foreign authority rejected");
            return Err(Error::AuthorityMismatch {
                expected: self.config.authority.clone(),
                actual: authority,
            });
        }
        self.query(caller, &op, projection).await
    }

    /// Run a routed query operation. Queries never mutate grants.
    pub async fn query(
        &self,
        caller: &str,
        op: &Operation,
        projection: Option<&[&str]>,
    ) -> Result<RowSet> {
        match op {
            Operation::Roots => self.roots(projection).await,
            Operation::Root { root_id } => self.root(caller, root_id, projection).await,
            Operation::Recent { root_id } => self.recent(caller, root_id, projection).await,
            Operation::Search { root_id, query } => {
                self.search(caller, root_id, query, projection).await
            }
            Operation::Document { document_id } => {
                self.document(caller, document_id, None, projection).await
            }
            Operation::Children { document_id } => {
                self.children(caller, document_id, None, projection).await
            }
            Operation::DocumentTree {
                anchor_id,
                document_id,
            } => {
                self.document(caller, document_id, Some(anchor_id), projection)
                    .await
            }
            Operation::ChildrenTree {
                anchor_id,
                document_id,
            } => {
                self.children(caller, document_id, Some(anchor_id), projection)
                    .await
            }
        }
    }

    /// Root enumeration is host-mediated and therefore ungated.
    pub async fn roots(&self, projection: Option<&[&str]>) -> Result<RowSet> {
        let roots = self.store.query_roots().await?;
        Ok(RowSet {
            rows: roots.iter().map(|r| project(r, projection)).collect(),
            loading: false,
        })
    }

    pub async fn root(
        &self,
        caller: &str,
        root_id: &str,
        projection: Option<&[&str]>,
    ) -> Result<RowSet> {
        self.check_access(caller, root_id, Mode::READ).await?;
        let root = self
            .store
            .query_roots()
            .await?
            .into_iter()
            .find(|r| r.root_id == root_id)
            .ok_or_else(|| Error::NotFound(root_id.to_string()))?;
        Ok(RowSet {
            rows: vec![project(&root, projection)],
            loading: false,
        })
    }

    pub async fn document(
        &self,
        caller: &str,
        document_id: &str,
        scope: Option<&str>,
        projection: Option<&[&str]>,
    ) -> Result<RowSet> {
        self.check_scoped_access(caller, document_id, Mode::READ, scope)
            .await?;
        let doc = self.store.query_document(document_id).await?;
        Ok(RowSet {
            rows: vec![project(&doc, projection)],
            loading: false,
        })
    }

    pub async fn children(
        &self,
        caller: &str,
        parent_id: &str,
        scope: Option<&str>,
        projection: Option<&[&str]>,
    ) -> Result<RowSet> {
        self.check_scoped_access(caller, parent_id, Mode::READ, scope)
            .await?;
        let set = self
            .store
            .query_child_documents(parent_id, SortOrder::default())
            .await?;
        Ok(to_rows(set, projection))
    }

    /// Recent documents under a root: strictly descending by last-modified,
    /// ties broken by ascending document id, capped at [`RECENT_LIMIT`].
    /// A recents result is a static snapshot; there is no change
    /// notification for it.
    pub async fn recent(
        &self,
        caller: &str,
        root_id: &str,
        projection: Option<&[&str]>,
    ) -> Result<RowSet> {
        self.check_access(caller, root_id, Mode::READ).await?;
        let mut set = self.store.query_recent_documents(root_id).await?;
        set.docs.sort_by(|a, b| {
            b.last_modified
                .cmp(&a.last_modified)
                .then_with(|| a.document_id.cmp(&b.document_id))
        });
        set.docs.truncate(RECENT_LIMIT);
        Ok(to_rows(set, projection))
    }

    /// Search under a root: provider relevance order, directories excluded.
    /// When richer results arrive later the provider announces
    /// [`ChangeEvent::SearchResults`] on the change bus and subscribed
    /// callers re-issue the query.
    pub async fn search(
        &self,
        caller: &str,
        root_id: &str,
        query: &str,
        projection: Option<&[&str]>,
    ) -> Result<RowSet> {
        self.check_access(caller, root_id, Mode::READ).await?;
        let mut set = self.store.query_search_documents(root_id, query).await?;
        set.docs.retain(|d| !d.is_directory());
        set.docs.truncate(self.config.search_limit);
        Ok(to_rows(set, projection))
    }

    /// Create a document. The store may alter the display name to avoid
    /// collisions, so the returned id must not be assumed to encode the
    /// requested name. No grant is issued for the new document; the caller
    /// already holds one on the parent.
    pub async fn create_document(
        &self,
        caller: &str,
        parent_id: &str,
        mime_type: &str,
        display_name: &str,
    ) -> Result<String> {
        self.check_access(caller, parent_id, Mode::WRITE).await?;
        let id = self
            .store
            .create_document(parent_id, mime_type, display_name)
            .await?;
        debug!(parent = parent_id, id = %id, "created document");
        self.changes.send(ChangeEvent::Created {
            id: id.clone(),
            parent_id: parent_id.to_string(),
        });
        Ok(id)
    }

    /// Rename a document, returning its current id. When the store
    /// reassigns the identity, the caller's grant is carried to the new id
    /// before any grant on the old id is revoked, so no observer sees a
    /// window with neither id granted.
    pub async fn rename_document(
        &self,
        caller: &str,
        document_id: &str,
        display_name: &str,
    ) -> Result<String> {
        self.check_access(caller, document_id, Mode::WRITE).await?;
        match self.store.rename_document(document_id, display_name).await? {
            Some(new_id) if new_id != document_id => {
                self.grants.transfer_on_rename(document_id, &new_id, caller);
                self.changes.send(ChangeEvent::Renamed {
                    old_id: document_id.to_string(),
                    new_id: new_id.clone(),
                });
                Ok(new_id)
            }
            _ => Ok(document_id.to_string()),
        }
    }

    /// Delete a document. Grants on the id are revoked unconditionally in
    /// both plain and tree-anchored form once the store succeeds; the store
    /// itself revokes for any descendants a cascading delete took with it.
    pub async fn delete_document(&self, caller: &str, document_id: &str) -> Result<()> {
        self.check_access(caller, document_id, Mode::WRITE).await?;
        self.store.delete_document(document_id).await?;
        self.grants.revoke_document(document_id);
        self.changes.send(ChangeEvent::Deleted {
            id: document_id.to_string(),
        });
        Ok(())
    }

    /// Copy a document. Copy always yields a distinct identity or fails;
    /// the caller's grant on the source is additionally issued for the new
    /// id, source grants stay valid.
    pub async fn copy_document(
        &self,
        caller: &str,
        source_id: &str,
        target_parent_id: &str,
    ) -> Result<String> {
        self.check_access(caller, source_id, Mode::READ).await?;
        self.check_access(caller, target_parent_id, Mode::WRITE)
            .await?;
        let new_id = self.store.copy_document(source_id, target_parent_id).await?;
        self.require_new_id(&new_id, "copy_document")?;
        self.grants.transfer_on_copy(source_id, &new_id, caller);
        self.changes.send(ChangeEvent::Copied {
            source_id: source_id.to_string(),
            new_id: new_id.clone(),
        });
        Ok(new_id)
    }

    /// Move a document between parents, returning its current id. The store
    /// is the one to revoke source-side grants if the move made the old id
    /// permanently unreachable.
    pub async fn move_document(
        &self,
        caller: &str,
        source_id: &str,
        source_parent_id: &str,
        target_parent_id: &str,
    ) -> Result<String> {
        self.check_access(caller, source_id, Mode::WRITE).await?;
        self.check_access(caller, source_parent_id, Mode::READ)
            .await?;
        self.check_access(caller, target_parent_id, Mode::WRITE)
            .await?;
        let new_id = self
            .store
            .move_document(source_id, source_parent_id, target_parent_id)
            .await?;
        self.require_new_id(&new_id, "move_document")?;
        self.grants.transfer_on_move(source_id, &new_id, caller);
        self.changes.send(ChangeEvent::Moved {
            id: new_id.clone(),
            target_parent_id: target_parent_id.to_string(),
        });
        Ok(new_id)
    }

    /// Remove one parent edge of a document that may have several parents.
    /// Whether that was the last edge, and the revocation that follows, is
    /// the store's knowledge, not inferred here.
    pub async fn remove_document(&self, caller: &str, document_id: &str, parent_id: &str) -> Result<()> {
        self.check_access(caller, parent_id, Mode::READ).await?;
        self.check_access(caller, document_id, Mode::WRITE).await?;
        self.store.remove_document(document_id, parent_id).await?;
        self.changes.send(ChangeEvent::Removed {
            id: document_id.to_string(),
            parent_id: parent_id.to_string(),
        });
        Ok(())
    }

    pub async fn open(
        &self,
        caller: &str,
        document_id: &str,
        open_mode: OpenMode,
        cancel: &CancellationToken,
    ) -> Result<ByteStream> {
        let needed = if open_mode.requires_write() {
            Mode::WRITE
        } else {
            Mode::READ
        };
        self.check_access(caller, document_id, needed).await?;
        self.store.open_document(document_id, open_mode, cancel).await
    }

    pub async fn open_thumbnail(
        &self,
        caller: &str,
        document_id: &str,
        size_hint: SizeHint,
        cancel: &CancellationToken,
    ) -> Result<ByteStream> {
        self.check_access(caller, document_id, Mode::READ).await?;
        self.store
            .open_document_thumbnail(document_id, size_hint, cancel)
            .await
    }

    /// Open a document as a requested type, negotiating between the
    /// thumbnail path, the document's own stream, and the provider's
    /// converting open.
    pub async fn open_as(
        &self,
        caller: &str,
        document_id: &str,
        mime_filter: &str,
        size_hint: Option<SizeHint>,
        options: Option<&serde_json::Value>,
        cancel: &CancellationToken,
    ) -> Result<ByteStream> {
        self.check_access(caller, document_id, Mode::READ).await?;
        let doc = self.store.query_document(document_id).await?;
        match mime::resolve_open(&doc, mime_filter, size_hint)? {
            OpenStrategy::Thumbnail(hint) => {
                self.store
                    .open_document_thumbnail(document_id, hint, cancel)
                    .await
            }
            OpenStrategy::Direct => {
                self.store
                    .open_document(document_id, OpenMode::Read, cancel)
                    .await
            }
            OpenStrategy::Convert => {
                self.store
                    .open_typed_document(document_id, mime_filter, options, cancel)
                    .await
            }
        }
    }

    /// Concrete type of a document. A failing store query yields `None`
    /// here; this derived helper is the documented exception to the
    /// no-swallowing rule, mutating paths always propagate.
    pub async fn get_document_type(
        &self,
        caller: &str,
        document_id: &str,
    ) -> Result<Option<String>> {
        self.check_access(caller, document_id, Mode::READ).await?;
        match self.store.query_document(document_id).await {
            Ok(doc) => Ok(Some(doc.mime_type)),
            Err(_) => Ok(None),
        }
    }

    /// Stream types servable for the document under the given filter.
    pub async fn stream_types(
        &self,
        caller: &str,
        document_id: &str,
        mime_filter: &str,
    ) -> Result<Vec<String>> {
        self.check_access(caller, document_id, Mode::READ).await?;
        mime::validate_filter(mime_filter)?;
        self.store
            .document_stream_types(document_id, mime_filter)
            .await
    }

    fn require_new_id(&self, new_id: &str, primitive: &str) -> Result<()> {
        if new_id.is_empty() {
            Err(Error::Store(anyhow!(
                "provider returned an empty id from {primitive}"
            )))
        } else {
            Ok(())
        }
    }

    /// Permission check for a request that may have arrived through a
    /// tree-scoped URI. Membership of the claimed subtree is validated
    /// before any grant is consulted; an outsider is a security failure,
    /// not a permission miss.
    async fn check_scoped_access(
        &self,
        caller: &str,
        document_id: &str,
        mode: Mode,
        scope: Option<&str>,
    ) -> Result<()> {
        if let Some(anchor) = scope {
            tree::verify_tree_scope(self.store.as_ref(), anchor, document_id).await?;
            if self
                .grants
                .has_grant(caller, &TargetRef::Tree(anchor.to_string()), mode)
            {
                return Ok(());
            }
        }
        self.check_access(caller, document_id, mode).await
    }

    /// Whether `caller` may act on `document_id` with `mode`: directly
    /// through a single-document grant, or through any tree grant whose
    /// anchor admits the document via the store's descendant predicate.
    async fn check_access(&self, caller: &str, document_id: &str, mode: Mode) -> Result<()> {
        if self.grants.has_grant(
            caller,
            &TargetRef::Document(document_id.to_string()),
            mode,
        ) {
            return Ok(());
        }
        for (anchor, granted) in self.grants.tree_anchors(caller) {
            if !granted.contains(mode) {
                continue;
            }
            if anchor == document_id
                || self.store.is_child_document(&anchor, document_id).await?
            {
                return Ok(());
            }
        }
        warn!(caller, document_id, "permission denied");
        Err(Error::PermissionDenied(format!(
            "{caller} holds no grant covering {document_id}"
        )))
    }
}

fn to_rows(set: DocSet, projection: Option<&[&str]>) -> RowSet {
    RowSet {
        rows: set.docs.iter().map(|d| project(d, projection)).collect(),
        loading: set.loading,
    }
}

#[cfg(test)]
mod tests;
