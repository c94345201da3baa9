//! In-memory reference backing store.
//!
//! Documents live in a map keyed by id, with explicit parent and child edge
//! lists so a document may appear under several directories. Rename
//! reassigns the document id, the way path-derived providers do; move keeps
//! it. The store optionally holds a grant-manager handle so it can meet the
//! provider-side revocation obligations (cascading deletes, last-edge
//! removal), and a change bus to announce root-list changes.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::grants::GrantManager;
use crate::mime::mime_type_matches;
use crate::model::{
    DocSet, DocumentFlags, DocumentInfo, RootFlags, RootInfo, SortOrder, MIME_TYPE_DIR,
};
use crate::notify::{ChangeBus, ChangeEvent};
use crate::store::{ByteStream, DocumentStore, OpenMode, SizeHint};

struct Node {
    info: DocumentInfo,
    parents: Vec<String>,
    children: Vec<String>,
    content: Bytes,
    /// Alternate typed streams, in registration order.
    streams: Vec<(String, Bytes)>,
}

#[derive(Default)]
struct State {
    roots: Vec<RootInfo>,
    docs: HashMap<String, Node>,
}

pub struct MemoryStore {
    state: RwLock<State>,
    grants: Option<Arc<GrantManager>>,
    changes: Option<ChangeBus>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            grants: None,
            changes: None,
        }
    }

    /// Attach the grant registry this store revokes through when a delete
    /// cascades or a last parent edge disappears.
    pub fn with_grants(mut self, grants: Arc<GrantManager>) -> Self {
        self.grants = Some(grants);
        self
    }

    /// Attach the bus on which root-list changes are announced.
    pub fn with_changes(mut self, changes: ChangeBus) -> Self {
        self.changes = Some(changes);
        self
    }

    /// Create a new root with its top-level directory and return the
    /// directory's document id.
    pub fn add_root(&self, root_id: &str, title: &str) -> String {
        let doc_id = mint_id();
        let mut info = DocumentInfo::new(doc_id.clone(), title, MIME_TYPE_DIR);
        info.flags = dir_flags();
        let mut root = RootInfo::new(root_id, doc_id.clone(), title);
        root.flags = RootFlags {
            supports_recents: true,
            supports_search: true,
            supports_create: true,
            supports_is_child: true,
            local_only: true,
            ..RootFlags::default()
        };
        {
            let mut state = self.state.write();
            state.roots.push(root);
            state.docs.insert(
                doc_id.clone(),
                Node {
                    info,
                    parents: Vec::new(),
                    children: Vec::new(),
                    content: Bytes::new(),
                    streams: Vec::new(),
                },
            );
        }
        if let Some(changes) = &self.changes {
            changes.send(ChangeEvent::RootsChanged);
        }
        doc_id
    }

    pub fn write_content(&self, document_id: &str, data: Bytes) -> Result<()> {
        let mut state = self.state.write();
        let node = node_mut(&mut state, document_id)?;
        node.info.size = Some(data.len() as u64);
        node.info.last_modified = Utc::now();
        node.content = data;
        Ok(())
    }

    /// Mark a document virtual: its declared type becomes advisory and it is
    /// only openable through a type-converting open.
    pub fn mark_virtual(&self, document_id: &str) -> Result<()> {
        let mut state = self.state.write();
        node_mut(&mut state, document_id)?.info.flags.virtual_document = true;
        Ok(())
    }

    /// Register an alternate stream served for matching type filters.
    pub fn add_stream(&self, document_id: &str, mime_type: &str, data: Bytes) -> Result<()> {
        let mut state = self.state.write();
        node_mut(&mut state, document_id)?
            .streams
            .push((mime_type.to_string(), data));
        Ok(())
    }

    pub fn set_last_modified(&self, document_id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.write();
        node_mut(&mut state, document_id)?.info.last_modified = at;
        Ok(())
    }

    pub fn contains(&self, document_id: &str) -> bool {
        self.state.read().docs.contains_key(document_id)
    }

    fn root_doc_id(&self, root_id: &str) -> Result<String> {
        let state = self.state.read();
        state
            .roots
            .iter()
            .find(|r| r.root_id == root_id)
            .map(|r| r.document_id.clone())
            .ok_or_else(|| Error::NotFound(root_id.to_string()))
    }

    /// All documents below (and excluding) the given directory, following
    /// edges breadth-first; shared nodes are visited once.
    fn collect_subtree(&self, top: &str) -> Vec<DocumentInfo> {
        let state = self.state.read();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([top.to_string()]);
        let mut out = Vec::new();
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Some(node) = state.docs.get(&id) {
                if id != top {
                    out.push(node.info.clone());
                }
                queue.extend(node.children.iter().cloned());
            }
        }
        out
    }

    /// Delete a subtree rooted at `id`. A shared child keeps living through
    /// its other parents; everything whose last edge went away is removed.
    /// Returns the ids actually deleted.
    fn delete_cascade(state: &mut State, id: &str) -> Vec<String> {
        let mut removed = Vec::new();
        let mut queue = VecDeque::from([id.to_string()]);
        while let Some(current) = queue.pop_front() {
            let Some(node) = state.docs.remove(&current) else {
                continue;
            };
            for parent in &node.parents {
                if let Some(parent_node) = state.docs.get_mut(parent) {
                    parent_node.children.retain(|c| c != &current);
                }
            }
            for child in &node.children {
                if let Some(child_node) = state.docs.get_mut(child) {
                    child_node.parents.retain(|p| p != &current);
                    if child_node.parents.is_empty() {
                        queue.push_back(child.clone());
                    }
                }
            }
            removed.push(current);
        }
        removed
    }

    fn after_removal(&self, removed: &[String]) {
        if removed.is_empty() {
            return;
        }
        let roots_changed = {
            let mut state = self.state.write();
            let before = state.roots.len();
            state
                .roots
                .retain(|r| !removed.contains(&r.document_id));
            state.roots.len() != before
        };
        if let Some(grants) = &self.grants {
            for id in removed {
                grants.revoke_document(id);
            }
        }
        if roots_changed {
            if let Some(changes) = &self.changes {
                changes.send(ChangeEvent::RootsChanged);
            }
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn mint_id() -> String {
    Uuid::new_v4().to_string()
}

fn dir_flags() -> DocumentFlags {
    DocumentFlags {
        dir_supports_create: true,
        supports_delete: true,
        supports_rename: true,
        supports_move: true,
        supports_remove: true,
        ..DocumentFlags::default()
    }
}

fn file_flags(mime_type: &str) -> DocumentFlags {
    DocumentFlags {
        supports_write: true,
        supports_delete: true,
        supports_rename: true,
        supports_move: true,
        supports_copy: true,
        supports_remove: true,
        supports_thumbnail: mime_type.starts_with("image/"),
        ..DocumentFlags::default()
    }
}

fn node<'a>(state: &'a State, id: &str) -> Result<&'a Node> {
    state
        .docs
        .get(id)
        .ok_or_else(|| Error::NotFound(id.to_string()))
}

fn node_mut<'a>(state: &'a mut State, id: &str) -> Result<&'a mut Node> {
    state
        .docs
        .get_mut(id)
        .ok_or_else(|| Error::NotFound(id.to_string()))
}

fn require_directory(node: &Node) -> Result<()> {
    if node.info.is_directory() {
        Ok(())
    } else {
        Err(Error::Store(anyhow!(
            "{} is not a directory",
            node.info.document_id
        )))
    }
}

/// Pick a display name not already used among the siblings, appending a
/// counter before the extension when needed.
fn unique_name(state: &State, parent: &Node, desired: &str) -> String {
    let taken: HashSet<&str> = parent
        .children
        .iter()
        .filter_map(|c| state.docs.get(c))
        .map(|n| n.info.display_name.as_str())
        .collect();
    if !taken.contains(desired) {
        return desired.to_string();
    }
    let (stem, ext) = match desired.rfind('.') {
        Some(dot) if dot > 0 => desired.split_at(dot),
        _ => (desired, ""),
    };
    let mut n = 1;
    loop {
        let candidate = format!("{stem} ({n}){ext}");
        if !taken.contains(candidate.as_str()) {
            return candidate;
        }
        n += 1;
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(Error::Cancelled)
    } else {
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn query_roots(&self) -> Result<Vec<RootInfo>> {
        Ok(self.state.read().roots.clone())
    }

    async fn query_document(&self, document_id: &str) -> Result<DocumentInfo> {
        let state = self.state.read();
        Ok(node(&state, document_id)?.info.clone())
    }

    async fn query_child_documents(&self, parent_id: &str, sort: SortOrder) -> Result<DocSet> {
        let state = self.state.read();
        let parent = node(&state, parent_id)?;
        require_directory(parent)?;
        let mut docs: Vec<DocumentInfo> = parent
            .children
            .iter()
            .filter_map(|c| state.docs.get(c))
            .map(|n| n.info.clone())
            .collect();
        match sort {
            SortOrder::DisplayName => docs.sort_by(|a, b| a.display_name.cmp(&b.display_name)),
            SortOrder::LastModified => docs.sort_by(|a, b| b.last_modified.cmp(&a.last_modified)),
            SortOrder::Size => docs.sort_by(|a, b| b.size.cmp(&a.size)),
        }
        Ok(DocSet::from_docs(docs))
    }

    async fn query_recent_documents(&self, root_id: &str) -> Result<DocSet> {
        let top = self.root_doc_id(root_id)?;
        let docs = self
            .collect_subtree(&top)
            .into_iter()
            .filter(|d| !d.is_directory())
            .collect();
        // ordering and the result cap are the facade's contract
        Ok(DocSet::from_docs(docs))
    }

    async fn query_search_documents(&self, root_id: &str, query: &str) -> Result<DocSet> {
        let top = self.root_doc_id(root_id)?;
        let needle = query.to_lowercase();
        let mut scored: Vec<(usize, DocumentInfo)> = self
            .collect_subtree(&top)
            .into_iter()
            .filter_map(|d| {
                d.display_name
                    .to_lowercase()
                    .find(&needle)
                    .map(|pos| (pos, d))
            })
            .collect();
        scored.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.display_name.cmp(&b.1.display_name)));
        Ok(DocSet::from_docs(
            scored.into_iter().map(|(_, d)| d).collect(),
        ))
    }

    async fn is_child_document(&self, parent_id: &str, child_id: &str) -> Result<bool> {
        let state = self.state.read();
        let Some(start) = state.docs.get(child_id) else {
            return Ok(false);
        };
        // internal multi-hop walk up the parent edges
        let mut seen = HashSet::new();
        let mut queue: VecDeque<String> = start.parents.iter().cloned().collect();
        while let Some(current) = queue.pop_front() {
            if current == parent_id {
                return Ok(true);
            }
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(n) = state.docs.get(&current) {
                queue.extend(n.parents.iter().cloned());
            }
        }
        Ok(false)
    }

    async fn create_document(
        &self,
        parent_id: &str,
        mime_type: &str,
        display_name: &str,
    ) -> Result<String> {
        let mut state = self.state.write();
        let parent = node(&state, parent_id)?;
        require_directory(parent)?;
        let name = unique_name(&state, parent, display_name);
        let id = mint_id();
        let mut info = DocumentInfo::new(id.clone(), name, mime_type);
        info.flags = if mime_type == MIME_TYPE_DIR {
            dir_flags()
        } else {
            file_flags(mime_type)
        };
        info.size = Some(0);
        state.docs.insert(
            id.clone(),
            Node {
                info,
                parents: vec![parent_id.to_string()],
                children: Vec::new(),
                content: Bytes::new(),
                streams: Vec::new(),
            },
        );
        node_mut(&mut state, parent_id)?.children.push(id.clone());
        debug!(parent = parent_id, id = %id, "document created");
        Ok(id)
    }

    async fn rename_document(
        &self,
        document_id: &str,
        display_name: &str,
    ) -> Result<Option<String>> {
        let mut state = self.state.write();
        if node(&state, document_id)?.info.display_name == display_name {
            return Ok(None);
        }
        // identity is reassigned: re-key the node and every edge naming it
        let new_id = mint_id();
        let mut moved = state
            .docs
            .remove(document_id)
            .ok_or_else(|| Error::NotFound(document_id.to_string()))?;
        moved.info.document_id = new_id.clone();
        moved.info.display_name = display_name.to_string();
        moved.info.last_modified = Utc::now();
        for parent in &moved.parents {
            if let Some(parent_node) = state.docs.get_mut(parent) {
                for child in parent_node.children.iter_mut() {
                    if *child == document_id {
                        *child = new_id.clone();
                    }
                }
            }
        }
        for child in &moved.children {
            if let Some(child_node) = state.docs.get_mut(child) {
                for parent in child_node.parents.iter_mut() {
                    if *parent == document_id {
                        *parent = new_id.clone();
                    }
                }
            }
        }
        for root in state.roots.iter_mut() {
            if root.document_id == document_id {
                root.document_id = new_id.clone();
            }
        }
        state.docs.insert(new_id.clone(), moved);
        debug!(old = document_id, new = %new_id, "document renamed");
        Ok(Some(new_id))
    }

    async fn delete_document(&self, document_id: &str) -> Result<()> {
        let removed = {
            let mut state = self.state.write();
            node(&state, document_id)?;
            Self::delete_cascade(&mut state, document_id)
        };
        self.after_removal(&removed);
        Ok(())
    }

    async fn copy_document(&self, source_id: &str, target_parent_id: &str) -> Result<String> {
        let mut state = self.state.write();
        node(&state, source_id)?;
        let target = node(&state, target_parent_id)?;
        require_directory(target)?;

        // snapshot the source subtree before inserting anything, so copying
        // a directory into its own subtree terminates
        let mut plan: Vec<(String, String)> = Vec::new(); // (source id, dest parent)
        let mut queue = VecDeque::from([(source_id.to_string(), target_parent_id.to_string())]);
        let mut new_ids: HashMap<String, String> = HashMap::new();
        while let Some((src, dest_parent)) = queue.pop_front() {
            if new_ids.contains_key(&src) {
                continue; // shared node: one copy under its first parent
            }
            new_ids.insert(src.clone(), mint_id());
            for child in &node(&state, &src)?.children {
                queue.push_back((child.clone(), src.clone()));
            }
            plan.push((src, dest_parent));
        }

        for (src, dest_parent) in &plan {
            let (mut info, content, streams, is_top) = {
                let src_node = node(&state, src)?;
                (
                    src_node.info.clone(),
                    src_node.content.clone(),
                    src_node.streams.clone(),
                    src == source_id,
                )
            };
            let new_id = new_ids[src].clone();
            let dest_parent_id = if is_top {
                dest_parent.clone()
            } else {
                new_ids[dest_parent].clone()
            };
            if is_top {
                let dest_node = node(&state, &dest_parent_id)?;
                info.display_name = unique_name(&state, dest_node, &info.display_name);
            }
            info.document_id = new_id.clone();
            info.last_modified = Utc::now();
            state.docs.insert(
                new_id.clone(),
                Node {
                    info,
                    parents: vec![dest_parent_id.clone()],
                    children: Vec::new(),
                    content,
                    streams,
                },
            );
            node_mut(&mut state, &dest_parent_id)?.children.push(new_id);
        }
        let new_top = new_ids[source_id].clone();
        debug!(source = source_id, new = %new_top, "document copied");
        Ok(new_top)
    }

    async fn move_document(
        &self,
        source_id: &str,
        source_parent_id: &str,
        target_parent_id: &str,
    ) -> Result<String> {
        {
            let state = self.state.read();
            let source = node(&state, source_id)?;
            if !source.parents.iter().any(|p| p == source_parent_id) {
                return Err(Error::Store(anyhow!(
                    "{source_id} is not a child of {source_parent_id}"
                )));
            }
            require_directory(node(&state, target_parent_id)?)?;
        }
        if source_id == target_parent_id
            || self.is_child_document(source_id, target_parent_id).await?
        {
            return Err(Error::Store(anyhow!(
                "cannot move a document into its own descendant"
            )));
        }
        {
            let mut state = self.state.write();
            if let Some(old_parent) = state.docs.get_mut(source_parent_id) {
                old_parent.children.retain(|c| c != source_id);
            }
            let source = node_mut(&mut state, source_id)?;
            source.parents.retain(|p| p != source_parent_id);
            source.parents.push(target_parent_id.to_string());
            source.info.last_modified = Utc::now();
            node_mut(&mut state, target_parent_id)?
                .children
                .push(source_id.to_string());
        }
        debug!(
            source = source_id,
            target = target_parent_id,
            "document moved"
        );
        // identity is stable across moves in this store
        Ok(source_id.to_string())
    }

    async fn remove_document(&self, document_id: &str, parent_id: &str) -> Result<()> {
        let removed = {
            let mut state = self.state.write();
            let doc = node(&state, document_id)?;
            if !doc.parents.iter().any(|p| p == parent_id) {
                return Err(Error::Store(anyhow!(
                    "{document_id} is not a child of {parent_id}"
                )));
            }
            if let Some(parent) = state.docs.get_mut(parent_id) {
                parent.children.retain(|c| c != document_id);
            }
            let doc = node_mut(&mut state, document_id)?;
            doc.parents.retain(|p| p != parent_id);
            if doc.parents.is_empty() {
                // last edge gone: the document is effectively deleted, and
                // revoking its grants is this store's obligation
                Self::delete_cascade(&mut state, document_id)
            } else {
                Vec::new()
            }
        };
        self.after_removal(&removed);
        Ok(())
    }

    async fn open_document(
        &self,
        document_id: &str,
        mode: OpenMode,
        cancel: &CancellationToken,
    ) -> Result<ByteStream> {
        check_cancelled(cancel)?;
        let state = self.state.read();
        let doc = node(&state, document_id)?;
        if doc.info.flags.virtual_document {
            return Err(Error::Store(anyhow!(
                "{document_id} is virtual and has no intrinsic byte stream"
            )));
        }
        if mode.requires_write() && !doc.info.flags.supports_write {
            return Err(Error::Store(anyhow!("{document_id} is not writable")));
        }
        Ok(ByteStream {
            mime_type: doc.info.mime_type.clone(),
            data: doc.content.clone(),
        })
    }

    async fn open_document_thumbnail(
        &self,
        document_id: &str,
        _size_hint: SizeHint,
        cancel: &CancellationToken,
    ) -> Result<ByteStream> {
        check_cancelled(cancel)?;
        let state = self.state.read();
        let doc = node(&state, document_id)?;
        if !doc.info.flags.supports_thumbnail {
            return Err(Error::NotSupported("open_document_thumbnail"));
        }
        Ok(ByteStream {
            mime_type: doc.info.mime_type.clone(),
            data: doc.content.clone(),
        })
    }

    async fn open_typed_document(
        &self,
        document_id: &str,
        mime_filter: &str,
        _options: Option<&serde_json::Value>,
        cancel: &CancellationToken,
    ) -> Result<ByteStream> {
        check_cancelled(cancel)?;
        let state = self.state.read();
        let doc = node(&state, document_id)?;
        if !doc.info.flags.virtual_document && mime_type_matches(mime_filter, &doc.info.mime_type)
        {
            return Ok(ByteStream {
                mime_type: doc.info.mime_type.clone(),
                data: doc.content.clone(),
            });
        }
        for (mime_type, data) in &doc.streams {
            if mime_type_matches(mime_filter, mime_type) {
                return Ok(ByteStream {
                    mime_type: mime_type.clone(),
                    data: data.clone(),
                });
            }
        }
        Err(Error::Store(anyhow!(
            "{document_id} has no stream satisfying {mime_filter}"
        )))
    }

    async fn document_stream_types(
        &self,
        document_id: &str,
        mime_filter: &str,
    ) -> Result<Vec<String>> {
        let state = self.state.read();
        let Some(doc) = state.docs.get(document_id) else {
            return Ok(Vec::new());
        };
        let mut types = Vec::new();
        if !doc.info.flags.virtual_document && mime_type_matches(mime_filter, &doc.info.mime_type)
        {
            types.push(doc.info.mime_type.clone());
        }
        for (mime_type, _) in &doc.streams {
            if mime_type_matches(mime_filter, mime_type) {
                types.push(mime_type.clone());
            }
        }
        Ok(types)
    }
}
