//! Permission grant registry.
//!
//! Grants are shared mutable state across concurrent requests from many
//! callers; every operation here takes one global lock so grant-then-revoke
//! sequences are observed as atomic steps. A reader must never see a window
//! where neither the old nor the new id of a renamed document is granted.

use std::collections::HashMap;
use std::ops::BitOr;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Access mode flags of a grant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Mode {
    pub read: bool,
    pub write: bool,
    pub persistable: bool,
}

impl Mode {
    pub const READ: Mode = Mode {
        read: true,
        write: false,
        persistable: false,
    };
    pub const WRITE: Mode = Mode {
        read: false,
        write: true,
        persistable: false,
    };
    pub const READ_WRITE: Mode = Mode {
        read: true,
        write: true,
        persistable: false,
    };
    pub const PERSISTABLE: Mode = Mode {
        read: false,
        write: false,
        persistable: true,
    };

    /// Whether this mode covers every flag of `other`.
    pub fn contains(self, other: Mode) -> bool {
        (self.read || !other.read)
            && (self.write || !other.write)
            && (self.persistable || !other.persistable)
    }

    pub fn is_empty(self) -> bool {
        !self.read && !self.write && !self.persistable
    }
}

impl BitOr for Mode {
    type Output = Mode;

    fn bitor(self, rhs: Mode) -> Mode {
        Mode {
            read: self.read || rhs.read,
            write: self.write || rhs.write,
            persistable: self.persistable || rhs.persistable,
        }
    }
}

/// What a grant names: a single document, or an anchor together with all of
/// its descendants.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetRef {
    Document(String),
    Tree(String),
}

impl TargetRef {
    pub fn id(&self) -> &str {
        match self {
            TargetRef::Document(id) | TargetRef::Tree(id) => id,
        }
    }
}

type GrantTable = HashMap<String, HashMap<TargetRef, Mode>>;

/// Registry of active (caller, target, mode) grants.
#[derive(Default)]
pub struct GrantManager {
    table: Mutex<GrantTable>,
}

impl GrantManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent: granting the same or a narrower mode again is a no-op,
    /// granting a wider mode upgrades the existing grant.
    pub fn grant(&self, caller: &str, target: TargetRef, mode: Mode) {
        let mut table = self.table.lock();
        Self::grant_locked(&mut table, caller, target, mode);
    }

    pub fn has_grant(&self, caller: &str, target: &TargetRef, mode: Mode) -> bool {
        self.mode_for(caller, target)
            .is_some_and(|granted| granted.contains(mode))
    }

    pub fn mode_for(&self, caller: &str, target: &TargetRef) -> Option<Mode> {
        self.table.lock().get(caller)?.get(target).copied()
    }

    /// Tree anchors granted to `caller`, with their modes.
    pub fn tree_anchors(&self, caller: &str) -> Vec<(String, Mode)> {
        let table = self.table.lock();
        let Some(grants) = table.get(caller) else {
            return Vec::new();
        };
        grants
            .iter()
            .filter_map(|(target, mode)| match target {
                TargetRef::Tree(anchor) => Some((anchor.clone(), *mode)),
                TargetRef::Document(_) => None,
            })
            .collect()
    }

    /// Revoke every grant referencing `document_id`, in both its plain and
    /// tree-anchored forms, for every caller. The two forms name the same
    /// underlying identity and are always revoked together.
    pub fn revoke_document(&self, document_id: &str) {
        let mut table = self.table.lock();
        Self::revoke_locked(&mut table, document_id);
        debug!(document_id, "grants revoked");
    }

    /// Revoke a single caller's grant on one target.
    pub fn revoke(&self, caller: &str, target: &TargetRef) {
        let mut table = self.table.lock();
        if let Some(grants) = table.get_mut(caller) {
            grants.remove(target);
            if grants.is_empty() {
                table.remove(caller);
            }
        }
    }

    /// Move `caller`'s grants from a renamed document to its new id: the
    /// single-document grant is reissued for `new_id` with the prior mode,
    /// a tree grant anchored at the renamed document is re-anchored, and
    /// only then is every remaining grant on `old_id` revoked. One critical
    /// section, grant before revoke.
    pub fn transfer_on_rename(&self, old_id: &str, new_id: &str, caller: &str) {
        let mut table = self.table.lock();
        let doc_mode = table
            .get(caller)
            .and_then(|g| g.get(&TargetRef::Document(old_id.to_string())))
            .copied();
        let tree_mode = table
            .get(caller)
            .and_then(|g| g.get(&TargetRef::Tree(old_id.to_string())))
            .copied();
        if let Some(mode) = doc_mode {
            Self::grant_locked(&mut table, caller, TargetRef::Document(new_id.to_string()), mode);
        }
        if let Some(mode) = tree_mode {
            Self::grant_locked(&mut table, caller, TargetRef::Tree(new_id.to_string()), mode);
        }
        Self::revoke_locked(&mut table, old_id);
        debug!(old_id, new_id, caller, "grants transferred on rename");
    }

    /// Additive transfer for a copied document: the caller's grant on the
    /// source is reissued for the new id, source grants stay valid.
    pub fn transfer_on_copy(&self, source_id: &str, new_id: &str, caller: &str) {
        self.transfer_additive(source_id, new_id, caller);
    }

    /// Same upgrade rule as copy. No revocation happens here: the old id may
    /// stay valid when the document has other parents, and making it
    /// unreachable is for the backing store to report via
    /// [`revoke_document`](Self::revoke_document).
    pub fn transfer_on_move(&self, source_id: &str, new_id: &str, caller: &str) {
        self.transfer_additive(source_id, new_id, caller);
    }

    fn transfer_additive(&self, source_id: &str, new_id: &str, caller: &str) {
        if source_id == new_id {
            return;
        }
        let mut table = self.table.lock();
        let mode = table
            .get(caller)
            .and_then(|g| g.get(&TargetRef::Document(source_id.to_string())))
            .copied();
        if let Some(mode) = mode {
            Self::grant_locked(&mut table, caller, TargetRef::Document(new_id.to_string()), mode);
            debug!(source_id, new_id, caller, "grant carried to new id");
        }
    }

    fn grant_locked(table: &mut GrantTable, caller: &str, target: TargetRef, mode: Mode) {
        if mode.is_empty() {
            return;
        }
        let entry = table
            .entry(caller.to_string())
            .or_default()
            .entry(target)
            .or_default();
        *entry = *entry | mode;
    }

    fn revoke_locked(table: &mut GrantTable, document_id: &str) {
        table.retain(|_, grants| {
            grants.retain(|target, _| target.id() != document_id);
            !grants.is_empty()
        });
    }
}
