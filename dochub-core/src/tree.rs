//! Tree membership validation for tree-scoped references.
//!
//! A tree grant over anchor A authorizes a document D iff D is A itself or
//! the provider's descendant predicate confirms D below A. The validator
//! makes exactly one predicate call; whether the provider answers it with a
//! shallow edge check or an internal multi-hop walk is the provider's
//! concern, and the predicate is never assumed to be a cheap O(1) check.

use crate::error::{Error, Result};
use crate::store::DocumentStore;

/// Pure form of the membership check. `child_test` is invoked at most once.
pub fn is_descendant(
    anchor_id: &str,
    candidate_id: &str,
    child_test: impl FnOnce(&str, &str) -> bool,
) -> bool {
    anchor_id == candidate_id || child_test(anchor_id, candidate_id)
}

/// Validate that `target` may be reached through a tree reference anchored
/// at `anchor`, asking the backing store's single-step predicate. Failure is
/// a security error, fatal to the request and never retried.
pub async fn verify_tree_scope(
    store: &dyn DocumentStore,
    anchor_id: &str,
    target_id: &str,
) -> Result<()> {
    if anchor_id == target_id || store.is_child_document(anchor_id, target_id).await? {
        Ok(())
    } else {
        Err(Error::NotDescendant {
            anchor: anchor_id.to_string(),
            child: target_id.to_string(),
        })
    }
}
