use super::*;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::TimeZone;
use chrono::Utc;

use crate::model::{columns, DocumentInfo, RootInfo, MIME_TYPE_DIR};
use crate::store::memory::MemoryStore;

const ALICE: &str = "alice";
const BOB: &str = "bob";

fn doc_ref(id: &str) -> TargetRef {
    TargetRef::Document(id.to_string())
}

fn tree_ref(id: &str) -> TargetRef {
    TargetRef::Tree(id.to_string())
}

/// Hub over a memory store sharing the hub's grant table and change bus,
/// with one root whose directory id is returned.
fn fixture() -> (DocumentHub, Arc<MemoryStore>, String) {
    let grants = Arc::new(GrantManager::new());
    let changes = ChangeBus::new();
    let store = Arc::new(
        MemoryStore::new()
            .with_grants(grants.clone())
            .with_changes(changes.clone()),
    );
    let root_doc = store.add_root("home", "Home");
    let hub = DocumentHub::with_parts(store.clone(), grants, changes, HubConfig::new("files"));
    (hub, store, root_doc)
}

fn grant_subtree(hub: &DocumentHub, caller: &str, anchor: &str) {
    hub.grants()
        .grant(caller, tree_ref(anchor), Mode::READ_WRITE);
}

fn row_ids(rows: &RowSet) -> Vec<String> {
    rows.rows
        .iter()
        .map(|r| r[columns::DOCUMENT_ID].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn rename_transfers_grant_before_revoking() {
    let (hub, _store, root_doc) = fixture();
    grant_subtree(&hub, ALICE, &root_doc);
    let old_id = hub
        .create_document(ALICE, &root_doc, "text/plain", "a.txt")
        .await
        .unwrap();
    hub.grants().grant(ALICE, doc_ref(&old_id), Mode::READ);

    let new_id = hub.rename_document(ALICE, &old_id, "b.txt").await.unwrap();
    assert_ne!(new_id, old_id);

    assert!(hub.grants().has_grant(ALICE, &doc_ref(&new_id), Mode::READ));
    assert_eq!(hub.grants().mode_for(ALICE, &doc_ref(&old_id)), None);
    assert_eq!(hub.grants().mode_for(ALICE, &tree_ref(&old_id)), None);
}

#[tokio::test]
async fn rename_to_same_name_changes_no_grants() {
    let (hub, _store, root_doc) = fixture();
    grant_subtree(&hub, ALICE, &root_doc);
    let id = hub
        .create_document(ALICE, &root_doc, "text/plain", "a.txt")
        .await
        .unwrap();
    hub.grants().grant(ALICE, doc_ref(&id), Mode::READ);

    let same = hub.rename_document(ALICE, &id, "a.txt").await.unwrap();
    assert_eq!(same, id);
    assert!(hub.grants().has_grant(ALICE, &doc_ref(&id), Mode::READ));
}

#[tokio::test]
async fn delete_revokes_every_grant_on_the_id() {
    let (hub, _store, root_doc) = fixture();
    grant_subtree(&hub, ALICE, &root_doc);
    let id = hub
        .create_document(ALICE, &root_doc, "text/plain", "a.txt")
        .await
        .unwrap();
    hub.grants().grant(ALICE, doc_ref(&id), Mode::READ);
    hub.grants().grant(ALICE, tree_ref(&id), Mode::READ);
    hub.grants().grant(BOB, doc_ref(&id), Mode::READ_WRITE);

    hub.delete_document(ALICE, &id).await.unwrap();

    assert_eq!(hub.grants().mode_for(ALICE, &doc_ref(&id)), None);
    assert_eq!(hub.grants().mode_for(ALICE, &tree_ref(&id)), None);
    assert_eq!(hub.grants().mode_for(BOB, &doc_ref(&id)), None);
}

#[tokio::test]
async fn copy_keeps_source_grants_and_adds_new() {
    let (hub, _store, root_doc) = fixture();
    grant_subtree(&hub, ALICE, &root_doc);
    let src = hub
        .create_document(ALICE, &root_doc, "text/plain", "a.txt")
        .await
        .unwrap();
    let dest = hub
        .create_document(ALICE, &root_doc, MIME_TYPE_DIR, "dest")
        .await
        .unwrap();
    hub.grants().grant(ALICE, doc_ref(&src), Mode::READ);

    let copy = hub.copy_document(ALICE, &src, &dest).await.unwrap();
    assert_ne!(copy, src);
    assert!(hub.grants().has_grant(ALICE, &doc_ref(&src), Mode::READ));
    assert!(hub.grants().has_grant(ALICE, &doc_ref(&copy), Mode::READ));
}

#[tokio::test]
async fn mutations_require_the_right_grants() {
    let (hub, _store, root_doc) = fixture();
    // no grant at all
    assert!(matches!(
        hub.create_document(BOB, &root_doc, "text/plain", "a.txt")
            .await,
        Err(Error::PermissionDenied(_))
    ));

    grant_subtree(&hub, ALICE, &root_doc);
    let id = hub
        .create_document(ALICE, &root_doc, "text/plain", "a.txt")
        .await
        .unwrap();

    // read-only caller cannot delete
    hub.grants().grant(BOB, doc_ref(&id), Mode::READ);
    assert!(matches!(
        hub.delete_document(BOB, &id).await,
        Err(Error::PermissionDenied(_))
    ));
    // but can read
    assert!(hub.document(BOB, &id, None, None).await.is_ok());
}

#[tokio::test]
async fn tree_scope_is_validated_before_grants() {
    let (hub, _store, root_doc) = fixture();
    grant_subtree(&hub, ALICE, &root_doc);
    let inside = hub
        .create_document(ALICE, &root_doc, MIME_TYPE_DIR, "inside")
        .await
        .unwrap();
    let file = hub
        .create_document(ALICE, &inside, "text/plain", "a.txt")
        .await
        .unwrap();
    let outside = hub
        .create_document(ALICE, &root_doc, MIME_TYPE_DIR, "outside")
        .await
        .unwrap();
    let stranger = hub
        .create_document(ALICE, &outside, "text/plain", "s.txt")
        .await
        .unwrap();

    // a tree grant on `inside` admits its own subtree only
    hub.grants().grant(BOB, tree_ref(&inside), Mode::READ);
    assert!(hub
        .document(BOB, &file, Some(inside.as_str()), None)
        .await
        .is_ok());
    assert!(hub
        .document(BOB, &inside, Some(inside.as_str()), None)
        .await
        .is_ok());
    assert!(matches!(
        hub.document(BOB, &stranger, Some(inside.as_str()), None).await,
        Err(Error::NotDescendant { .. })
    ));
}

#[tokio::test]
async fn dispatch_checks_authority_and_projects() {
    let (hub, _store, root_doc) = fixture();
    grant_subtree(&hub, ALICE, &root_doc);
    let id = hub
        .create_document(ALICE, &root_doc, "text/plain", "a.txt")
        .await
        .unwrap();

    let uri = format!("dochub://files/document/{id}");
    let rows = hub
        .dispatch(ALICE, &uri, Some(&[columns::DOCUMENT_ID]))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows.rows[0].len(), 1);
    assert_eq!(
        rows.rows[0][columns::DOCUMENT_ID].as_str(),
        Some(id.as_str())
    );

    let foreign = format!("dochub://elsewhere/document/{id}");
    assert!(matches!(
        hub.dispatch(ALICE, &foreign, None).await,
        Err(Error::AuthorityMismatch { .. })
    ));
    assert!(matches!(
        hub.dispatch(ALICE, "dochub://files/nonsense/path", None).await,
        Err(Error::UnsupportedPath(_))
    ));
}

#[tokio::test]
async fn search_excludes_directories() {
    let (hub, _store, root_doc) = fixture();
    grant_subtree(&hub, ALICE, &root_doc);
    hub.grants().grant(ALICE, doc_ref("home"), Mode::READ);
    hub.create_document(ALICE, &root_doc, MIME_TYPE_DIR, "reports")
        .await
        .unwrap();
    let file = hub
        .create_document(ALICE, &root_doc, "text/plain", "report.txt")
        .await
        .unwrap();

    let rows = hub.search(ALICE, "home", "report", None).await.unwrap();
    assert_eq!(row_ids(&rows), vec![file]);
}

#[tokio::test]
async fn change_events_follow_mutations() {
    let (hub, _store, root_doc) = fixture();
    grant_subtree(&hub, ALICE, &root_doc);
    let mut rx = hub.changes().subscribe();

    let id = hub
        .create_document(ALICE, &root_doc, "text/plain", "a.txt")
        .await
        .unwrap();
    assert_eq!(
        rx.recv().await.unwrap(),
        ChangeEvent::Created {
            id: id.clone(),
            parent_id: root_doc.clone()
        }
    );

    hub.delete_document(ALICE, &id).await.unwrap();
    assert_eq!(rx.recv().await.unwrap(), ChangeEvent::Deleted { id });

    // a provider with deferred search results announces them on the same
    // bus, and a subscribed caller re-issues the query
    hub.changes().send(ChangeEvent::SearchResults {
        root_id: "home".to_string(),
        query: "report".to_string(),
    });
    assert!(matches!(
        rx.recv().await.unwrap(),
        ChangeEvent::SearchResults { .. }
    ));
}

#[tokio::test]
async fn open_as_negotiates_direct_convert_and_thumbnail() {
    let (hub, store, root_doc) = fixture();
    grant_subtree(&hub, ALICE, &root_doc);
    let cancel = CancellationToken::new();

    let picture = hub
        .create_document(ALICE, &root_doc, "image/png", "pic.png")
        .await
        .unwrap();
    store
        .write_content(&picture, Bytes::from_static(b"png-bytes"))
        .unwrap();

    // concrete match serves the stream directly
    let direct = hub
        .open_as(ALICE, &picture, "image/*", None, None, &cancel)
        .await
        .unwrap();
    assert_eq!(&direct.data[..], b"png-bytes");

    // a size hint wins over the filter
    let hint = SizeHint {
        width: 64,
        height: 64,
    };
    assert!(hub
        .open_as(ALICE, &picture, "image/*", Some(hint), None, &cancel)
        .await
        .is_ok());

    // virtual documents convert even on an exact type match
    let sheet = hub
        .create_document(ALICE, &root_doc, "application/vnd.sheet", "sheet")
        .await
        .unwrap();
    store.mark_virtual(&sheet).unwrap();
    store
        .add_stream(&sheet, "application/pdf", Bytes::from_static(b"%PDF"))
        .unwrap();
    let converted = hub
        .open_as(ALICE, &sheet, "application/*", None, None, &cancel)
        .await
        .unwrap();
    assert_eq!(converted.mime_type, "application/pdf");

    assert!(matches!(
        hub.open_as(ALICE, &picture, "bad*filter", None, None, &cancel)
            .await,
        Err(Error::InvalidMimeFilter(_))
    ));
}

#[tokio::test]
async fn document_type_is_a_derived_helper() {
    let (hub, _store, root_doc) = fixture();
    grant_subtree(&hub, ALICE, &root_doc);
    let id = hub
        .create_document(ALICE, &root_doc, "text/plain", "a.txt")
        .await
        .unwrap();
    assert_eq!(
        hub.get_document_type(ALICE, &id).await.unwrap(),
        Some("text/plain".to_string())
    );

    // a vanished document is absent, not an error
    hub.grants().grant(ALICE, doc_ref("ghost"), Mode::READ);
    assert_eq!(hub.get_document_type(ALICE, "ghost").await.unwrap(), None);
}

/// Backing store standing in for a provider that would hand back an empty
/// id from copy or move.
struct EmptyIdStore;

#[async_trait]
impl DocumentStore for EmptyIdStore {
    async fn query_roots(&self) -> crate::error::Result<Vec<RootInfo>> {
        Ok(Vec::new())
    }

    async fn query_document(&self, document_id: &str) -> crate::error::Result<DocumentInfo> {
        Err(Error::NotFound(document_id.to_string()))
    }

    async fn query_child_documents(
        &self,
        _parent_id: &str,
        _sort: SortOrder,
    ) -> crate::error::Result<DocSet> {
        Ok(DocSet::default())
    }

    async fn query_recent_documents(&self, _root_id: &str) -> crate::error::Result<DocSet> {
        Ok(DocSet::default())
    }

    async fn query_search_documents(
        &self,
        _root_id: &str,
        _query: &str,
    ) -> crate::error::Result<DocSet> {
        Ok(DocSet::default())
    }

    async fn copy_document(
        &self,
        _source_id: &str,
        _target_parent_id: &str,
    ) -> crate::error::Result<String> {
        Ok(String::new())
    }

    async fn move_document(
        &self,
        _source_id: &str,
        _source_parent_id: &str,
        _target_parent_id: &str,
    ) -> crate::error::Result<String> {
        Ok(String::new())
    }
}

#[tokio::test]
async fn empty_ids_from_copy_and_move_are_rejected() {
    let hub = DocumentHub::new(Arc::new(EmptyIdStore), HubConfig::new("files"));
    hub.grants().grant(ALICE, doc_ref("src"), Mode::READ_WRITE);
    hub.grants().grant(ALICE, doc_ref("p1"), Mode::READ_WRITE);
    hub.grants().grant(ALICE, doc_ref("p2"), Mode::READ_WRITE);

    assert!(matches!(
        hub.copy_document(ALICE, "src", "p1").await,
        Err(Error::Store(_))
    ));
    assert!(matches!(
        hub.move_document(ALICE, "src", "p1", "p2").await,
        Err(Error::Store(_))
    ));

    // primitives this store leaves unimplemented surface as NotSupported
    assert!(matches!(
        hub.rename_document(ALICE, "src", "renamed").await,
        Err(Error::NotSupported("rename_document"))
    ));
}

/// Backing store returning an oversized, shuffled, still-loading recents
/// answer.
struct RecentStore {
    docs: Vec<DocumentInfo>,
}

impl RecentStore {
    fn new() -> Self {
        let base = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let mut docs = Vec::new();
        for i in 0..70u32 {
            let mut doc = DocumentInfo::new(format!("d{i:02}"), format!("f{i:02}"), "text/plain");
            // pairs share a timestamp so the id tie-break is exercised
            doc.last_modified = base + chrono::Duration::seconds((i / 2) as i64);
            docs.push(doc);
        }
        // deliberately out of order
        docs.reverse();
        docs.swap(3, 40);
        Self { docs }
    }
}

#[async_trait]
impl DocumentStore for RecentStore {
    async fn query_roots(&self) -> crate::error::Result<Vec<RootInfo>> {
        Ok(vec![RootInfo::new("r", "rdoc", "R")])
    }

    async fn query_document(&self, document_id: &str) -> crate::error::Result<DocumentInfo> {
        Err(Error::NotFound(document_id.to_string()))
    }

    async fn query_child_documents(
        &self,
        _parent_id: &str,
        _sort: SortOrder,
    ) -> crate::error::Result<DocSet> {
        Ok(DocSet::default())
    }

    async fn query_recent_documents(&self, _root_id: &str) -> crate::error::Result<DocSet> {
        Ok(DocSet {
            docs: self.docs.clone(),
            loading: true,
        })
    }

    async fn query_search_documents(
        &self,
        _root_id: &str,
        _query: &str,
    ) -> crate::error::Result<DocSet> {
        Ok(DocSet::default())
    }
}

#[tokio::test]
async fn recents_are_capped_sorted_and_tie_broken() {
    let store = RecentStore::new();
    let by_id: std::collections::HashMap<String, chrono::DateTime<Utc>> = store
        .docs
        .iter()
        .map(|d| (d.document_id.clone(), d.last_modified))
        .collect();
    let hub = DocumentHub::new(Arc::new(store), HubConfig::new("files"));
    hub.grants().grant(ALICE, doc_ref("r"), Mode::READ);

    let rows = hub.recent(ALICE, "r", None).await.unwrap();
    assert_eq!(rows.len(), RECENT_LIMIT);
    assert!(rows.loading, "loading flag must pass through");

    let ids = row_ids(&rows);
    for pair in ids.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        let (ta, tb) = (by_id[a], by_id[b]);
        assert!(
            ta > tb || (ta == tb && a < b),
            "out of order: {a} ({ta}) before {b} ({tb})"
        );
    }
    // the oldest six fell off: d00..d05 hold the three lowest timestamps
    for dropped in ["d00", "d01", "d02", "d03", "d04", "d05"] {
        assert!(!ids.contains(&dropped.to_string()));
    }
}
