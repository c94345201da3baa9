use serde::Serialize;
use tokio::sync::broadcast;

/// Change announcements for observers of a provider. Search result events
/// tell a subscribed caller that richer results for an earlier query have
/// arrived and the query is worth re-issuing; recents deliberately have no
/// event, a recents query is a static snapshot per call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum ChangeEvent {
    RootsChanged,
    Created { id: String, parent_id: String },
    Renamed { old_id: String, new_id: String },
    Deleted { id: String },
    Copied { source_id: String, new_id: String },
    Moved { id: String, target_parent_id: String },
    Removed { id: String, parent_id: String },
    SearchResults { root_id: String, query: String },
}

#[derive(Clone)]
pub struct ChangeBus {
    tx: broadcast::Sender<ChangeEvent>,
}

impl ChangeBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(100);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }

    pub fn send(&self, event: ChangeEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new()
    }
}
