// ABOUTME: Optimistic drag-reorder of a server-owned list
// ABOUTME: Predicts the move locally, submits it, then always re-renders canonical server state

use super::lock::{OperationGuard, OperationLock};
use crate::error::StreamError;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::SystemTime;
use uuid::Uuid;

/// One row of a server-owned list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistEntry {
    /// Stable item identifier
    pub id: String,
    /// Display title
    #[serde(default)]
    pub title: String,
}

impl PlaylistEntry {
    /// Create an entry
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
        }
    }
}

/// A move submitted to the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReorderIntent {
    /// List being reordered
    #[serde(skip)]
    pub list_id: String,
    /// Index of the moved item before the move
    pub from_index: usize,
    /// Index of the moved item after the move
    pub to_index: usize,
    /// When the gesture ended
    #[serde(skip)]
    pub submitted_at: SystemTime,
}

impl ReorderIntent {
    /// Create an intent stamped with the current time
    pub fn new(list_id: impl Into<String>, from_index: usize, to_index: usize) -> Self {
        Self {
            list_id: list_id.into(),
            from_index,
            to_index,
            submitted_at: SystemTime::now(),
        }
    }
}

/// Backend operations the reorder protocol depends on
#[async_trait]
pub trait ReorderBackend: Send + Sync {
    /// Ask the server to apply the move; an error means it was not applied
    async fn reorder(&self, intent: &ReorderIntent) -> Result<()>;

    /// Fetch the canonical order of a list
    async fn fetch_list(&self, list_id: &str) -> Result<Vec<PlaylistEntry>>;
}

/// Where the list is displayed
pub trait ListView: Send + Sync {
    /// Replace the displayed order of `list_id`
    fn render(&self, list_id: &str, items: &[PlaylistEntry]);
}

/// Vertical extent of a rendered row
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RowGeometry {
    /// Top edge
    pub top: f64,
    /// Row height
    pub height: f64,
}

impl RowGeometry {
    fn midpoint(&self) -> f64 {
        self.top + self.height / 2.0
    }
}

/// Compute `(from, to)` for dropping row `dragged` at `pointer_y`
///
/// The target index is the number of other rows whose midpoint lies above
/// the pointer. Returns `None` if `dragged` is not a row.
pub fn drop_indices(rows: &[RowGeometry], dragged: usize, pointer_y: f64) -> Option<(usize, usize)> {
    if dragged >= rows.len() {
        return None;
    }
    let to = rows
        .iter()
        .enumerate()
        .filter(|(i, row)| *i != dragged && row.midpoint() < pointer_y)
        .count();
    Some((dragged, to))
}

/// Move the element at `from` to `to`, shifting the elements in between by one
pub fn apply_move<T: Clone>(items: &[T], from: usize, to: usize) -> Option<Vec<T>> {
    if from >= items.len() || to >= items.len() {
        return None;
    }
    let mut moved = items.to_vec();
    let item = moved.remove(from);
    moved.insert(to, item);
    Some(moved)
}

/// Entry point for drag gestures over server-owned lists
pub struct ReorderSession {
    lock: Arc<OperationLock>,
    backend: Arc<dyn ReorderBackend>,
    view: Arc<dyn ListView>,
}

impl ReorderSession {
    /// Create a session sharing `lock` with the status poller
    pub fn new(lock: Arc<OperationLock>, backend: Arc<dyn ReorderBackend>, view: Arc<dyn ListView>) -> Self {
        Self {
            lock,
            backend,
            view,
        }
    }

    /// Start a gesture over `items`, the order currently on screen
    ///
    /// Polling stays paused until the returned gesture is committed,
    /// cancelled, or dropped.
    pub fn begin(&self, list_id: impl Into<String>, items: Vec<PlaylistEntry>) -> Gesture {
        let list_id = list_id.into();
        let tag = format!("reorder:{}:{}", list_id, Uuid::new_v4().simple());
        log::debug!("Gesture started on list {}", list_id);
        Gesture {
            guard: self.lock.guard(tag),
            list_id,
            items,
            backend: Arc::clone(&self.backend),
            view: Arc::clone(&self.view),
        }
    }
}

/// An in-progress drag gesture holding the operation lock
pub struct Gesture {
    guard: OperationGuard,
    list_id: String,
    items: Vec<PlaylistEntry>,
    backend: Arc<dyn ReorderBackend>,
    view: Arc<dyn ListView>,
}

impl Gesture {
    /// List this gesture operates on
    pub fn list_id(&self) -> &str {
        &self.list_id
    }

    /// Owner tag of the held lock entry
    pub fn tag(&self) -> &str {
        self.guard.tag()
    }

    /// Abandon the gesture without touching the list
    pub fn cancel(self) {
        log::debug!("Gesture on list {} cancelled", self.list_id);
    }

    /// Drop the dragged row: render the predicted order, submit it, then
    /// render whatever the server reports as canonical.
    ///
    /// Returns the canonical order on success and `ReorderRejected` if the
    /// server refused; in both cases the view already shows server state.
    pub async fn commit(self, from: usize, to: usize) -> std::result::Result<Vec<PlaylistEntry>, StreamError> {
        if from == to {
            return Ok(self.items);
        }
        let Some(predicted) = apply_move(&self.items, from, to) else {
            return Err(StreamError::ReorderRejected(format!(
                "move {} -> {} out of range for {} items",
                from,
                to,
                self.items.len()
            )));
        };
        self.view.render(&self.list_id, &predicted);

        let intent = ReorderIntent::new(self.list_id.clone(), from, to);
        let outcome = self.backend.reorder(&intent).await;
        if let Err(e) = &outcome {
            log::warn!("Reorder {} -> {} on list {} rejected: {}", from, to, self.list_id, e);
        }

        let canonical = match self.backend.fetch_list(&self.list_id).await {
            Ok(items) => items,
            Err(e) => {
                log::warn!("Re-fetch of list {} failed: {}", self.list_id, e);
                // Best known server state without a fresh read
                if outcome.is_ok() {
                    predicted
                } else {
                    self.items.clone()
                }
            }
        };
        self.view.render(&self.list_id, &canonical);

        match outcome {
            Ok(()) => Ok(canonical),
            Err(e) => Err(StreamError::ReorderRejected(e.to_string())),
        }
    }
}
