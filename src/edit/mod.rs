// ABOUTME: Edit coordination module
// ABOUTME: Operation lock, lock-aware status poller, and optimistic list reorder

mod lock;
mod poller;
mod reorder;

pub use lock::{OperationGuard, OperationLock};
pub use poller::{PlaybackStatus, StatusPoller, StatusSource};
pub use reorder::{
    apply_move, drop_indices, Gesture, ListView, PlaylistEntry, ReorderBackend, ReorderIntent,
    ReorderSession, RowGeometry,
};
