//! Offline/online reconciliation between the local and remote tiers.

mod reconciler;

pub use reconciler::{resolve_conflict, sync_key, Side, SyncReconciler, SyncState};
