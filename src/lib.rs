// ============================================================================
// linkkeeper
// ============================================================================
//
// Keeps an Account store and a Profile store referentially consistent without
// cross-store transactions. Deletes reach the other store either through a
// change-feed watcher (fast path) or through the periodic reconciliation
// sweep (slow path); both go through the same cascade coordinator.
//
// ============================================================================

/// Logs at `info` when `$verbose` is set, at `debug` otherwise.
#[doc(hidden)]
#[macro_export]
macro_rules! progress {
    ($verbose:expr, $($arg:tt)+) => {
        if $verbose {
            ::tracing::info!($($arg)+)
        } else {
            ::tracing::debug!($($arg)+)
        }
    };
}

pub mod cascade;
pub mod config;
pub mod core;
pub mod lifecycle;
pub mod storage;
pub mod sweep;
pub mod watch;

pub use cascade::{CascadeCoordinator, CascadeOrigin, CascadeOutcome, HookedDeleteOutcome, HookedDeletes};
pub use config::ReconcilerConfig;
pub use core::{
    Account, DeleteNotification, DeletionEvent, EntityId, LinkError, LinkProjection, Profile,
    Result, Role, StoreKind, normalize_email,
};
pub use lifecycle::{EngineHealth, LifecycleManager};
pub use storage::{
    DeleteFeed, DeleteFilter, EntityStore, FeedCapabilities, InMemoryEntityStore, LinkFilter,
    LinkMatch, StoredEntity, SubscribeOptions,
};
pub use sweep::{OrphanPlan, ReconciliationSweeper, SweepOutcome, SweepReport, plan_orphans};
pub use watch::{DeleteWatcher, WatcherState};
