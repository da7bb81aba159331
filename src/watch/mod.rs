pub mod worker;

pub use worker::{DeleteWatcher, WatcherState, spawn_delete_watcher, subscription_for};
