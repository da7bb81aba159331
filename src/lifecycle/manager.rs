use crate::cascade::{CascadeCoordinator, HookedDeletes};
use crate::config::ReconcilerConfig;
use crate::core::{LinkError, Result, StoreKind};
use crate::storage::EntityStore;
use crate::sweep::{ReconciliationSweeper, SweepOutcome, SweepWorker, spawn_sweep_worker};
use crate::watch::{DeleteWatcher, WatcherState, spawn_delete_watcher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Point-in-time view of every component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineHealth {
    pub accounts_watcher: WatcherState,
    pub profiles_watcher: WatcherState,
    pub sweeper_running: bool,
    pub sweep_in_flight: bool,
}

impl EngineHealth {
    /// True when at least one deletion direction is covered by the sweeper only.
    pub fn is_degraded(&self) -> bool {
        self.accounts_watcher != WatcherState::Running
            || self.profiles_watcher != WatcherState::Running
    }
}

type DegradedFlags = Arc<[AtomicBool; 2]>;

fn slot_index(kind: StoreKind) -> usize {
    match kind {
        StoreKind::Accounts => 0,
        StoreKind::Profiles => 1,
    }
}

/// Logs degraded operation for `kind` the first time it is seen.
fn report_degraded(flags: &[AtomicBool; 2], kind: StoreKind) {
    if !flags[slot_index(kind)].swap(true, Ordering::AcqRel) {
        warn!(store = %kind, "delete feed lost; degraded to sweep-only coverage");
    }
}

/// Follows one watcher's state until it stops or its feed drops.
async fn observe_watcher(
    kind: StoreKind,
    mut state: watch::Receiver<WatcherState>,
    flags: DegradedFlags,
) {
    loop {
        let current = state.borrow_and_update().clone();
        match current {
            WatcherState::FeedDropped => {
                report_degraded(&flags, kind);
                return;
            }
            WatcherState::Stopped => return,
            WatcherState::Running | WatcherState::Disabled(_) => {}
        }
        if state.changed().await.is_err() {
            // Sender gone; the last value is final.
            if *state.borrow() == WatcherState::FeedDropped {
                report_degraded(&flags, kind);
            }
            return;
        }
    }
}

/// One watcher slot: either a live handle or the reason there is none.
enum WatcherSlot {
    Idle,
    Disabled(String),
    Active(DeleteWatcher),
}

impl WatcherSlot {
    fn state(&self) -> WatcherState {
        match self {
            WatcherSlot::Idle => WatcherState::Stopped,
            WatcherSlot::Disabled(reason) => WatcherState::Disabled(reason.clone()),
            WatcherSlot::Active(watcher) => watcher.state(),
        }
    }
}

/// Owns the watchers and the sweeper and starts/stops them as a unit.
///
/// Build one per process with the two store handles, call [`start`](Self::start)
/// once the stores are connected and [`stop`](Self::stop) on shutdown.
pub struct LifecycleManager {
    config: ReconcilerConfig,
    coordinator: Arc<CascadeCoordinator>,
    sweeper: Arc<ReconciliationSweeper>,
    accounts_watcher: WatcherSlot,
    profiles_watcher: WatcherSlot,
    sweep_worker: Option<SweepWorker>,
    degraded_reported: DegradedFlags,
    observers: Vec<JoinHandle<()>>,
}

impl LifecycleManager {
    pub fn new(
        accounts: Arc<dyn EntityStore>,
        profiles: Arc<dyn EntityStore>,
        config: ReconcilerConfig,
    ) -> Result<Self> {
        config.validate()?;
        if accounts.kind() != StoreKind::Accounts || profiles.kind() != StoreKind::Profiles {
            return Err(LinkError::InvalidConfig(format!(
                "expected (accounts, profiles) stores, got ({}, {})",
                accounts.kind(),
                profiles.kind()
            )));
        }

        let coordinator = Arc::new(CascadeCoordinator::new(
            accounts,
            profiles,
            config.linked_role,
        ));
        let sweeper = Arc::new(ReconciliationSweeper::new(
            coordinator.clone(),
            config.verbose,
        ));

        Ok(Self {
            config,
            coordinator,
            sweeper,
            accounts_watcher: WatcherSlot::Idle,
            profiles_watcher: WatcherSlot::Idle,
            sweep_worker: None,
            degraded_reported: Arc::new([AtomicBool::new(false), AtomicBool::new(false)]),
            observers: Vec::new(),
        })
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    pub fn coordinator(&self) -> Arc<CascadeCoordinator> {
        self.coordinator.clone()
    }

    /// Application-side deletes sharing this engine's coordinator.
    pub fn hooked_deletes(&self) -> HookedDeletes {
        HookedDeletes::new(self.coordinator.clone())
    }

    pub fn is_started(&self) -> bool {
        self.sweep_worker.is_some()
    }

    /// Starts both watchers independently and the sweeper unconditionally.
    /// Never fails: a watcher that cannot start leaves its direction to the
    /// sweeper, which is logged once.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use linkkeeper::{FeedCapabilities, InMemoryEntityStore, LifecycleManager, ReconcilerConfig};
    /// use std::sync::Arc;
    ///
    /// # tokio_test::block_on(async {
    /// let accounts = Arc::new(InMemoryEntityStore::accounts(FeedCapabilities::full()));
    /// let profiles = Arc::new(InMemoryEntityStore::profiles(FeedCapabilities::full()));
    /// let mut engine = LifecycleManager::new(accounts, profiles, ReconcilerConfig::default()).unwrap();
    /// engine.start().await;
    /// engine.stop().await;
    /// # });
    /// ```
    pub async fn start(&mut self) {
        if self.is_started() {
            warn!("consistency engine already started");
            return;
        }
        for flag in self.degraded_reported.iter() {
            flag.store(false, Ordering::Release);
        }

        match self.check_connectivity().await {
            Ok(()) => {
                self.accounts_watcher = self.start_watcher(StoreKind::Accounts).await;
                self.profiles_watcher = self.start_watcher(StoreKind::Profiles).await;
            }
            Err(err) => {
                warn!(error = %err, "stores not connected; watchers not started, relying on sweeps");
                let reason = format!("store not connected: {}", err);
                self.accounts_watcher = WatcherSlot::Disabled(reason.clone());
                self.profiles_watcher = WatcherSlot::Disabled(reason);
            }
        }

        for slot in [&self.accounts_watcher, &self.profiles_watcher] {
            if let WatcherSlot::Active(watcher) = slot {
                self.observers.push(tokio::spawn(observe_watcher(
                    watcher.kind(),
                    watcher.state_changes(),
                    self.degraded_reported.clone(),
                )));
            }
        }

        self.sweep_worker = Some(spawn_sweep_worker(
            self.sweeper.clone(),
            self.config.interval(),
            self.config.sweep_on_start,
        ));

        info!(
            accounts_watcher = ?self.accounts_watcher.state(),
            profiles_watcher = ?self.profiles_watcher.state(),
            "consistency engine started"
        );
    }

    async fn check_connectivity(&self) -> Result<()> {
        self.coordinator.store(StoreKind::Accounts).ping().await?;
        self.coordinator.store(StoreKind::Profiles).ping().await
    }

    async fn start_watcher(&self, kind: StoreKind) -> WatcherSlot {
        match spawn_delete_watcher(kind, self.coordinator.clone(), self.config.verbose).await {
            Ok(watcher) => WatcherSlot::Active(watcher),
            Err(err) => {
                warn!(store = %kind, error = %err, "delete watcher not started; sweep-only coverage for this direction");
                WatcherSlot::Disabled(err.to_string())
            }
        }
    }

    /// Stops every component that is running. Safe to call repeatedly and
    /// before [`start`](Self::start).
    pub async fn stop(&mut self) {
        self.sweeper.cancel();

        let watchers = [
            std::mem::replace(&mut self.accounts_watcher, WatcherSlot::Idle),
            std::mem::replace(&mut self.profiles_watcher, WatcherSlot::Idle),
        ];
        for slot in watchers {
            if let WatcherSlot::Active(watcher) = slot {
                let kind = watcher.kind();
                if let Err(err) = watcher.stop().await {
                    warn!(store = %kind, error = %err, "delete watcher did not stop cleanly");
                }
            }
        }

        for observer in self.observers.drain(..) {
            observer.abort();
        }

        if let Some(worker) = self.sweep_worker.take() {
            if let Err(err) = worker.stop().await {
                warn!(error = %err, "sweep worker did not stop cleanly");
            }
            info!("consistency engine stopped");
        }
    }

    /// Runs one sweep now, subject to the same single-flight rule as the timer.
    pub async fn sweep_now(&self) -> Result<SweepOutcome> {
        self.sweeper.run_once().await
    }

    /// Whether degraded operation has been reported for `kind` since the
    /// last [`start`](Self::start).
    pub fn degraded_reported(&self, kind: StoreKind) -> bool {
        self.degraded_reported[slot_index(kind)].load(Ordering::Acquire)
    }

    /// Current component states. The observer tasks normally report a
    /// dropped feed first; this catches one they have not got to yet.
    pub fn health(&self) -> EngineHealth {
        let health = EngineHealth {
            accounts_watcher: self.accounts_watcher.state(),
            profiles_watcher: self.profiles_watcher.state(),
            sweeper_running: self
                .sweep_worker
                .as_ref()
                .is_some_and(SweepWorker::is_running),
            sweep_in_flight: self.sweeper.is_in_flight(),
        };

        for (kind, state) in [
            (StoreKind::Accounts, &health.accounts_watcher),
            (StoreKind::Profiles, &health.profiles_watcher),
        ] {
            if *state == WatcherState::FeedDropped {
                report_degraded(&self.degraded_reported, kind);
            }
        }

        health
    }
}

impl Drop for LifecycleManager {
    fn drop(&mut self) {
        for observer in self.observers.drain(..) {
            observer.abort();
        }
    }
}
