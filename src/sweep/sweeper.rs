use super::plan::plan_orphans;
use crate::cascade::{CascadeCoordinator, CascadeOrigin};
use crate::core::{Result, StoreKind};
use crate::storage::LinkFilter;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, error, info};

/// Counts from one completed reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub accounts_scanned: usize,
    pub profiles_scanned: usize,
    pub removed_accounts: u64,
    pub removed_profiles: u64,
}

impl SweepReport {
    pub fn removed(&self) -> u64 {
        self.removed_accounts + self.removed_profiles
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepOutcome {
    Completed(SweepReport),
    /// Another run was still in flight.
    Skipped,
    /// The engine was stopping before any delete was issued.
    Cancelled,
}

/// Clears the single-flight flag however the run ends.
struct FlightGuard<'a>(&'a AtomicBool);

impl<'a> FlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard(flag))
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Full-scan orphan reconciliation across both stores.
///
/// Every run starts from scratch: read both projections, plan, then one
/// batched delete per store through the coordinator. Nothing carries over
/// between runs except the in-flight flag.
///
/// Each [`cancel`](Self::cancel) starts a new generation. A run only deletes
/// if no cancel happened since it started, even if the sweeper was resumed
/// in between.
pub struct ReconciliationSweeper {
    coordinator: Arc<CascadeCoordinator>,
    in_flight: AtomicBool,
    cancelled: AtomicBool,
    generation: AtomicU64,
    verbose: bool,
}

impl ReconciliationSweeper {
    pub fn new(coordinator: Arc<CascadeCoordinator>, verbose: bool) -> Self {
        Self {
            coordinator,
            in_flight: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            verbose,
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Runs that have not issued their deletes yet will stop short.
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.cancelled.store(false, Ordering::Release);
    }

    fn is_cancelled(&self, started_in: u64) -> bool {
        self.cancelled.load(Ordering::Acquire)
            || self.generation.load(Ordering::Acquire) != started_in
    }

    /// One full pass. A failed read ends the run before any delete. The two
    /// purges are separate store calls and not atomic: if the profile purge
    /// fails, the account purge has already happened and the error is
    /// returned anyway.
    pub async fn run_once(&self) -> Result<SweepOutcome> {
        let Some(_guard) = FlightGuard::acquire(&self.in_flight) else {
            return Ok(SweepOutcome::Skipped);
        };
        let generation = self.generation.load(Ordering::Acquire);
        if self.is_cancelled(generation) {
            return Ok(SweepOutcome::Cancelled);
        }

        let started_at = Utc::now();
        let accounts_filter = LinkFilter::all().with_role(self.coordinator.linked_role());
        let profiles_filter = LinkFilter::all();
        let (accounts, profiles) = tokio::try_join!(
            self.coordinator
                .store(StoreKind::Accounts)
                .find_many(&accounts_filter),
            self.coordinator
                .store(StoreKind::Profiles)
                .find_many(&profiles_filter),
        )?;

        let plan = plan_orphans(&accounts, &profiles);
        if self.is_cancelled(generation) {
            return Ok(SweepOutcome::Cancelled);
        }

        let removed_accounts = self
            .coordinator
            .purge(StoreKind::Accounts, &plan.accounts, CascadeOrigin::Sweep)
            .await?;
        let removed_profiles = self
            .coordinator
            .purge(StoreKind::Profiles, &plan.profiles, CascadeOrigin::Sweep)
            .await?;

        Ok(SweepOutcome::Completed(SweepReport {
            started_at,
            finished_at: Utc::now(),
            accounts_scanned: accounts.len(),
            profiles_scanned: profiles.len(),
            removed_accounts,
            removed_profiles,
        }))
    }

    /// [`run_once`](Self::run_once) for background use: every result is
    /// logged and nothing is returned.
    pub async fn run_logged(&self) {
        match self.run_once().await {
            Ok(SweepOutcome::Completed(report)) if report.removed() > 0 => {
                info!(
                    removed_accounts = report.removed_accounts,
                    removed_profiles = report.removed_profiles,
                    "sweep removed orphaned records"
                );
            }
            Ok(SweepOutcome::Completed(report)) => {
                crate::progress!(
                    self.verbose,
                    accounts_scanned = report.accounts_scanned,
                    profiles_scanned = report.profiles_scanned,
                    "sweep found no orphans"
                );
            }
            Ok(SweepOutcome::Skipped) => debug!("previous sweep still running; skipped"),
            Ok(SweepOutcome::Cancelled) => debug!("sweep cancelled before deleting"),
            Err(err) => {
                error!(error = %err, retryable = err.is_retryable(), "sweep run failed; next run starts over");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flight_guard_is_exclusive_and_released_on_drop() {
        let flag = AtomicBool::new(false);
        let guard = FlightGuard::acquire(&flag);
        assert!(guard.is_some());
        assert!(FlightGuard::acquire(&flag).is_none());

        drop(guard);
        assert!(!flag.load(Ordering::Acquire));
        assert!(FlightGuard::acquire(&flag).is_some());
    }
}
