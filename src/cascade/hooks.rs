use super::coordinator::{CascadeCoordinator, CascadeOrigin};
use crate::core::{DeletionEvent, EntityId, LinkProjection, Result, StoreKind};
use crate::storage::{LinkFilter, LinkMatch};
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HookedDeleteOutcome {
    pub removed_primary: u64,
    pub removed_dependents: u64,
}

/// Application-side deletes that cascade in-process instead of waiting for
/// a watcher or the next sweep.
///
/// The primary record goes first; if the cascade then fails, the watcher or
/// the sweeper finishes the job.
pub struct HookedDeletes {
    coordinator: Arc<CascadeCoordinator>,
}

impl HookedDeletes {
    pub fn new(coordinator: Arc<CascadeCoordinator>) -> Self {
        Self { coordinator }
    }

    pub async fn delete_account(&self, id: &EntityId) -> Result<HookedDeleteOutcome> {
        let Some(account) = self.lookup(StoreKind::Accounts, id).await? else {
            return Ok(HookedDeleteOutcome::default());
        };

        let removed_primary = self.remove(StoreKind::Accounts, id).await?;
        if account.role != Some(self.coordinator.linked_role()) {
            return Ok(HookedDeleteOutcome {
                removed_primary,
                removed_dependents: 0,
            });
        }

        let event = DeletionEvent::from_projection(StoreKind::Accounts, &account);
        let cascade = self.coordinator.cascade(&event, CascadeOrigin::Hook).await?;
        Ok(HookedDeleteOutcome {
            removed_primary,
            removed_dependents: cascade.removed,
        })
    }

    pub async fn delete_profile(&self, id: &EntityId) -> Result<HookedDeleteOutcome> {
        let Some(profile) = self.lookup(StoreKind::Profiles, id).await? else {
            return Ok(HookedDeleteOutcome::default());
        };

        let removed_primary = self.remove(StoreKind::Profiles, id).await?;
        let event = DeletionEvent::from_projection(StoreKind::Profiles, &profile);
        let cascade = self.coordinator.cascade(&event, CascadeOrigin::Hook).await?;
        Ok(HookedDeleteOutcome {
            removed_primary,
            removed_dependents: cascade.removed,
        })
    }

    async fn lookup(&self, kind: StoreKind, id: &EntityId) -> Result<Option<LinkProjection>> {
        let filter = LinkFilter::none().matching(LinkMatch::Id(id.clone()));
        let found = self.coordinator.store(kind).find_many(&filter).await?;
        Ok(found.into_iter().next())
    }

    async fn remove(&self, kind: StoreKind, id: &EntityId) -> Result<u64> {
        let ids = BTreeSet::from([id.clone()]);
        self.coordinator.purge(kind, &ids, CascadeOrigin::Hook).await
    }
}
