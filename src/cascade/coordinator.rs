use crate::core::{DeletionEvent, EntityId, Result, Role, StoreKind};
use crate::storage::{EntityStore, LinkFilter, LinkMatch};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Who asked for a delete; only used to label log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeOrigin {
    Watcher,
    Sweep,
    Hook,
}

impl CascadeOrigin {
    fn as_str(self) -> &'static str {
        match self {
            CascadeOrigin::Watcher => "watcher",
            CascadeOrigin::Sweep => "sweep",
            CascadeOrigin::Hook => "hook",
        }
    }
}

/// Result of cascading one deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CascadeOutcome {
    pub target: StoreKind,
    pub matched: usize,
    pub removed: u64,
}

impl CascadeOutcome {
    fn nothing(target: StoreKind) -> Self {
        Self {
            target,
            matched: 0,
            removed: 0,
        }
    }
}

/// The single place bulk-delete decisions are made.
///
/// Holds no state of its own; the same event applied twice finds nothing the
/// second time and reports zero removals.
pub struct CascadeCoordinator {
    accounts: Arc<dyn EntityStore>,
    profiles: Arc<dyn EntityStore>,
    linked_role: Role,
}

impl CascadeCoordinator {
    pub fn new(
        accounts: Arc<dyn EntityStore>,
        profiles: Arc<dyn EntityStore>,
        linked_role: Role,
    ) -> Self {
        Self {
            accounts,
            profiles,
            linked_role,
        }
    }

    pub fn linked_role(&self) -> Role {
        self.linked_role
    }

    pub fn store(&self, kind: StoreKind) -> &Arc<dyn EntityStore> {
        match kind {
            StoreKind::Accounts => &self.accounts,
            StoreKind::Profiles => &self.profiles,
        }
    }

    /// Maps a deletion to the counterpart query on the other store, or
    /// `None` when the event carries nothing to match on.
    pub fn counterpart_filter(&self, event: &DeletionEvent) -> Option<(StoreKind, LinkFilter)> {
        match event.store {
            StoreKind::Accounts => {
                let mut filter = LinkFilter::none().matching(LinkMatch::LinkedId(event.id.clone()));
                if let Some(email) = &event.email {
                    filter = filter.matching(LinkMatch::email(email));
                }
                Some((StoreKind::Profiles, filter))
            }
            StoreKind::Profiles => {
                let mut filter = LinkFilter::none().with_role(self.linked_role);
                if let Some(account_id) = &event.linked_id {
                    filter = filter.matching(LinkMatch::Id(account_id.clone()));
                }
                if let Some(email) = &event.email {
                    filter = filter.matching(LinkMatch::email(email));
                }
                (!filter.is_unsatisfiable()).then_some((StoreKind::Accounts, filter))
            }
        }
    }

    /// Removes whatever on the other store still links to the deleted record.
    pub async fn cascade(
        &self,
        event: &DeletionEvent,
        origin: CascadeOrigin,
    ) -> Result<CascadeOutcome> {
        let Some((target, filter)) = self.counterpart_filter(event) else {
            debug!(
                store = %event.store,
                id = %event.id,
                origin = origin.as_str(),
                "deletion carries no linkage; nothing to cascade"
            );
            return Ok(CascadeOutcome::nothing(event.store.other()));
        };

        let store = self.store(target);
        let matched = store.find_many(&filter).await.inspect_err(|err| {
            warn!(
                store = %target,
                trigger = %event.id,
                origin = origin.as_str(),
                error = %err,
                "cascade lookup failed"
            );
        })?;

        let ids: BTreeSet<EntityId> = matched.into_iter().map(|p| p.id).collect();
        let removed = self.purge(target, &ids, origin).await?;

        if removed > 0 {
            info!(
                trigger_store = %event.store,
                trigger = %event.id,
                store = %target,
                removed,
                origin = origin.as_str(),
                "removed linked record(s)"
            );
        } else {
            debug!(
                trigger_store = %event.store,
                trigger = %event.id,
                origin = origin.as_str(),
                "cascade matched nothing"
            );
        }

        Ok(CascadeOutcome {
            target,
            matched: ids.len(),
            removed,
        })
    }

    /// Bulk delete by id set. Empty sets skip the store round trip.
    pub async fn purge(
        &self,
        kind: StoreKind,
        ids: &BTreeSet<EntityId>,
        origin: CascadeOrigin,
    ) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.store(kind).delete_many(ids).await.inspect_err(|err| {
            warn!(
                store = %kind,
                count = ids.len(),
                origin = origin.as_str(),
                error = %err,
                "bulk delete failed; the next sweep will retry"
            );
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Account, LinkError, Profile};
    use crate::storage::{FeedCapabilities, InMemoryEntityStore};

    struct Fixture {
        accounts: Arc<InMemoryEntityStore>,
        profiles: Arc<InMemoryEntityStore>,
        coordinator: CascadeCoordinator,
    }

    fn fixture() -> Fixture {
        let accounts = Arc::new(InMemoryEntityStore::accounts(FeedCapabilities::full()));
        let profiles = Arc::new(InMemoryEntityStore::profiles(FeedCapabilities::full()));
        let coordinator = CascadeCoordinator::new(accounts.clone(), profiles.clone(), Role::Student);
        Fixture {
            accounts,
            profiles,
            coordinator,
        }
    }

    #[test]
    fn test_profile_event_without_linkage_has_no_filter() {
        let f = fixture();
        let event = DeletionEvent::profile(EntityId::from("p1"), None, None);
        assert!(f.coordinator.counterpart_filter(&event).is_none());
    }

    #[test]
    fn test_profile_event_targets_linked_role_accounts() {
        let f = fixture();
        let event = DeletionEvent::profile(
            EntityId::from("p1"),
            Some(EntityId::from("a1")),
            Some("X@y.com"),
        );
        let (target, filter) = f.coordinator.counterpart_filter(&event).unwrap();
        assert_eq!(target, StoreKind::Accounts);
        assert_eq!(filter.role(), Some(Role::Student));
        assert_eq!(
            filter.terms().unwrap(),
            &[
                LinkMatch::Id(EntityId::from("a1")),
                LinkMatch::Email("x@y.com".to_string())
            ]
        );
    }

    #[test]
    fn test_account_event_targets_profiles_by_fk() {
        let f = fixture();
        let event = DeletionEvent::account(EntityId::from("a1"), None);
        let (target, filter) = f.coordinator.counterpart_filter(&event).unwrap();
        assert_eq!(target, StoreKind::Profiles);
        assert_eq!(filter.terms().unwrap(), &[LinkMatch::LinkedId(EntityId::from("a1"))]);
    }

    #[tokio::test]
    async fn test_cascade_twice_removes_then_reports_zero() {
        let f = fixture();
        let account = Account::new("x@y.com", Role::Student);
        let profile = Profile::new("x@y.com").linked_to(&account.id);
        f.profiles.insert_profile(profile.clone()).await.unwrap();

        let event = DeletionEvent::account(account.id.clone(), None);
        let first = f.coordinator.cascade(&event, CascadeOrigin::Watcher).await.unwrap();
        let second = f.coordinator.cascade(&event, CascadeOrigin::Sweep).await.unwrap();

        assert_eq!(first.removed, 1);
        assert_eq!(second.removed, 0);
        assert!(!f.profiles.contains(&profile.id).await);
    }

    #[tokio::test]
    async fn test_cascade_by_email_spares_other_roles() {
        let f = fixture();
        let admin = Account::new("shared@y.com", Role::Admin);
        f.accounts.insert_account(admin.clone()).await.unwrap();

        let event = DeletionEvent::profile(EntityId::from("gone"), None, Some("shared@y.com"));
        let outcome = f.coordinator.cascade(&event, CascadeOrigin::Watcher).await.unwrap();

        assert_eq!(outcome.removed, 0);
        assert!(f.accounts.contains(&admin.id).await);
    }

    #[tokio::test]
    async fn test_unreachable_store_is_retryable() {
        let f = fixture();
        f.profiles.set_online(false);

        let event = DeletionEvent::account(EntityId::from("a1"), None);
        let err = f.coordinator.cascade(&event, CascadeOrigin::Watcher).await.unwrap_err();
        assert!(matches!(err, LinkError::StoreUnavailable(StoreKind::Profiles, _)));
        assert!(err.is_retryable());
    }
}
