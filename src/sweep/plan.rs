use crate::core::{EntityId, LinkProjection, normalize_email};
use std::collections::{BTreeSet, HashSet};

/// Ids to remove from each store in one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrphanPlan {
    pub accounts: BTreeSet<EntityId>,
    pub profiles: BTreeSet<EntityId>,
}

impl OrphanPlan {
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty() && self.profiles.is_empty()
    }

    pub fn len(&self) -> usize {
        self.accounts.len() + self.profiles.len()
    }
}

fn email_set<'a>(records: impl Iterator<Item = &'a LinkProjection>) -> HashSet<String> {
    records
        .map(|record| normalize_email(&record.email))
        .filter(|email| !email.is_empty())
        .collect()
}

fn linked_by_email(record: &LinkProjection, emails: &HashSet<String>) -> bool {
    emails.contains(&normalize_email(&record.email))
}

/// Computes orphans from full projections of both stores.
///
/// `linked_accounts` must already be restricted to the linked role. A record
/// is an orphan only when it fails both the id check and the email check.
pub fn plan_orphans(linked_accounts: &[LinkProjection], profiles: &[LinkProjection]) -> OrphanPlan {
    let referenced_ids: HashSet<&EntityId> =
        profiles.iter().filter_map(|p| p.linked_id.as_ref()).collect();
    let referenced_emails = email_set(profiles.iter());

    let account_ids: HashSet<&EntityId> = linked_accounts.iter().map(|a| &a.id).collect();
    let account_emails = email_set(linked_accounts.iter());

    let unreferenced_by_id: BTreeSet<&EntityId> = linked_accounts
        .iter()
        .filter(|a| !referenced_ids.contains(&a.id))
        .map(|a| &a.id)
        .collect();
    let unreferenced_by_email: BTreeSet<&EntityId> = linked_accounts
        .iter()
        .filter(|a| !linked_by_email(a, &referenced_emails))
        .map(|a| &a.id)
        .collect();

    let dangling_by_id: BTreeSet<&EntityId> = profiles
        .iter()
        .filter(|p| p.linked_id.as_ref().is_none_or(|id| !account_ids.contains(id)))
        .map(|p| &p.id)
        .collect();
    let dangling_by_email: BTreeSet<&EntityId> = profiles
        .iter()
        .filter(|p| !linked_by_email(p, &account_emails))
        .map(|p| &p.id)
        .collect();

    OrphanPlan {
        accounts: unreferenced_by_id
            .intersection(&unreferenced_by_email)
            .map(|id| (*id).clone())
            .collect(),
        profiles: dangling_by_id
            .intersection(&dangling_by_email)
            .map(|id| (*id).clone())
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Account, Profile, Role};

    fn account(email: &str) -> Account {
        Account::new(email, Role::Student)
    }

    #[test]
    fn test_consistent_pair_is_not_orphaned() {
        let a = account("x@y.com");
        let p = Profile::new("x@y.com").linked_to(&a.id);

        let plan = plan_orphans(&[a.link_projection()], &[p.link_projection()]);
        assert!(plan.is_empty());
    }

    #[test]
    fn test_missing_profile_orphans_account() {
        let a = account("x@y.com");
        let plan = plan_orphans(&[a.link_projection()], &[]);
        assert_eq!(plan.accounts, BTreeSet::from([a.id.clone()]));
        assert!(plan.profiles.is_empty());
    }

    #[test]
    fn test_missing_account_orphans_profile() {
        let gone = account("x@y.com");
        let p = Profile::new("x@y.com").linked_to(&gone.id);
        let plan = plan_orphans(&[], &[p.link_projection()]);
        assert_eq!(plan.profiles, BTreeSet::from([p.id.clone()]));
    }

    #[test]
    fn test_email_alone_keeps_pair_linked() {
        // Stale foreign key, but the emails still agree.
        let a = account("X@Y.com");
        let stale = account("old@y.com");
        let p = Profile::new("x@y.com").linked_to(&stale.id);

        let plan = plan_orphans(&[a.link_projection()], &[p.link_projection()]);
        assert!(plan.is_empty());
    }

    #[test]
    fn test_fk_alone_keeps_pair_linked() {
        let a = account("new@y.com");
        let p = Profile::new("renamed@y.com").linked_to(&a.id);

        let plan = plan_orphans(&[a.link_projection()], &[p.link_projection()]);
        assert!(plan.is_empty());
    }

    #[test]
    fn test_profile_without_fk_and_unknown_email_is_orphan() {
        let a = account("a@y.com");
        let linked = Profile::new("a@y.com").linked_to(&a.id);
        let stray = Profile::new("stray@y.com");

        let plan = plan_orphans(
            &[a.link_projection()],
            &[linked.link_projection(), stray.link_projection()],
        );
        assert!(plan.accounts.is_empty());
        assert_eq!(plan.profiles, BTreeSet::from([stray.id.clone()]));
        assert_eq!(plan.len(), 1);
    }
}
