#![allow(dead_code)]

use async_trait::async_trait;
use linkkeeper::{
    Account, DeleteFeed, DeleteFilter, EntityId, EntityStore, FeedCapabilities,
    InMemoryEntityStore, LifecycleManager, LinkFilter, LinkProjection, Profile, ReconcilerConfig,
    Result, Role, StoreKind, SubscribeOptions,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

pub struct Harness {
    pub accounts: Arc<InMemoryEntityStore>,
    pub profiles: Arc<InMemoryEntityStore>,
    pub engine: LifecycleManager,
}

/// No startup sweep and an interval long enough that only `sweep_now` runs.
pub fn manual_sweep_config() -> ReconcilerConfig {
    ReconcilerConfig::new()
        .sweep_interval(Duration::from_secs(3600))
        .sweep_on_start(false)
        .verbose(true)
}

pub fn stores(capabilities: FeedCapabilities) -> (Arc<InMemoryEntityStore>, Arc<InMemoryEntityStore>) {
    (
        Arc::new(InMemoryEntityStore::accounts(capabilities)),
        Arc::new(InMemoryEntityStore::profiles(capabilities)),
    )
}

pub async fn start_harness(capabilities: FeedCapabilities, config: ReconcilerConfig) -> Harness {
    let (accounts, profiles) = stores(capabilities);
    let mut engine = LifecycleManager::new(accounts.clone(), profiles.clone(), config).unwrap();
    engine.start().await;
    Harness {
        accounts,
        profiles,
        engine,
    }
}

/// Registration order: Account first, then the Profile pointing at it.
pub async fn linked_pair(
    accounts: &InMemoryEntityStore,
    profiles: &InMemoryEntityStore,
    email: &str,
) -> (Account, Profile) {
    let account = Account::new(email, Role::Student);
    accounts.insert_account(account.clone()).await.unwrap();
    let profile = Profile::new(email).linked_to(&account.id);
    profiles.insert_profile(profile.clone()).await.unwrap();
    (account, profile)
}

pub fn id_set(ids: &[&EntityId]) -> BTreeSet<EntityId> {
    ids.iter().map(|id| (*id).clone()).collect()
}

/// Polls until `id` is gone from `store`, up to two seconds.
pub async fn wait_until_absent(store: &InMemoryEntityStore, id: &EntityId) -> bool {
    for _ in 0..200 {
        if !store.contains(id).await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Lets watcher tasks drain whatever is queued.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

/// Every profile linked to a linked-role account and vice versa, by id or
/// by email.
pub async fn assert_converged(accounts: &InMemoryEntityStore, profiles: &InMemoryEntityStore) {
    let linked = accounts
        .find_many(&LinkFilter::all().with_role(Role::Student))
        .await
        .unwrap();
    let all_profiles = profiles.find_many(&LinkFilter::all()).await.unwrap();

    for profile in &all_profiles {
        let ok = linked.iter().any(|a| {
            profile.linked_id.as_ref() == Some(&a.id) || a.email == profile.email
        });
        assert!(ok, "dangling profile {:?}", profile);
    }
    for account in &linked {
        let ok = all_profiles
            .iter()
            .any(|p| p.linked_id.as_ref() == Some(&account.id) || p.email == account.email);
        assert!(ok, "account without profile {:?}", account);
    }
}

/// Delays every read so a sweep stays in flight long enough to overlap.
pub struct SlowStore {
    pub inner: Arc<InMemoryEntityStore>,
    pub delay: Duration,
}

#[async_trait]
impl EntityStore for SlowStore {
    fn kind(&self) -> StoreKind {
        self.inner.kind()
    }

    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }

    async fn find_many(&self, filter: &LinkFilter) -> Result<Vec<LinkProjection>> {
        tokio::time::sleep(self.delay).await;
        self.inner.find_many(filter).await
    }

    async fn delete_many(&self, ids: &BTreeSet<EntityId>) -> Result<u64> {
        self.inner.delete_many(ids).await
    }

    async fn subscribe_to_deletes(
        &self,
        filter: DeleteFilter,
        options: SubscribeOptions,
    ) -> Result<DeleteFeed> {
        self.inner.subscribe_to_deletes(filter, options).await
    }
}

/// A store client with no change-feed support at all.
pub struct FeedlessStore(pub Arc<InMemoryEntityStore>);

#[async_trait]
impl EntityStore for FeedlessStore {
    fn kind(&self) -> StoreKind {
        self.0.kind()
    }

    async fn ping(&self) -> Result<()> {
        self.0.ping().await
    }

    async fn find_many(&self, filter: &LinkFilter) -> Result<Vec<LinkProjection>> {
        self.0.find_many(filter).await
    }

    async fn delete_many(&self, ids: &BTreeSet<EntityId>) -> Result<u64> {
        self.0.delete_many(ids).await
    }
}
