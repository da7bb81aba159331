use super::engine::{DeleteFeed, DeleteFilter, EntityStore, SubscribeOptions};
use super::filter::LinkFilter;
use crate::core::{
    Account, DeleteNotification, EntityId, LinkError, LinkProjection, Profile, Result, StoreKind,
    normalize_email,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tokio::sync::broadcast::{self, error::RecvError};

/// Buffered notifications per subscriber before it starts lagging
const FEED_CAPACITY: usize = 1024;

/// What the store's change feed can deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedCapabilities {
    pub notifications: bool,
    pub pre_images: bool,
}

impl FeedCapabilities {
    pub fn full() -> Self {
        Self {
            notifications: true,
            pre_images: true,
        }
    }

    pub fn without_pre_images() -> Self {
        Self {
            notifications: true,
            pre_images: false,
        }
    }

    pub fn disabled() -> Self {
        Self {
            notifications: false,
            pre_images: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoredEntity {
    Account(Account),
    Profile(Profile),
}

impl StoredEntity {
    pub fn id(&self) -> &EntityId {
        match self {
            StoredEntity::Account(account) => &account.id,
            StoredEntity::Profile(profile) => &profile.id,
        }
    }

    pub fn email(&self) -> &str {
        match self {
            StoredEntity::Account(account) => &account.email,
            StoredEntity::Profile(profile) => &profile.email,
        }
    }

    pub fn projection(&self) -> LinkProjection {
        match self {
            StoredEntity::Account(account) => account.link_projection(),
            StoredEntity::Profile(profile) => profile.link_projection(),
        }
    }
}

#[derive(Debug, Clone)]
struct DeletedRecord {
    projection: LinkProjection,
    deleted_at: DateTime<Utc>,
}

/// In-process implementation of [`EntityStore`] for one collection.
///
/// Deletes through [`EntityStore::delete_many`] are published to the change
/// feed; [`InMemoryEntityStore::delete_out_of_band`] is not, the same way a
/// manual edit against a real database bypasses application hooks.
pub struct InMemoryEntityStore {
    kind: StoreKind,
    capabilities: FeedCapabilities,
    records: RwLock<BTreeMap<EntityId, StoredEntity>>,
    feed: RwLock<Option<broadcast::Sender<DeletedRecord>>>,
    online: AtomicBool,
}

impl InMemoryEntityStore {
    fn new(kind: StoreKind, capabilities: FeedCapabilities) -> Self {
        let feed = capabilities
            .notifications
            .then(|| broadcast::channel(FEED_CAPACITY).0);
        Self {
            kind,
            capabilities,
            records: RwLock::new(BTreeMap::new()),
            feed: RwLock::new(feed),
            online: AtomicBool::new(true),
        }
    }

    pub fn accounts(capabilities: FeedCapabilities) -> Self {
        Self::new(StoreKind::Accounts, capabilities)
    }

    pub fn profiles(capabilities: FeedCapabilities) -> Self {
        Self::new(StoreKind::Profiles, capabilities)
    }

    pub fn capabilities(&self) -> FeedCapabilities {
        self.capabilities
    }

    fn ensure_online(&self) -> Result<()> {
        if self.online.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(LinkError::StoreUnavailable(
                self.kind,
                "store is offline".to_string(),
            ))
        }
    }

    /// Simulate a disconnect (`false`) or reconnect (`true`).
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Release);
    }

    /// Drop the notification channel; open subscriptions end.
    pub async fn close_feed(&self) {
        self.feed.write().await.take();
    }

    pub async fn insert_account(&self, mut account: Account) -> Result<EntityId> {
        if self.kind != StoreKind::Accounts {
            return Err(LinkError::ConstraintViolation(format!(
                "store '{}' does not hold accounts",
                self.kind
            )));
        }
        account.email = normalize_email(&account.email);
        self.insert(StoredEntity::Account(account)).await
    }

    pub async fn insert_profile(&self, mut profile: Profile) -> Result<EntityId> {
        if self.kind != StoreKind::Profiles {
            return Err(LinkError::ConstraintViolation(format!(
                "store '{}' does not hold profiles",
                self.kind
            )));
        }
        profile.email = normalize_email(&profile.email);
        self.insert(StoredEntity::Profile(profile)).await
    }

    async fn insert(&self, entity: StoredEntity) -> Result<EntityId> {
        self.ensure_online()?;
        let mut records = self.records.write().await;

        let id = entity.id().clone();
        if records.contains_key(&id) {
            return Err(LinkError::ConstraintViolation(format!(
                "duplicate id '{}' in {}",
                id, self.kind
            )));
        }
        if !entity.email().is_empty() && records.values().any(|r| r.email() == entity.email()) {
            return Err(LinkError::ConstraintViolation(format!(
                "duplicate email '{}' in {}",
                entity.email(),
                self.kind
            )));
        }

        records.insert(id.clone(), entity);
        Ok(id)
    }

    pub async fn get(&self, id: &EntityId) -> Option<StoredEntity> {
        self.records.read().await.get(id).cloned()
    }

    pub async fn contains(&self, id: &EntityId) -> bool {
        self.records.read().await.contains_key(id)
    }

    pub async fn projection(&self, id: &EntityId) -> Option<LinkProjection> {
        self.records.read().await.get(id).map(StoredEntity::projection)
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Delete without publishing notifications.
    pub async fn delete_out_of_band(&self, ids: &BTreeSet<EntityId>) -> Result<u64> {
        self.remove(ids, false).await
    }

    async fn remove(&self, ids: &BTreeSet<EntityId>, notify: bool) -> Result<u64> {
        self.ensure_online()?;
        if ids.is_empty() {
            return Ok(0);
        }

        let removed: Vec<LinkProjection> = {
            let mut records = self.records.write().await;
            ids.iter()
                .filter_map(|id| records.remove(id))
                .map(|entity| entity.projection())
                .collect()
        };

        if notify && !removed.is_empty() {
            if let Some(sender) = self.feed.read().await.as_ref() {
                let deleted_at = Utc::now();
                for projection in &removed {
                    // No receivers is fine: nobody is watching.
                    let _ = sender.send(DeletedRecord {
                        projection: projection.clone(),
                        deleted_at,
                    });
                }
            }
        }

        Ok(removed.len() as u64)
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    fn kind(&self) -> StoreKind {
        self.kind
    }

    async fn ping(&self) -> Result<()> {
        self.ensure_online()
    }

    async fn find_many(&self, filter: &LinkFilter) -> Result<Vec<LinkProjection>> {
        self.ensure_online()?;
        if filter.is_unsatisfiable() {
            return Ok(Vec::new());
        }
        let records = self.records.read().await;
        Ok(records
            .values()
            .map(StoredEntity::projection)
            .filter(|projection| filter.matches(projection))
            .collect())
    }

    async fn delete_many(&self, ids: &BTreeSet<EntityId>) -> Result<u64> {
        self.remove(ids, true).await
    }

    async fn subscribe_to_deletes(
        &self,
        filter: DeleteFilter,
        options: SubscribeOptions,
    ) -> Result<DeleteFeed> {
        self.ensure_online()?;
        if !self.capabilities.notifications {
            return Err(LinkError::FeedUnsupported(
                self.kind,
                "change notifications are disabled".to_string(),
            ));
        }
        if options.want_pre_image && !self.capabilities.pre_images {
            return Err(LinkError::FeedUnsupported(
                self.kind,
                "pre-images are not enabled".to_string(),
            ));
        }

        let receiver = match self.feed.read().await.as_ref() {
            Some(sender) => sender.subscribe(),
            None => {
                return Err(LinkError::FeedUnsupported(
                    self.kind,
                    "delete feed is closed".to_string(),
                ));
            }
        };

        let kind = self.kind;
        let feed = stream::unfold(receiver, move |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(record) => {
                        // Filtering sees the full record even when the
                        // subscriber does not get the pre-image.
                        if !filter.matches(&record.projection) {
                            continue;
                        }
                        let notification = DeleteNotification {
                            store: kind,
                            id: record.projection.id.clone(),
                            pre_image: options.want_pre_image.then_some(record.projection),
                            deleted_at: record.deleted_at,
                        };
                        return Some((Ok(notification), receiver));
                    }
                    Err(RecvError::Lagged(missed)) => {
                        return Some((Err(LinkError::FeedLagged(kind, missed)), receiver));
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        });

        Ok(feed.boxed())
    }
}
