use super::filter::LinkFilter;
use crate::core::{DeleteNotification, EntityId, LinkError, LinkProjection, Result, Role, StoreKind};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::BTreeSet;

/// Live stream of delete notifications from one store.
///
/// `Some(Err(..))` is a per-event problem (e.g. the subscriber lagged) and
/// the stream stays usable; the stream ending means the feed dropped.
pub type DeleteFeed = BoxStream<'static, Result<DeleteNotification>>;

/// Store-side selection of which deletes are delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteFilter {
    pub role: Option<Role>,
}

impl DeleteFilter {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn role(role: Role) -> Self {
        Self { role: Some(role) }
    }

    pub fn matches(&self, projection: &LinkProjection) -> bool {
        self.role.is_none_or(|role| projection.role == Some(role))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Deliver each record as it was right before the delete.
    pub want_pre_image: bool,
}

/// Capability surface the engine needs from a backing collection.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Which collection this store holds
    fn kind(&self) -> StoreKind;

    /// Cheap connectivity check
    async fn ping(&self) -> Result<()>;

    /// Projection-only read of every record matching `filter`
    async fn find_many(&self, filter: &LinkFilter) -> Result<Vec<LinkProjection>>;

    /// Delete by id set; returns how many records actually went away.
    /// Ids that do not exist are ignored.
    async fn delete_many(&self, ids: &BTreeSet<EntityId>) -> Result<u64>;

    /// Subscribe to deletes. Stores without change notifications (or without
    /// pre-images when `want_pre_image` is set) fail here with
    /// [`LinkError::FeedUnsupported`].
    async fn subscribe_to_deletes(
        &self,
        _filter: DeleteFilter,
        _options: SubscribeOptions,
    ) -> Result<DeleteFeed> {
        Err(LinkError::FeedUnsupported(
            self.kind(),
            "change notifications not implemented".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn projection(role: Option<Role>) -> LinkProjection {
        LinkProjection {
            id: EntityId::from("r1"),
            linked_id: None,
            email: "r@x.com".to_string(),
            role,
        }
    }

    #[test]
    fn test_delete_filter_by_role() {
        let students = DeleteFilter::role(Role::Student);
        assert!(students.matches(&projection(Some(Role::Student))));
        assert!(!students.matches(&projection(Some(Role::Admin))));
        assert!(!students.matches(&projection(None)));

        assert!(DeleteFilter::any().matches(&projection(None)));
    }
}
