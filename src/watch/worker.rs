use crate::cascade::{CascadeCoordinator, CascadeOrigin};
use crate::core::{DeleteNotification, DeletionEvent, LinkError, Result, Role, StoreKind};
use crate::storage::{DeleteFilter, SubscribeOptions};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Where a watcher stands, as seen by the lifecycle manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatcherState {
    /// Never started; that direction is covered by the sweeper only.
    Disabled(String),
    Running,
    /// The store's feed ended underneath the watcher.
    FeedDropped,
    Stopped,
}

/// What each direction subscribes to.
///
/// Account deletes only need the id. Profile deletes are useless without
/// the pre-image, since the record holding `accountId`/`email` is gone.
pub fn subscription_for(kind: StoreKind, linked_role: Role) -> (DeleteFilter, SubscribeOptions) {
    match kind {
        StoreKind::Accounts => (DeleteFilter::role(linked_role), SubscribeOptions::default()),
        StoreKind::Profiles => (
            DeleteFilter::any(),
            SubscribeOptions {
                want_pre_image: true,
            },
        ),
    }
}

/// Handle to a running delete watcher.
pub struct DeleteWatcher {
    kind: StoreKind,
    state: watch::Receiver<WatcherState>,
    stop_tx: Option<oneshot::Sender<()>>,
    join_handle: Option<JoinHandle<()>>,
}

impl DeleteWatcher {
    pub fn kind(&self) -> StoreKind {
        self.kind
    }

    pub fn state(&self) -> WatcherState {
        self.state.borrow().clone()
    }

    /// A receiver that wakes on every state change.
    pub fn state_changes(&self) -> watch::Receiver<WatcherState> {
        self.state.clone()
    }

    /// Signals the watcher to stop and waits for its loop to exit. A cascade
    /// already in progress finishes first.
    pub async fn stop(mut self) -> Result<()> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        if let Some(join_handle) = self.join_handle.take() {
            join_handle
                .await
                .map_err(|err| LinkError::ExecutionError(format!("{} watcher join: {}", self.kind, err)))?;
        }
        Ok(())
    }
}

impl Drop for DeleteWatcher {
    fn drop(&mut self) {
        if let Some(join_handle) = self.join_handle.take() {
            join_handle.abort();
        }
    }
}

/// Subscribes to `kind`'s delete feed and spawns the loop that turns each
/// notification into a cascade. Fails only if the subscription itself fails.
pub async fn spawn_delete_watcher(
    kind: StoreKind,
    coordinator: Arc<CascadeCoordinator>,
    verbose: bool,
) -> Result<DeleteWatcher> {
    let (filter, options) = subscription_for(kind, coordinator.linked_role());
    let mut feed = coordinator
        .store(kind)
        .subscribe_to_deletes(filter, options)
        .await?;

    let (state_tx, state_rx) = watch::channel(WatcherState::Running);
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

    let join_handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = &mut stop_rx => {
                    state_tx.send_replace(WatcherState::Stopped);
                    break;
                }
                next = feed.next() => match next {
                    Some(Ok(notification)) => {
                        handle_notification(&coordinator, &notification).await;
                    }
                    Some(Err(err)) => {
                        warn!(store = %kind, error = %err, "delete feed error; still listening");
                    }
                    None => {
                        debug!(store = %kind, "delete feed ended; watcher exiting");
                        state_tx.send_replace(WatcherState::FeedDropped);
                        break;
                    }
                }
            }
        }
    });

    crate::progress!(verbose, store = %kind, pre_images = options.want_pre_image, "delete watcher started");

    Ok(DeleteWatcher {
        kind,
        state: state_rx,
        stop_tx: Some(stop_tx),
        join_handle: Some(join_handle),
    })
}

async fn handle_notification(coordinator: &CascadeCoordinator, notification: &DeleteNotification) {
    if notification.store == StoreKind::Profiles && notification.pre_image.is_none() {
        warn!(id = %notification.id, "profile delete arrived without pre-image; leaving it to the sweep");
        return;
    }

    let event = DeletionEvent::from_notification(notification);
    if let Err(err) = coordinator.cascade(&event, CascadeOrigin::Watcher).await {
        // Already logged by the coordinator.
        debug!(store = %event.store, id = %event.id, retryable = err.is_retryable(), "cascade deferred to sweep");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Account, Profile};
    use crate::storage::{EntityStore, FeedCapabilities, InMemoryEntityStore};
    use std::collections::BTreeSet;
    use std::time::Duration;

    fn coordinator(
        accounts: &Arc<InMemoryEntityStore>,
        profiles: &Arc<InMemoryEntityStore>,
    ) -> Arc<CascadeCoordinator> {
        Arc::new(CascadeCoordinator::new(
            accounts.clone(),
            profiles.clone(),
            Role::Student,
        ))
    }

    #[test]
    fn test_subscription_shapes() {
        let (filter, options) = subscription_for(StoreKind::Accounts, Role::Student);
        assert_eq!(filter.role, Some(Role::Student));
        assert!(!options.want_pre_image);

        let (filter, options) = subscription_for(StoreKind::Profiles, Role::Student);
        assert_eq!(filter.role, None);
        assert!(options.want_pre_image);
    }

    #[tokio::test]
    async fn test_profile_watcher_refuses_without_pre_images() {
        let accounts = Arc::new(InMemoryEntityStore::accounts(FeedCapabilities::full()));
        let profiles = Arc::new(InMemoryEntityStore::profiles(FeedCapabilities::without_pre_images()));

        let result = spawn_delete_watcher(StoreKind::Profiles, coordinator(&accounts, &profiles), false).await;
        assert!(matches!(result, Err(LinkError::FeedUnsupported(StoreKind::Profiles, _))));
    }

    #[tokio::test]
    async fn test_feed_drop_is_reported_in_state() {
        let accounts = Arc::new(InMemoryEntityStore::accounts(FeedCapabilities::full()));
        let profiles = Arc::new(InMemoryEntityStore::profiles(FeedCapabilities::full()));
        let watcher = spawn_delete_watcher(StoreKind::Accounts, coordinator(&accounts, &profiles), false)
            .await
            .unwrap();
        assert_eq!(watcher.state(), WatcherState::Running);

        accounts.close_feed().await;

        let mut state = watcher.state.clone();
        tokio::time::timeout(Duration::from_secs(2), state.wait_for(|s| *s == WatcherState::FeedDropped))
            .await
            .unwrap()
            .unwrap();
        watcher.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_cascade_failure_keeps_watcher_listening() {
        let accounts = Arc::new(InMemoryEntityStore::accounts(FeedCapabilities::full()));
        let profiles = Arc::new(InMemoryEntityStore::profiles(FeedCapabilities::full()));
        let watcher = spawn_delete_watcher(StoreKind::Accounts, coordinator(&accounts, &profiles), true)
            .await
            .unwrap();

        let first = Account::new("one@x.com", Role::Student);
        let second = Account::new("two@x.com", Role::Student);
        accounts.insert_account(first.clone()).await.unwrap();
        accounts.insert_account(second.clone()).await.unwrap();
        let survivor = Profile::new("one@x.com").linked_to(&first.id);
        let dependent = Profile::new("two@x.com").linked_to(&second.id);
        profiles.insert_profile(survivor.clone()).await.unwrap();
        profiles.insert_profile(dependent.clone()).await.unwrap();

        profiles.set_online(false);
        accounts.delete_many(&BTreeSet::from([first.id.clone()])).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        profiles.set_online(true);

        accounts.delete_many(&BTreeSet::from([second.id.clone()])).await.unwrap();
        let mut removed = false;
        for _ in 0..200 {
            if !profiles.contains(&dependent.id).await {
                removed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(removed);
        assert!(profiles.contains(&survivor.id).await);
        assert_eq!(watcher.state(), WatcherState::Running);
        watcher.stop().await.unwrap();
    }
}
