use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{
    api::error,
    modules::{
        conversation::repository::DirectChannelProvisioner,
        notification::{event::RelationshipEvent, notifier::Notifier},
        relationship::{
            fanout::{FanoutQueue, FanoutReport, NotificationFanout, RetryPolicy},
            model::Transition,
            repository::{PairTransaction, RelationshipStore},
            repository_memory::RelationshipStoreMemory,
            schema::{
                canonical_pair_key, BlockEntity, FriendRequestEntity, FriendshipEntity, PairKey,
                RelationshipState,
            },
            service::RelationshipService,
        },
        user::{repository::UserRepository, schema::UserProfile},
    },
};

/// Takes one pending failure, if any are left.
fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[derive(Default)]
pub struct StaticProfiles {
    profiles: Mutex<HashMap<Uuid, UserProfile>>,
}

impl StaticProfiles {
    pub fn insert(&self, profile: UserProfile) {
        self.profiles.lock().unwrap().insert(profile.id, profile);
    }

    pub fn rename(&self, id: &Uuid, display_name: &str) {
        if let Some(profile) = self.profiles.lock().unwrap().get_mut(id) {
            profile.display_name = display_name.to_string();
        }
    }
}

#[async_trait::async_trait]
impl UserRepository for StaticProfiles {
    async fn find_profile(&self, id: &Uuid) -> Result<Option<UserProfile>, error::SystemError> {
        Ok(self.profiles.lock().unwrap().get(id).cloned())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    deliveries: Mutex<Vec<(Uuid, RelationshipEvent)>>,
    failures: AtomicU32,
}

impl RecordingNotifier {
    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn for_user(&self, user_id: &Uuid) -> Vec<RelationshipEvent> {
        self.deliveries
            .lock()
            .unwrap()
            .iter()
            .filter(|(recipient, _)| recipient == user_id)
            .map(|(_, event)| event.clone())
            .collect()
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn deliver(
        &self,
        user_id: &Uuid,
        event: &RelationshipEvent,
    ) -> Result<(), error::SystemError> {
        if take_failure(&self.failures) {
            return Err(error::SystemError::InternalError("notifier unavailable".into()));
        }
        self.deliveries.lock().unwrap().push((*user_id, event.clone()));
        Ok(())
    }
}

#[derive(Default)]
pub struct CountingProvisioner {
    calls: Mutex<Vec<PairKey>>,
    channels: Mutex<HashMap<PairKey, Uuid>>,
    failures: AtomicU32,
}

impl CountingProvisioner {
    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Every invocation, failed ones included.
    pub fn calls(&self) -> Vec<PairKey> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl DirectChannelProvisioner for CountingProvisioner {
    async fn ensure_exists(&self, user_a: &Uuid, user_b: &Uuid) -> Result<Uuid, error::SystemError> {
        let pair = canonical_pair_key(*user_a, *user_b);
        self.calls.lock().unwrap().push(pair);

        if take_failure(&self.failures) {
            return Err(error::SystemError::InternalError("messaging unavailable".into()));
        }
        Ok(*self.channels.lock().unwrap().entry(pair).or_insert_with(Uuid::now_v7))
    }
}

/// Memory store whose commits become durable at once but are acknowledged
/// only after `delay`.
pub struct SlowCommitStore {
    inner: RelationshipStoreMemory,
    delay: Duration,
}

pub struct SlowCommitUnit {
    inner: Box<dyn PairTransaction>,
    delay: Duration,
}

#[async_trait::async_trait]
impl PairTransaction for SlowCommitUnit {
    fn pair(&self) -> PairKey {
        self.inner.pair()
    }

    async fn state(&mut self) -> Result<RelationshipState, error::SystemError> {
        self.inner.state().await
    }

    async fn find_friendship(
        &mut self,
        a: &Uuid,
        b: &Uuid,
    ) -> Result<Option<FriendshipEntity>, error::SystemError> {
        self.inner.find_friendship(a, b).await
    }

    async fn find_request(
        &mut self,
        from: &Uuid,
        to: &Uuid,
    ) -> Result<Option<FriendRequestEntity>, error::SystemError> {
        self.inner.find_request(from, to).await
    }

    async fn find_block(
        &mut self,
        blocker: &Uuid,
        blocked: &Uuid,
    ) -> Result<Option<BlockEntity>, error::SystemError> {
        self.inner.find_block(blocker, blocked).await
    }

    async fn create_friendship(
        &mut self,
        a: &Uuid,
        b: &Uuid,
    ) -> Result<FriendshipEntity, error::SystemError> {
        self.inner.create_friendship(a, b).await
    }

    async fn delete_friendship(&mut self, a: &Uuid, b: &Uuid) -> Result<bool, error::SystemError> {
        self.inner.delete_friendship(a, b).await
    }

    async fn create_request(
        &mut self,
        from: &Uuid,
        to: &Uuid,
        message: &Option<String>,
    ) -> Result<FriendRequestEntity, error::SystemError> {
        self.inner.create_request(from, to, message).await
    }

    async fn delete_request(&mut self, from: &Uuid, to: &Uuid) -> Result<bool, error::SystemError> {
        self.inner.delete_request(from, to).await
    }

    async fn create_block(
        &mut self,
        blocker: &Uuid,
        blocked: &Uuid,
    ) -> Result<BlockEntity, error::SystemError> {
        self.inner.create_block(blocker, blocked).await
    }

    async fn delete_block(
        &mut self,
        blocker: &Uuid,
        blocked: &Uuid,
    ) -> Result<bool, error::SystemError> {
        self.inner.delete_block(blocker, blocked).await
    }

    async fn commit(self: Box<Self>) -> Result<(), error::SystemError> {
        let SlowCommitUnit { inner, delay } = *self;
        inner.commit().await?;
        tokio::time::sleep(delay).await;
        Ok(())
    }
}

#[async_trait::async_trait]
impl RelationshipStore for SlowCommitStore {
    async fn begin(
        &self,
        a: &Uuid,
        b: &Uuid,
    ) -> Result<Box<dyn PairTransaction>, error::SystemError> {
        let inner = self.inner.begin(a, b).await?;
        Ok(Box::new(SlowCommitUnit { inner, delay: self.delay }))
    }

    async fn find_friendship(
        &self,
        a: &Uuid,
        b: &Uuid,
    ) -> Result<Option<FriendshipEntity>, error::SystemError> {
        self.inner.find_friendship(a, b).await
    }

    async fn is_blocked(&self, a: &Uuid, b: &Uuid) -> Result<bool, error::SystemError> {
        self.inner.is_blocked(a, b).await
    }

    async fn relationship_state(
        &self,
        a: &Uuid,
        b: &Uuid,
    ) -> Result<RelationshipState, error::SystemError> {
        self.inner.relationship_state(a, b).await
    }

    async fn list_friendships(
        &self,
        user_id: &Uuid,
    ) -> Result<Vec<FriendshipEntity>, error::SystemError> {
        self.inner.list_friendships(user_id).await
    }

    async fn list_requests(
        &self,
        user_id: &Uuid,
    ) -> Result<Vec<FriendRequestEntity>, error::SystemError> {
        self.inner.list_requests(user_id).await
    }

    async fn list_blocks(&self, user_id: &Uuid) -> Result<Vec<BlockEntity>, error::SystemError> {
        self.inner.list_blocks(user_id).await
    }
}

/// Resolver and fanout wired to in-memory collaborators.
///
/// Transitions queue up until `flush` runs them through the fanout, so tests
/// can assert on the store and the deliveries separately.
pub struct Harness {
    pub store: Arc<RelationshipStoreMemory>,
    pub profiles: Arc<StaticProfiles>,
    pub notifier: Arc<RecordingNotifier>,
    pub provisioner: Arc<CountingProvisioner>,
    pub service: RelationshipService,
    pub fanout: NotificationFanout,
    receiver: mpsc::UnboundedReceiver<Transition>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(5))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::build(timeout, None)
    }

    /// The service sees a store whose commits are acknowledged `delay` late.
    pub fn with_commit_delay(timeout: Duration, delay: Duration) -> Self {
        Self::build(timeout, Some(delay))
    }

    fn build(timeout: Duration, commit_delay: Option<Duration>) -> Self {
        let store = Arc::new(RelationshipStoreMemory::new());
        let profiles = Arc::new(StaticProfiles::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let provisioner = Arc::new(CountingProvisioner::default());
        let (queue, receiver) = FanoutQueue::channel();

        let service_store: Arc<dyn RelationshipStore> = match commit_delay {
            Some(delay) => Arc::new(SlowCommitStore { inner: (*store).clone(), delay }),
            None => store.clone(),
        };
        let service = RelationshipService::with_dependencies(
            service_store,
            profiles.clone(),
            queue,
            timeout,
        );
        let fanout = NotificationFanout::with_dependencies(
            profiles.clone(),
            notifier.clone(),
            provisioner.clone(),
            RetryPolicy { max_attempts: 3, backoff: Duration::from_millis(1) },
        );

        Harness {
            store,
            profiles,
            notifier,
            provisioner,
            service,
            fanout,
            receiver,
        }
    }

    pub fn user(&self, name: &str) -> Uuid {
        let id = Uuid::now_v7();
        let mut display_name = name.to_string();
        if let Some(first) = display_name.get_mut(0..1) {
            first.make_ascii_uppercase();
        }
        self.profiles.insert(UserProfile {
            id,
            username: name.to_string(),
            display_name,
            avatar_url: None,
            status: None,
        });
        id
    }

    /// Transitions committed since the last drain, in commit order.
    pub fn drain(&mut self) -> Vec<Transition> {
        let receiver = &mut self.receiver;
        let mut transitions = Vec::new();
        while let Ok(transition) = receiver.try_recv() {
            transitions.push(transition);
        }
        transitions
    }

    pub async fn flush(&mut self) -> Vec<FanoutReport> {
        let mut reports = Vec::new();
        for transition in self.drain() {
            reports.push(self.fanout.process(transition).await);
        }
        reports
    }
}
