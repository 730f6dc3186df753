use uuid::Uuid;

use crate::{
    api::error,
    modules::relationship::schema::{
        BlockEntity, FriendRequestEntity, FriendshipEntity, PairKey, RelationshipState,
    },
};

/// Atomic unit scoped to one unordered pair.
///
/// The pair lock is held from `RelationshipStore::begin` until the unit is
/// committed or dropped. Dropping without `commit` discards every mutation.
/// All user arguments must belong to the locked pair.
#[async_trait::async_trait]
pub trait PairTransaction: Send {
    fn pair(&self) -> PairKey;

    async fn state(&mut self) -> Result<RelationshipState, error::SystemError>;

    async fn find_friendship(
        &mut self,
        user_id_a: &Uuid,
        user_id_b: &Uuid,
    ) -> Result<Option<FriendshipEntity>, error::SystemError>;

    async fn find_request(
        &mut self,
        sender_id: &Uuid,
        receiver_id: &Uuid,
    ) -> Result<Option<FriendRequestEntity>, error::SystemError>;

    async fn find_block(
        &mut self,
        blocker_id: &Uuid,
        blocked_id: &Uuid,
    ) -> Result<Option<BlockEntity>, error::SystemError>;

    /// Fails with `SystemError::Conflict` if the pair already has a friendship.
    async fn create_friendship(
        &mut self,
        user_id_a: &Uuid,
        user_id_b: &Uuid,
    ) -> Result<FriendshipEntity, error::SystemError>;

    async fn delete_friendship(
        &mut self,
        user_id_a: &Uuid,
        user_id_b: &Uuid,
    ) -> Result<bool, error::SystemError>;

    /// Fails with `SystemError::Conflict` on a duplicate `(sender, receiver)`.
    async fn create_request(
        &mut self,
        sender_id: &Uuid,
        receiver_id: &Uuid,
        message: &Option<String>,
    ) -> Result<FriendRequestEntity, error::SystemError>;

    async fn delete_request(
        &mut self,
        sender_id: &Uuid,
        receiver_id: &Uuid,
    ) -> Result<bool, error::SystemError>;

    /// Idempotent: returns the existing row when the block is already there.
    async fn create_block(
        &mut self,
        blocker_id: &Uuid,
        blocked_id: &Uuid,
    ) -> Result<BlockEntity, error::SystemError>;

    async fn delete_block(
        &mut self,
        blocker_id: &Uuid,
        blocked_id: &Uuid,
    ) -> Result<bool, error::SystemError>;

    async fn commit(self: Box<Self>) -> Result<(), error::SystemError>;
}

/// Durable friendship, request and block storage.
///
/// Mutations only happen through a `PairTransaction`. The remaining reads are
/// lock-free snapshots and may trail an in-flight transition.
#[async_trait::async_trait]
pub trait RelationshipStore: Send + Sync {
    async fn begin(
        &self,
        user_id_a: &Uuid,
        user_id_b: &Uuid,
    ) -> Result<Box<dyn PairTransaction>, error::SystemError>;

    async fn find_friendship(
        &self,
        user_id_a: &Uuid,
        user_id_b: &Uuid,
    ) -> Result<Option<FriendshipEntity>, error::SystemError>;

    async fn is_blocked(
        &self,
        user_id_a: &Uuid,
        user_id_b: &Uuid,
    ) -> Result<bool, error::SystemError>;

    async fn relationship_state(
        &self,
        user_id_a: &Uuid,
        user_id_b: &Uuid,
    ) -> Result<RelationshipState, error::SystemError>;

    async fn list_friendships(
        &self,
        user_id: &Uuid,
    ) -> Result<Vec<FriendshipEntity>, error::SystemError>;

    /// Incoming and outgoing requests, oldest first.
    async fn list_requests(
        &self,
        user_id: &Uuid,
    ) -> Result<Vec<FriendRequestEntity>, error::SystemError>;

    /// Blocks issued by `user_id`.
    async fn list_blocks(&self, user_id: &Uuid) -> Result<Vec<BlockEntity>, error::SystemError>;
}
