use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use tokio::sync::{OwnedMutexGuard, RwLock};
use uuid::Uuid;

use crate::{
    api::error,
    modules::relationship::{
        repository::{PairTransaction, RelationshipStore},
        schema::{
            canonical_pair_key, BlockEntity, FriendRequestEntity, FriendshipEntity, PairKey,
            PairRecord, RelationshipState,
        },
    },
};

struct PairSlot {
    /// Held for the whole lifetime of a `MemoryPairTransaction`.
    gate: Arc<tokio::sync::Mutex<()>>,
    committed: RwLock<PairRecord>,
}

/// Process-local store. Each pair owns its rows and its own async mutex, so
/// unrelated pairs never contend.
#[derive(Clone, Default)]
pub struct RelationshipStoreMemory {
    slots: Arc<Mutex<HashMap<PairKey, Arc<PairSlot>>>>,
}

impl RelationshipStoreMemory {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, pair: PairKey) -> Arc<PairSlot> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .entry(pair)
            .or_insert_with(|| {
                Arc::new(PairSlot {
                    gate: Arc::new(tokio::sync::Mutex::new(())),
                    committed: RwLock::new(PairRecord::default()),
                })
            })
            .clone()
    }

    #[cfg(test)]
    fn slot_count(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn existing_slot(&self, pair: &PairKey) -> Option<Arc<PairSlot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).get(pair).cloned()
    }

    async fn snapshot(&self, pair: &PairKey) -> PairRecord {
        match self.existing_slot(pair) {
            Some(slot) => slot.committed.read().await.clone(),
            None => PairRecord::default(),
        }
    }

    /// Committed records of every pair `user_id` belongs to.
    async fn records_for(&self, user_id: &Uuid) -> Vec<PairRecord> {
        let slots: Vec<Arc<PairSlot>> = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(pair, _)| pair.contains(user_id))
            .map(|(_, slot)| slot.clone())
            .collect();

        let mut records = Vec::with_capacity(slots.len());
        for slot in slots {
            records.push(slot.committed.read().await.clone());
        }
        records
    }
}

#[async_trait::async_trait]
impl RelationshipStore for RelationshipStoreMemory {
    async fn begin(
        &self,
        user_id_a: &Uuid,
        user_id_b: &Uuid,
    ) -> Result<Box<dyn PairTransaction>, error::SystemError> {
        let pair = canonical_pair_key(*user_id_a, *user_id_b);
        let slot = self.slot(pair);
        let guard = slot.gate.clone().lock_owned().await;
        let working = slot.committed.read().await.clone();

        Ok(Box::new(MemoryPairTransaction {
            pair,
            slots: self.slots.clone(),
            slot,
            working,
            _guard: guard,
        }))
    }

    async fn find_friendship(
        &self,
        user_id_a: &Uuid,
        user_id_b: &Uuid,
    ) -> Result<Option<FriendshipEntity>, error::SystemError> {
        let pair = canonical_pair_key(*user_id_a, *user_id_b);
        Ok(self.snapshot(&pair).await.friendship)
    }

    async fn is_blocked(
        &self,
        user_id_a: &Uuid,
        user_id_b: &Uuid,
    ) -> Result<bool, error::SystemError> {
        let pair = canonical_pair_key(*user_id_a, *user_id_b);
        Ok(!self.snapshot(&pair).await.blocks.is_empty())
    }

    async fn relationship_state(
        &self,
        user_id_a: &Uuid,
        user_id_b: &Uuid,
    ) -> Result<RelationshipState, error::SystemError> {
        let pair = canonical_pair_key(*user_id_a, *user_id_b);
        self.snapshot(&pair).await.state(&pair)
    }

    async fn list_friendships(
        &self,
        user_id: &Uuid,
    ) -> Result<Vec<FriendshipEntity>, error::SystemError> {
        let mut friendships: Vec<FriendshipEntity> =
            self.records_for(user_id).await.into_iter().filter_map(|r| r.friendship).collect();
        friendships.sort_by_key(|f| f.created_at);
        Ok(friendships)
    }

    async fn list_requests(
        &self,
        user_id: &Uuid,
    ) -> Result<Vec<FriendRequestEntity>, error::SystemError> {
        let mut requests: Vec<FriendRequestEntity> =
            self.records_for(user_id).await.into_iter().flat_map(|r| r.requests).collect();
        requests.sort_by_key(|r| r.created_at);
        Ok(requests)
    }

    async fn list_blocks(&self, user_id: &Uuid) -> Result<Vec<BlockEntity>, error::SystemError> {
        let mut blocks: Vec<BlockEntity> = self
            .records_for(user_id)
            .await
            .into_iter()
            .flat_map(|r| r.blocks)
            .filter(|b| b.blocker_id == *user_id)
            .collect();
        blocks.sort_by_key(|b| b.created_at);
        Ok(blocks)
    }
}

/// Works on a private copy of the pair's record and publishes it on commit.
pub struct MemoryPairTransaction {
    pair: PairKey,
    slots: Arc<Mutex<HashMap<PairKey, Arc<PairSlot>>>>,
    slot: Arc<PairSlot>,
    working: PairRecord,
    _guard: OwnedMutexGuard<()>,
}

#[async_trait::async_trait]
impl PairTransaction for MemoryPairTransaction {
    fn pair(&self) -> PairKey {
        self.pair
    }

    async fn state(&mut self) -> Result<RelationshipState, error::SystemError> {
        self.working.state(&self.pair)
    }

    async fn find_friendship(
        &mut self,
        user_id_a: &Uuid,
        user_id_b: &Uuid,
    ) -> Result<Option<FriendshipEntity>, error::SystemError> {
        self.pair.ensure_members(user_id_a, user_id_b)?;
        Ok(self.working.friendship.clone())
    }

    async fn find_request(
        &mut self,
        sender_id: &Uuid,
        receiver_id: &Uuid,
    ) -> Result<Option<FriendRequestEntity>, error::SystemError> {
        self.pair.ensure_members(sender_id, receiver_id)?;
        Ok(self
            .working
            .requests
            .iter()
            .find(|r| r.from_user_id == *sender_id && r.to_user_id == *receiver_id)
            .cloned())
    }

    async fn find_block(
        &mut self,
        blocker_id: &Uuid,
        blocked_id: &Uuid,
    ) -> Result<Option<BlockEntity>, error::SystemError> {
        self.pair.ensure_members(blocker_id, blocked_id)?;
        Ok(self
            .working
            .blocks
            .iter()
            .find(|b| b.blocker_id == *blocker_id && b.blocked_id == *blocked_id)
            .cloned())
    }

    async fn create_friendship(
        &mut self,
        user_id_a: &Uuid,
        user_id_b: &Uuid,
    ) -> Result<FriendshipEntity, error::SystemError> {
        self.pair.ensure_members(user_id_a, user_id_b)?;
        if self.working.friendship.is_some() {
            return Err(error::SystemError::Conflict(None));
        }

        let friendship = FriendshipEntity {
            user_low_id: self.pair.low,
            user_high_id: self.pair.high,
            created_at: chrono::Utc::now(),
        };
        self.working.friendship = Some(friendship.clone());
        Ok(friendship)
    }

    async fn delete_friendship(
        &mut self,
        user_id_a: &Uuid,
        user_id_b: &Uuid,
    ) -> Result<bool, error::SystemError> {
        self.pair.ensure_members(user_id_a, user_id_b)?;
        Ok(self.working.friendship.take().is_some())
    }

    async fn create_request(
        &mut self,
        sender_id: &Uuid,
        receiver_id: &Uuid,
        message: &Option<String>,
    ) -> Result<FriendRequestEntity, error::SystemError> {
        if self.find_request(sender_id, receiver_id).await?.is_some() {
            return Err(error::SystemError::Conflict(None));
        }

        let request = FriendRequestEntity {
            id: Uuid::now_v7(),
            from_user_id: *sender_id,
            to_user_id: *receiver_id,
            message: message.clone(),
            created_at: chrono::Utc::now(),
        };
        self.working.requests.push(request.clone());
        Ok(request)
    }

    async fn delete_request(
        &mut self,
        sender_id: &Uuid,
        receiver_id: &Uuid,
    ) -> Result<bool, error::SystemError> {
        self.pair.ensure_members(sender_id, receiver_id)?;
        let before = self.working.requests.len();
        self.working
            .requests
            .retain(|r| !(r.from_user_id == *sender_id && r.to_user_id == *receiver_id));
        Ok(self.working.requests.len() != before)
    }

    async fn create_block(
        &mut self,
        blocker_id: &Uuid,
        blocked_id: &Uuid,
    ) -> Result<BlockEntity, error::SystemError> {
        if let Some(existing) = self.find_block(blocker_id, blocked_id).await? {
            return Ok(existing);
        }

        let block = BlockEntity {
            blocker_id: *blocker_id,
            blocked_id: *blocked_id,
            created_at: chrono::Utc::now(),
        };
        self.working.blocks.push(block.clone());
        Ok(block)
    }

    async fn delete_block(
        &mut self,
        blocker_id: &Uuid,
        blocked_id: &Uuid,
    ) -> Result<bool, error::SystemError> {
        self.pair.ensure_members(blocker_id, blocked_id)?;
        let before = self.working.blocks.len();
        self.working
            .blocks
            .retain(|b| !(b.blocker_id == *blocker_id && b.blocked_id == *blocked_id));
        Ok(self.working.blocks.len() != before)
    }

    async fn commit(mut self: Box<Self>) -> Result<(), error::SystemError> {
        *self.slot.committed.write().await = std::mem::take(&mut self.working);
        Ok(())
    }
}

impl Drop for MemoryPairTransaction {
    /// Forgets the pair once it holds no rows and nobody else references it.
    /// Runs before the gate is released.
    fn drop(&mut self) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the map and one here; any other unit or reader
        // cloned the slot under this same map lock.
        if Arc::strong_count(&self.slot) != 2 {
            return;
        }
        let empty = self.slot.committed.try_read().map(|r| r.is_empty()).unwrap_or(false);
        if empty {
            slots.remove(&self.pair);
        }
    }
}
