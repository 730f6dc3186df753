use std::{future::Future, sync::Arc, time::Duration};

use futures_util::future::try_join_all;
use log::{debug, info};
use uuid::Uuid;

use crate::modules::{
    relationship::{
        error::RelationshipError,
        fanout::FanoutQueue,
        model::{
            DeclineReason, Effect, FriendRequestResponse, FriendResponse, IdOrInfo, IntentKind,
            Removal, RequestOutcome, Transition, MAX_REQUEST_MESSAGE_LEN,
        },
        repository::{PairTransaction, RelationshipStore},
        schema::{BlockEntity, FriendRequestEntity, FriendshipEntity, RelationshipState},
    },
    user::repository::UserRepository,
};

/// Relationship state machine.
///
/// Every intent runs inside one pair-scoped unit of the store: preconditions
/// are read and the mutation applied under the same lock, then the unit
/// commits and the resulting `Transition` goes to the fanout queue.
#[derive(Clone)]
pub struct RelationshipService {
    store: Arc<dyn RelationshipStore>,
    user_repo: Arc<dyn UserRepository + Send + Sync>,
    fanout: FanoutQueue,
    timeout: Duration,
}

impl RelationshipService {
    pub fn with_dependencies(
        store: Arc<dyn RelationshipStore>,
        user_repo: Arc<dyn UserRepository + Send + Sync>,
        fanout: FanoutQueue,
        timeout: Duration,
    ) -> Self {
        info!("RelationshipService initialized with {:?} store timeout", timeout);
        RelationshipService { store, user_repo, fanout, timeout }
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, RelationshipError>
    where
        F: Future<Output = Result<T, RelationshipError>>,
    {
        tokio::time::timeout(self.timeout, fut).await?
    }

    /// Runs one intent and hands its transition to the fanout once committed.
    ///
    /// Only the work up to commit is bounded. Once the unit is staged, commit
    /// and dispatch run to completion so a durable change is never reported
    /// as a timeout.
    async fn resolve<T, F>(&self, intent: F) -> Result<T, RelationshipError>
    where
        F: Future<Output = Result<(T, Staged), RelationshipError>>,
    {
        let (value, staged) = match self.bounded(intent).await {
            Ok(staged) => staged,
            Err(err) => {
                debug!("Relationship intent rejected: {}", err);
                return Err(err);
            }
        };

        let Staged { unit, transition } = staged;
        let pair = unit.pair();
        unit.commit().await?;

        debug!(
            "{:?} by {} on pair {}: {:?} -> {:?}",
            transition.intent, transition.actor, pair, transition.before, transition.after
        );
        self.fanout.dispatch(transition);
        Ok(value)
    }

    async fn ensure_user_exists(&self, user_id: &Uuid) -> Result<(), RelationshipError> {
        match self.user_repo.find_profile(user_id).await? {
            Some(_) => Ok(()),
            None => Err(RelationshipError::NotFound("User")),
        }
    }

    pub async fn send_friend_request(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        message: Option<String>,
    ) -> Result<RequestOutcome, RelationshipError> {
        if sender_id == receiver_id {
            return Err(RelationshipError::InvalidSelfReference);
        }
        if message.as_ref().is_some_and(|m| m.chars().count() > MAX_REQUEST_MESSAGE_LEN) {
            return Err(RelationshipError::MessageTooLong);
        }
        self.resolve(self.send_in_unit(sender_id, receiver_id, message)).await
    }

    async fn send_in_unit(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        message: Option<String>,
    ) -> Result<(RequestOutcome, Staged), RelationshipError> {
        self.ensure_user_exists(&receiver_id).await?;
        let mut tx = self.store.begin(&sender_id, &receiver_id).await?;
        let before = tx.state().await?;

        let (outcome, effect) = match before {
            RelationshipState::BlockedBy { .. } | RelationshipState::MutualBlock => {
                return Err(RelationshipError::Blocked);
            }
            RelationshipState::Friends => return Err(RelationshipError::AlreadyFriends),
            RelationshipState::Requested { from, .. } if from == sender_id => {
                return Err(RelationshipError::DuplicateRequest);
            }
            RelationshipState::Requested { .. } => {
                // The receiver already asked: resolve both requests into one friendship.
                let (request, friendship) =
                    accept_in_unit(tx.as_mut(), &receiver_id, &sender_id).await?;
                (
                    RequestOutcome::Accepted(friendship.clone()),
                    Effect::RequestAccepted { request, friendship },
                )
            }
            RelationshipState::None => {
                let request = tx.create_request(&sender_id, &receiver_id, &message).await?;
                (RequestOutcome::Pending(request.clone()), Effect::RequestCreated(request))
            }
        };

        let staged =
            stage(tx, sender_id, receiver_id, IntentKind::SendRequest, before, vec![effect])
                .await?;
        Ok((outcome, staged))
    }

    pub async fn accept_friend_request(
        &self,
        receiver_id: Uuid,
        sender_id: Uuid,
    ) -> Result<FriendshipEntity, RelationshipError> {
        if receiver_id == sender_id {
            return Err(RelationshipError::InvalidSelfReference);
        }
        self.resolve(async {
            let mut tx = self.store.begin(&receiver_id, &sender_id).await?;
            let before = tx.state().await?;
            let (request, friendship) = accept_in_unit(tx.as_mut(), &sender_id, &receiver_id).await?;
            let effects = vec![Effect::RequestAccepted { request, friendship: friendship.clone() }];
            let staged =
                stage(tx, receiver_id, sender_id, IntentKind::AcceptRequest, before, effects)
                    .await?;
            Ok((friendship, staged))
        })
        .await
    }

    pub async fn reject_friend_request(
        &self,
        receiver_id: Uuid,
        sender_id: Uuid,
    ) -> Result<FriendRequestEntity, RelationshipError> {
        if receiver_id == sender_id {
            return Err(RelationshipError::InvalidSelfReference);
        }
        self.resolve(self.withdraw_in_unit(
            receiver_id,
            sender_id,
            receiver_id,
            IntentKind::RejectRequest,
            DeclineReason::Rejected,
        ))
        .await
    }

    pub async fn cancel_friend_request(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
    ) -> Result<FriendRequestEntity, RelationshipError> {
        if sender_id == receiver_id {
            return Err(RelationshipError::InvalidSelfReference);
        }
        self.resolve(self.withdraw_in_unit(
            sender_id,
            sender_id,
            receiver_id,
            IntentKind::CancelRequest,
            DeclineReason::Cancelled,
        ))
        .await
    }

    /// Deletes the `sender -> receiver` request on behalf of `actor`.
    async fn withdraw_in_unit(
        &self,
        actor: Uuid,
        sender_id: Uuid,
        receiver_id: Uuid,
        intent: IntentKind,
        reason: DeclineReason,
    ) -> Result<(FriendRequestEntity, Staged), RelationshipError> {
        let counterpart = if actor == sender_id { receiver_id } else { sender_id };
        let mut tx = self.store.begin(&sender_id, &receiver_id).await?;
        let before = tx.state().await?;

        let request = tx
            .find_request(&sender_id, &receiver_id)
            .await?
            .ok_or(RelationshipError::NotFound("Friend request"))?;
        tx.delete_request(&sender_id, &receiver_id).await?;

        let effects = vec![Effect::RequestRemoved { request: request.clone(), reason }];
        let staged = stage(tx, actor, counterpart, intent, before, effects).await?;
        Ok((request, staged))
    }

    /// Removes the friendship, or failing that, `user_id`'s own pending request
    /// to `friend_id`.
    pub async fn remove_friend(
        &self,
        user_id: Uuid,
        friend_id: Uuid,
    ) -> Result<Removal, RelationshipError> {
        if user_id == friend_id {
            return Err(RelationshipError::InvalidSelfReference);
        }
        self.resolve(async {
            let mut tx = self.store.begin(&user_id, &friend_id).await?;
            let before = tx.state().await?;

            if let Some(friendship) = tx.find_friendship(&user_id, &friend_id).await? {
                tx.delete_friendship(&user_id, &friend_id).await?;
                let effects = vec![Effect::FriendshipRemoved(friendship.clone())];
                let staged =
                    stage(tx, user_id, friend_id, IntentKind::RemoveFriend, before, effects)
                        .await?;
                return Ok((Removal::Friendship(friendship), staged));
            }

            let request = tx
                .find_request(&user_id, &friend_id)
                .await?
                .ok_or(RelationshipError::NotFound("Friendship"))?;
            tx.delete_request(&user_id, &friend_id).await?;

            let effects = vec![Effect::RequestRemoved {
                request: request.clone(),
                reason: DeclineReason::Cancelled,
            }];
            let staged =
                stage(tx, user_id, friend_id, IntentKind::CancelRequest, before, effects).await?;
            Ok((Removal::Request(request), staged))
        })
        .await
    }

    /// Always applicable: clears any friendship or request, then blocks.
    pub async fn block_user(
        &self,
        blocker_id: Uuid,
        target_id: Uuid,
    ) -> Result<BlockEntity, RelationshipError> {
        if blocker_id == target_id {
            return Err(RelationshipError::InvalidSelfReference);
        }
        self.resolve(async {
            self.ensure_user_exists(&target_id).await?;
            let mut tx = self.store.begin(&blocker_id, &target_id).await?;
            let before = tx.state().await?;
            let mut effects = Vec::new();

            if let Some(friendship) = tx.find_friendship(&blocker_id, &target_id).await? {
                tx.delete_friendship(&blocker_id, &target_id).await?;
                effects.push(Effect::FriendshipRemoved(friendship));
            }
            if let Some(request) = tx.find_request(&target_id, &blocker_id).await? {
                tx.delete_request(&target_id, &blocker_id).await?;
                effects.push(Effect::RequestRemoved { request, reason: DeclineReason::Rejected });
            }
            if let Some(request) = tx.find_request(&blocker_id, &target_id).await? {
                tx.delete_request(&blocker_id, &target_id).await?;
                effects.push(Effect::RequestRemoved { request, reason: DeclineReason::Cancelled });
            }

            let existing = tx.find_block(&blocker_id, &target_id).await?;
            let block = tx.create_block(&blocker_id, &target_id).await?;
            if existing.is_none() {
                effects.push(Effect::BlockCreated(block.clone()));
            }

            let staged =
                stage(tx, blocker_id, target_id, IntentKind::Block, before, effects).await?;
            Ok((block, staged))
        })
        .await
    }

    pub async fn unblock_user(
        &self,
        blocker_id: Uuid,
        target_id: Uuid,
    ) -> Result<BlockEntity, RelationshipError> {
        if blocker_id == target_id {
            return Err(RelationshipError::InvalidSelfReference);
        }
        self.resolve(async {
            let mut tx = self.store.begin(&blocker_id, &target_id).await?;
            let before = tx.state().await?;

            let block = tx
                .find_block(&blocker_id, &target_id)
                .await?
                .ok_or(RelationshipError::NotFound("Block"))?;
            tx.delete_block(&blocker_id, &target_id).await?;

            let effects = vec![Effect::BlockRemoved(block.clone())];
            let staged =
                stage(tx, blocker_id, target_id, IntentKind::Unblock, before, effects).await?;
            Ok((block, staged))
        })
        .await
    }

    pub async fn relationship(
        &self,
        user_id: Uuid,
        other_id: Uuid,
    ) -> Result<RelationshipState, RelationshipError> {
        self.bounded(async {
            Ok(self.store.relationship_state(&user_id, &other_id).await?)
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn is_friend(&self, user_id: Uuid, friend_id: Uuid) -> Result<bool, RelationshipError> {
        self.bounded(async {
            Ok(self.store.find_friendship(&user_id, &friend_id).await?.is_some())
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn is_blocked(&self, user_id: Uuid, other_id: Uuid) -> Result<bool, RelationshipError> {
        self.bounded(async { Ok(self.store.is_blocked(&user_id, &other_id).await?) }).await
    }

    pub async fn get_friends(&self, user_id: Uuid) -> Result<Vec<FriendResponse>, RelationshipError> {
        self.bounded(async {
            let friendships = self.store.list_friendships(&user_id).await?;
            let profiles = try_join_all(
                friendships.iter().map(|f| {
                    let other = f.other(&user_id);
                    async move { self.user_repo.find_profile(&other).await }
                }),
            )
            .await?;

            Ok(friendships
                .iter()
                .zip(profiles)
                .filter_map(|(friendship, profile)| {
                    profile.map(|p| FriendResponse::new(p, friendship))
                })
                .collect())
        })
        .await
    }

    pub async fn get_friend_requests(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<FriendRequestResponse>, RelationshipError> {
        self.bounded(async {
            let requests = self.store.list_requests(&user_id).await?;
            let profiles = try_join_all(requests.iter().map(|r| {
                let other = if r.from_user_id == user_id { r.to_user_id } else { r.from_user_id };
                async move { self.user_repo.find_profile(&other).await }
            }))
            .await?;

            Ok(requests
                .into_iter()
                .zip(profiles)
                .filter_map(|(request, profile)| {
                    let profile = profile?;
                    let (from, to) = if request.from_user_id == user_id {
                        (IdOrInfo::Id(user_id), IdOrInfo::Info(profile))
                    } else {
                        (IdOrInfo::Info(profile), IdOrInfo::Id(user_id))
                    };
                    Some(FriendRequestResponse {
                        id: request.id,
                        from,
                        to,
                        message: request.message,
                        created_at: request.created_at,
                    })
                })
                .collect())
        })
        .await
    }

    pub async fn get_blocked_users(&self, user_id: Uuid) -> Result<Vec<BlockEntity>, RelationshipError> {
        self.bounded(async { Ok(self.store.list_blocks(&user_id).await?) }).await
    }
}

/// Turns the pending `sender -> receiver` request into a friendship.
async fn accept_in_unit(
    tx: &mut dyn PairTransaction,
    sender_id: &Uuid,
    receiver_id: &Uuid,
) -> Result<(FriendRequestEntity, FriendshipEntity), RelationshipError> {
    let request = tx
        .find_request(sender_id, receiver_id)
        .await?
        .ok_or(RelationshipError::NotFound("Friend request"))?;
    tx.delete_request(sender_id, receiver_id).await?;
    let friendship = tx.create_friendship(sender_id, receiver_id).await?;
    Ok((request, friendship))
}

/// An intent's unit, validated and ready to commit.
struct Staged {
    unit: Box<dyn PairTransaction>,
    transition: Transition,
}

async fn stage(
    mut tx: Box<dyn PairTransaction>,
    actor: Uuid,
    counterpart: Uuid,
    intent: IntentKind,
    before: RelationshipState,
    effects: Vec<Effect>,
) -> Result<Staged, RelationshipError> {
    let after = tx.state().await?;
    let transition = Transition { actor, counterpart, intent, before, after, effects };
    Ok(Staged { unit: tx, transition })
}
