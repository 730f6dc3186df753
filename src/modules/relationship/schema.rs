use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use uuid::Uuid;

use crate::api::error;

/// Canonical identity of an unordered pair of users: `low < high`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PairKey {
    pub low: Uuid,
    pub high: Uuid,
}

/// The only place the pair ordering is defined. Every store operation goes through it.
pub fn canonical_pair_key(a: Uuid, b: Uuid) -> PairKey {
    if a <= b { PairKey { low: a, high: b } } else { PairKey { low: b, high: a } }
}

impl PairKey {
    pub fn contains(&self, id: &Uuid) -> bool {
        self.low == *id || self.high == *id
    }

    /// Key used for pair-scoped locks, stable across processes.
    pub fn lock_key(&self) -> String {
        format!("{}:{}", self.low, self.high)
    }

    pub fn ensure_members(&self, a: &Uuid, b: &Uuid) -> Result<(), error::SystemError> {
        if canonical_pair_key(*a, *b) != *self {
            return Err(error::SystemError::inconsistent(format!(
                "users {a} and {b} are outside the locked pair {self}"
            )));
        }
        Ok(())
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.low, self.high)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct FriendRequestEntity {
    pub id: Uuid,
    pub from_user_id: Uuid,
    pub to_user_id: Uuid,
    pub message: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct FriendshipEntity {
    pub user_low_id: Uuid,
    pub user_high_id: Uuid,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl FriendshipEntity {
    pub fn pair(&self) -> PairKey {
        PairKey { low: self.user_low_id, high: self.user_high_id }
    }

    pub fn other(&self, user_id: &Uuid) -> Uuid {
        if self.user_low_id == *user_id { self.user_high_id } else { self.user_low_id }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct BlockEntity {
    pub blocker_id: Uuid,
    pub blocked_id: Uuid,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Relationship between the two users of a pair. Nothing outside these
/// variants is a valid stored state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum RelationshipState {
    None,
    Requested { from: Uuid, to: Uuid },
    Friends,
    BlockedBy { blocker: Uuid },
    MutualBlock,
}

/// Every row stored for one pair.
#[derive(Debug, Clone, Default)]
pub struct PairRecord {
    pub friendship: Option<FriendshipEntity>,
    pub requests: Vec<FriendRequestEntity>,
    pub blocks: Vec<BlockEntity>,
}

impl PairRecord {
    pub fn is_empty(&self) -> bool {
        self.friendship.is_none() && self.requests.is_empty() && self.blocks.is_empty()
    }

    pub fn state(&self, pair: &PairKey) -> Result<RelationshipState, error::SystemError> {
        match self.blocks.as_slice() {
            [] => {}
            blocks if self.friendship.is_some() || !self.requests.is_empty() => {
                return Err(error::SystemError::inconsistent(format!(
                    "pair {pair} has {} block(s) alongside a friendship or request",
                    blocks.len()
                )));
            }
            [block] => return Ok(RelationshipState::BlockedBy { blocker: block.blocker_id }),
            [first, second] if first.blocker_id != second.blocker_id => {
                return Ok(RelationshipState::MutualBlock);
            }
            _ => {
                return Err(error::SystemError::inconsistent(format!(
                    "pair {pair} has duplicate blocks"
                )));
            }
        }

        match (&self.friendship, self.requests.as_slice()) {
            (Some(_), []) => Ok(RelationshipState::Friends),
            (None, []) => Ok(RelationshipState::None),
            (None, [request]) => Ok(RelationshipState::Requested {
                from: request.from_user_id,
                to: request.to_user_id,
            }),
            _ => Err(error::SystemError::inconsistent(format!(
                "pair {pair} has {} pending request(s) with friendship={}",
                self.requests.len(),
                self.friendship.is_some()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(from: Uuid, to: Uuid) -> FriendRequestEntity {
        FriendRequestEntity {
            id: Uuid::now_v7(),
            from_user_id: from,
            to_user_id: to,
            message: None,
            created_at: chrono::Utc::now(),
        }
    }

    fn block(blocker: Uuid, blocked: Uuid) -> BlockEntity {
        BlockEntity { blocker_id: blocker, blocked_id: blocked, created_at: chrono::Utc::now() }
    }

    #[test]
    fn test_canonical_pair_key_is_symmetric() {
        let a = Uuid::from_u128(7);
        let b = Uuid::from_u128(3);
        assert_eq!(canonical_pair_key(a, b), canonical_pair_key(b, a));
        assert_eq!(canonical_pair_key(a, b).low, b);
        assert_eq!(canonical_pair_key(a, b).high, a);
    }

    #[test]
    fn test_ensure_members_rejects_foreign_user() {
        let pair = canonical_pair_key(Uuid::from_u128(1), Uuid::from_u128(2));
        assert!(pair.ensure_members(&Uuid::from_u128(2), &Uuid::from_u128(1)).is_ok());
        assert!(pair.ensure_members(&Uuid::from_u128(1), &Uuid::from_u128(3)).is_err());
    }

    #[test]
    fn test_state_derivation() {
        let (a, b) = (Uuid::from_u128(1), Uuid::from_u128(2));
        let pair = canonical_pair_key(a, b);

        let mut record = PairRecord::default();
        assert_eq!(record.state(&pair).unwrap(), RelationshipState::None);

        record.requests.push(request(b, a));
        assert_eq!(record.state(&pair).unwrap(), RelationshipState::Requested { from: b, to: a });

        record.requests.clear();
        record.blocks.push(block(a, b));
        assert_eq!(record.state(&pair).unwrap(), RelationshipState::BlockedBy { blocker: a });

        record.blocks.push(block(b, a));
        assert_eq!(record.state(&pair).unwrap(), RelationshipState::MutualBlock);
    }

    #[test]
    fn test_requests_in_both_directions_are_inconsistent() {
        let (a, b) = (Uuid::from_u128(1), Uuid::from_u128(2));
        let record =
            PairRecord { requests: vec![request(a, b), request(b, a)], ..Default::default() };
        assert!(matches!(
            record.state(&canonical_pair_key(a, b)),
            Err(error::SystemError::Inconsistent(_))
        ));
    }

    #[test]
    fn test_block_with_friendship_is_inconsistent() {
        let (a, b) = (Uuid::from_u128(1), Uuid::from_u128(2));
        let record = PairRecord {
            friendship: Some(FriendshipEntity {
                user_low_id: a,
                user_high_id: b,
                created_at: chrono::Utc::now(),
            }),
            blocks: vec![block(a, b)],
            ..Default::default()
        };
        assert!(record.state(&canonical_pair_key(a, b)).is_err());
    }
}
