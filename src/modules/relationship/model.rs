use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::modules::{
    relationship::schema::{BlockEntity, FriendRequestEntity, FriendshipEntity, RelationshipState},
    user::schema::UserProfile,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FriendResponse {
    pub id: Uuid,
    pub username: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub status: Option<String>,
    pub since: chrono::DateTime<chrono::Utc>,
}

impl FriendResponse {
    pub fn new(profile: UserProfile, friendship: &FriendshipEntity) -> Self {
        FriendResponse {
            id: profile.id,
            username: profile.username,
            display_name: profile.display_name,
            avatar_url: profile.avatar_url,
            status: profile.status,
            since: friendship.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum IdOrInfo {
    Id(Uuid),
    Info(UserProfile),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FriendRequestResponse {
    pub id: Uuid,
    pub from: IdOrInfo,
    pub to: IdOrInfo,
    pub message: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

pub const MAX_REQUEST_MESSAGE_LEN: usize = 200;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct FriendRequestBody {
    pub recipient_id: Uuid,
    #[validate(length(max = 200, message = "Message must be at most 200 characters long"))]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipResponse {
    pub user_id: Uuid,
    #[serde(flatten)]
    pub state: RelationshipState,
}

/// Which intent produced a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum IntentKind {
    SendRequest,
    AcceptRequest,
    RejectRequest,
    CancelRequest,
    RemoveFriend,
    Block,
    Unblock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeclineReason {
    Rejected,
    Cancelled,
}

/// A committed row change.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    RequestCreated(FriendRequestEntity),
    RequestAccepted { request: FriendRequestEntity, friendship: FriendshipEntity },
    RequestRemoved { request: FriendRequestEntity, reason: DeclineReason },
    FriendshipRemoved(FriendshipEntity),
    BlockCreated(BlockEntity),
    BlockRemoved(BlockEntity),
}

/// Outcome of one intent, handed to the fanout only after it is durable.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub actor: Uuid,
    pub counterpart: Uuid,
    pub intent: IntentKind,
    pub before: RelationshipState,
    pub after: RelationshipState,
    pub effects: Vec<Effect>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "data", rename_all = "camelCase")]
pub enum RequestOutcome {
    /// A new request is waiting on the recipient.
    Pending(FriendRequestEntity),
    /// The recipient had already asked; both requests resolved into a friendship.
    Accepted(FriendshipEntity),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "camelCase")]
pub enum Removal {
    Friendship(FriendshipEntity),
    Request(FriendRequestEntity),
}
