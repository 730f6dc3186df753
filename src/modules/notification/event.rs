//! Relationship Event Protocol
//!
//! Events pushed to every live session of one user. The `type` tag is the
//! event name consumed by clients, `payload` its body.
use serde::Serialize;
use uuid::Uuid;

use crate::modules::{
    relationship::{
        model::DeclineReason,
        schema::{FriendRequestEntity, FriendshipEntity},
    },
    user::schema::UserProfile,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendPayload {
    pub friendship: FriendshipEntity,
    /// The new friend, as seen by the recipient of the event.
    pub user: UserProfile,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum RelationshipEvent {
    /// Someone asked the recipient to be friends
    #[serde(rename = "friend.request.new")]
    RequestNew { request: FriendRequestEntity },

    /// A request involving the recipient turned into a friendship
    #[serde(rename = "friend.request.accepted")]
    RequestAccepted { friend: FriendPayload },

    /// A pending request involving the recipient is gone
    #[serde(rename = "friend.request.declined", rename_all = "camelCase")]
    RequestDeclined { request_id: Uuid, user_id: Uuid, reason: DeclineReason },

    /// The recipient is no longer friends with `user_id`
    #[serde(rename = "friend.removed", rename_all = "camelCase")]
    FriendRemoved { user_id: Uuid },
}

impl RelationshipEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            RelationshipEvent::RequestNew { .. } => "friend.request.new",
            RelationshipEvent::RequestAccepted { .. } => "friend.request.accepted",
            RelationshipEvent::RequestDeclined { .. } => "friend.request.declined",
            RelationshipEvent::FriendRemoved { .. } => "friend.removed",
        }
    }
}
