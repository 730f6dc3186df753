use actix_web::{delete, get, post, put, web, HttpRequest};
use uuid::Uuid;

use crate::{
    api::{error, success},
    middlewares::get_extensions,
    modules::relationship::{
        model::{
            FriendRequestBody, FriendRequestResponse, FriendResponse, RelationshipResponse,
            Removal, RequestOutcome,
        },
        schema::{BlockEntity, FriendRequestEntity, FriendshipEntity},
        service::RelationshipService,
    },
    utils::{Claims, ValidatedJson},
};

#[post("/requests")]
pub async fn send_friend_request(
    relationship_service: web::Data<RelationshipService>,
    body: ValidatedJson<FriendRequestBody>,
    req: HttpRequest,
) -> Result<success::Success<RequestOutcome>, error::Error> {
    let sender_id = get_extensions::<Claims>(&req)?.sub;
    let FriendRequestBody { recipient_id, message } = body.0;

    let outcome =
        relationship_service.send_friend_request(sender_id, recipient_id, message).await?;

    let response = match outcome {
        RequestOutcome::Pending(_) => {
            success::Success::created(Some(outcome)).message("Friend request sent successfully")
        }
        RequestOutcome::Accepted(_) => {
            success::Success::ok(Some(outcome)).message("You are now friends")
        }
    };
    Ok(response)
}

#[post("/requests/{user_id}/accept")]
pub async fn accept_friend_request(
    relationship_service: web::Data<RelationshipService>,
    sender_id: web::Path<Uuid>,
    req: HttpRequest,
) -> Result<success::Success<FriendshipEntity>, error::Error> {
    let receiver_id = get_extensions::<Claims>(&req)?.sub;
    let friendship = relationship_service.accept_friend_request(receiver_id, *sender_id).await?;

    Ok(success::Success::ok(Some(friendship)).message("Friend request accepted successfully"))
}

#[post("/requests/{user_id}/reject")]
pub async fn reject_friend_request(
    relationship_service: web::Data<RelationshipService>,
    sender_id: web::Path<Uuid>,
    req: HttpRequest,
) -> Result<success::Success<FriendRequestEntity>, error::Error> {
    let receiver_id = get_extensions::<Claims>(&req)?.sub;
    let request = relationship_service.reject_friend_request(receiver_id, *sender_id).await?;

    Ok(success::Success::ok(Some(request)).message("Friend request rejected"))
}

#[delete("/requests/{user_id}")]
pub async fn cancel_friend_request(
    relationship_service: web::Data<RelationshipService>,
    receiver_id: web::Path<Uuid>,
    req: HttpRequest,
) -> Result<success::Success<FriendRequestEntity>, error::Error> {
    let sender_id = get_extensions::<Claims>(&req)?.sub;
    let request = relationship_service.cancel_friend_request(sender_id, *receiver_id).await?;

    Ok(success::Success::ok(Some(request)).message("Friend request cancelled"))
}

#[delete("/friends/{user_id}")]
pub async fn remove_friend(
    relationship_service: web::Data<RelationshipService>,
    friend_id: web::Path<Uuid>,
    req: HttpRequest,
) -> Result<success::Success<Removal>, error::Error> {
    let user_id = get_extensions::<Claims>(&req)?.sub;
    let removal = relationship_service.remove_friend(user_id, *friend_id).await?;

    let message = match removal {
        Removal::Friendship(_) => "Friend removed successfully",
        Removal::Request(_) => "Friend request cancelled",
    };
    Ok(success::Success::ok(Some(removal)).message(message))
}

#[put("/blocks/{user_id}")]
pub async fn block_user(
    relationship_service: web::Data<RelationshipService>,
    target_id: web::Path<Uuid>,
    req: HttpRequest,
) -> Result<success::Success<BlockEntity>, error::Error> {
    let blocker_id = get_extensions::<Claims>(&req)?.sub;
    let block = relationship_service.block_user(blocker_id, *target_id).await?;

    Ok(success::Success::ok(Some(block)).message("User blocked"))
}

#[delete("/blocks/{user_id}")]
pub async fn unblock_user(
    relationship_service: web::Data<RelationshipService>,
    target_id: web::Path<Uuid>,
    req: HttpRequest,
) -> Result<success::Success<BlockEntity>, error::Error> {
    let blocker_id = get_extensions::<Claims>(&req)?.sub;
    let block = relationship_service.unblock_user(blocker_id, *target_id).await?;

    Ok(success::Success::ok(Some(block)).message("User unblocked"))
}

#[get("/friends")]
pub async fn list_friends(
    relationship_service: web::Data<RelationshipService>,
    req: HttpRequest,
) -> Result<success::Success<Vec<FriendResponse>>, error::Error> {
    let user_id = get_extensions::<Claims>(&req)?.sub;
    let friends = relationship_service.get_friends(user_id).await?;

    Ok(success::Success::ok(Some(friends)).message("Friends retrieved successfully"))
}

#[get("/requests")]
pub async fn list_friend_requests(
    relationship_service: web::Data<RelationshipService>,
    req: HttpRequest,
) -> Result<success::Success<Vec<FriendRequestResponse>>, error::Error> {
    let user_id = get_extensions::<Claims>(&req)?.sub;
    let requests = relationship_service.get_friend_requests(user_id).await?;

    Ok(success::Success::ok(Some(requests)).message("Friend requests retrieved successfully"))
}

#[get("/blocks")]
pub async fn list_blocked_users(
    relationship_service: web::Data<RelationshipService>,
    req: HttpRequest,
) -> Result<success::Success<Vec<BlockEntity>>, error::Error> {
    let user_id = get_extensions::<Claims>(&req)?.sub;
    let blocks = relationship_service.get_blocked_users(user_id).await?;

    Ok(success::Success::ok(Some(blocks)).message("Blocked users retrieved successfully"))
}

#[get("/{user_id}")]
pub async fn get_relationship(
    relationship_service: web::Data<RelationshipService>,
    other_id: web::Path<Uuid>,
    req: HttpRequest,
) -> Result<success::Success<RelationshipResponse>, error::Error> {
    let user_id = get_extensions::<Claims>(&req)?.sub;
    let state = relationship_service.relationship(user_id, *other_id).await?;

    Ok(success::Success::ok(Some(RelationshipResponse { user_id: *other_id, state })))
}
