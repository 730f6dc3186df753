use crate::modules::relationship::handle::*;
use actix_web::web::{scope, ServiceConfig};

pub fn configure(cfg: &mut ServiceConfig) {
    // `/{user_id}` last so the literal segments win.
    cfg.service(
        scope("/relationships")
            .service(send_friend_request)
            .service(accept_friend_request)
            .service(reject_friend_request)
            .service(cancel_friend_request)
            .service(remove_friend)
            .service(block_user)
            .service(unblock_user)
            .service(list_friends)
            .service(list_friend_requests)
            .service(list_blocked_users)
            .service(get_relationship),
    );
}
