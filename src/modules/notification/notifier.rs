use deadpool_redis::redis::AsyncCommands;
use uuid::Uuid;

use crate::{api::error, modules::notification::event::RelationshipEvent};

const USER_CHANNEL_PREFIX: &str = "user:";
const USER_CHANNEL_SUFFIX: &str = ":events";

/// Pushes an event to every live session of a user.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(
        &self,
        user_id: &Uuid,
        event: &RelationshipEvent,
    ) -> Result<(), error::SystemError>;
}

pub fn user_channel(user_id: &Uuid) -> String {
    format!("{USER_CHANNEL_PREFIX}{user_id}{USER_CHANNEL_SUFFIX}")
}

/// Publishes events on the user's Redis channel; the realtime gateway
/// subscribed to it forwards them to each connected device.
#[derive(Clone)]
pub struct RedisNotifier {
    pool: deadpool_redis::Pool,
}

impl RedisNotifier {
    pub fn new(pool: deadpool_redis::Pool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl Notifier for RedisNotifier {
    async fn deliver(
        &self,
        user_id: &Uuid,
        event: &RelationshipEvent,
    ) -> Result<(), error::SystemError> {
        let mut conn = self.pool.get().await?;
        let payload = serde_json::to_string(event)?;

        let receivers: i64 = conn.publish(user_channel(user_id), payload).await?;

        log::debug!(
            "Published {} to user {} ({} subscriber(s))",
            event.event_type(),
            user_id,
            receivers
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_channel_name() {
        let id = Uuid::from_u128(42);
        assert_eq!(user_channel(&id), format!("user:{id}:events"));
    }
}
