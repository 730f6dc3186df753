use uuid::Uuid;

use crate::api::error;

/// Direct-message channel provisioning owned by the messaging subsystem.
///
/// `ensure_exists` must be idempotent: calling it for a pair that already
/// shares a direct conversation returns that conversation's id.
#[async_trait::async_trait]
pub trait DirectChannelProvisioner: Send + Sync {
    async fn ensure_exists(&self, user_a: &Uuid, user_b: &Uuid)
    -> Result<Uuid, error::SystemError>;
}
