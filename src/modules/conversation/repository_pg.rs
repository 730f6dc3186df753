use uuid::Uuid;

use crate::{
    api::error,
    modules::{
        conversation::{repository::DirectChannelProvisioner, schema::ConversationEntity},
        relationship::schema::canonical_pair_key,
    },
};

#[derive(Clone)]
pub struct ConversationRepositoryPg {
    pool: sqlx::PgPool,
}

impl ConversationRepositoryPg {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    async fn find_direct_between_users<'e, E>(
        &self,
        user_a: &Uuid,
        user_b: &Uuid,
        tx: E,
    ) -> Result<Option<ConversationEntity>, error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        let conversation = sqlx::query_as::<_, ConversationEntity>(
            r#"
            SELECT c.id
            FROM conversations c
            WHERE c.type = 'direct'
            AND EXISTS (
                SELECT 1
                FROM participants p1
                WHERE p1.conversation_id = c.id
                AND p1.user_id = $1
                AND p1.deleted_at IS NULL
            )
            AND EXISTS (
                SELECT 1
                FROM participants p2
                WHERE p2.conversation_id = c.id
                AND p2.user_id = $2
                AND p2.deleted_at IS NULL
            )
            LIMIT 1;
            "#,
        )
        .bind(user_a)
        .bind(user_b)
        .fetch_optional(tx)
        .await?;

        Ok(conversation)
    }
}

#[async_trait::async_trait]
impl DirectChannelProvisioner for ConversationRepositoryPg {
    async fn ensure_exists(
        &self,
        user_a: &Uuid,
        user_b: &Uuid,
    ) -> Result<Uuid, error::SystemError> {
        let pair = canonical_pair_key(*user_a, *user_b);
        let mut tx = self.pool.begin().await?;

        // Serialises concurrent provisioning for the same pair.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(format!("dm:{}", pair.lock_key()))
            .execute(&mut *tx)
            .await?;

        if let Some(existing) =
            self.find_direct_between_users(&pair.low, &pair.high, &mut *tx).await?
        {
            tx.commit().await?;
            return Ok(existing.id);
        }

        let conversation = sqlx::query_as::<_, ConversationEntity>(
            r#"
            INSERT INTO conversations (id, type)
            VALUES ($1, 'direct')
            RETURNING id
            "#,
        )
        .bind(Uuid::now_v7())
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO participants (conversation_id, user_id, unread_count)
            VALUES ($1, $2, 0), ($1, $3, 0)
            "#,
        )
        .bind(conversation.id)
        .bind(pair.low)
        .bind(pair.high)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        log::info!("Provisioned direct conversation {} for pair {}", conversation.id, pair);
        Ok(conversation.id)
    }
}
