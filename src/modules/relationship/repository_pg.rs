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

#[derive(Clone)]
pub struct RelationshipRepositoryPg {
    pool: sqlx::PgPool,
}

impl RelationshipRepositoryPg {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

async fn load_record(
    conn: &mut sqlx::PgConnection,
    pair: &PairKey,
) -> Result<PairRecord, error::SystemError> {
    let friendship = sqlx::query_as::<_, FriendshipEntity>(
        "SELECT * FROM friendships WHERE user_low_id = $1 AND user_high_id = $2",
    )
    .bind(pair.low)
    .bind(pair.high)
    .fetch_optional(&mut *conn)
    .await?;

    let requests = sqlx::query_as::<_, FriendRequestEntity>(
        r#"
        SELECT *
        FROM friend_requests
        WHERE
            (from_user_id = $1 AND to_user_id = $2)
        OR (from_user_id = $2 AND to_user_id = $1)
        "#,
    )
    .bind(pair.low)
    .bind(pair.high)
    .fetch_all(&mut *conn)
    .await?;

    let blocks = sqlx::query_as::<_, BlockEntity>(
        r#"
        SELECT *
        FROM user_blocks
        WHERE
            (blocker_id = $1 AND blocked_id = $2)
        OR (blocker_id = $2 AND blocked_id = $1)
        "#,
    )
    .bind(pair.low)
    .bind(pair.high)
    .fetch_all(&mut *conn)
    .await?;

    Ok(PairRecord { friendship, requests, blocks })
}

#[async_trait::async_trait]
impl RelationshipStore for RelationshipRepositoryPg {
    async fn begin(
        &self,
        user_id_a: &Uuid,
        user_id_b: &Uuid,
    ) -> Result<Box<dyn PairTransaction>, error::SystemError> {
        let pair = canonical_pair_key(*user_id_a, *user_id_b);
        let mut tx = self.pool.begin().await?;

        // Released automatically on commit or rollback.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(pair.lock_key())
            .execute(&mut *tx)
            .await?;

        Ok(Box::new(PgPairTransaction { pair, tx }))
    }

    async fn find_friendship(
        &self,
        user_id_a: &Uuid,
        user_id_b: &Uuid,
    ) -> Result<Option<FriendshipEntity>, error::SystemError> {
        let pair = canonical_pair_key(*user_id_a, *user_id_b);

        let friendship = sqlx::query_as::<_, FriendshipEntity>(
            "SELECT * FROM friendships WHERE user_low_id = $1 AND user_high_id = $2",
        )
        .bind(pair.low)
        .bind(pair.high)
        .fetch_optional(&self.pool)
        .await?;

        Ok(friendship)
    }

    async fn is_blocked(
        &self,
        user_id_a: &Uuid,
        user_id_b: &Uuid,
    ) -> Result<bool, error::SystemError> {
        let blocked = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1
                FROM user_blocks
                WHERE
                    (blocker_id = $1 AND blocked_id = $2)
                OR (blocker_id = $2 AND blocked_id = $1)
            )
            "#,
        )
        .bind(user_id_a)
        .bind(user_id_b)
        .fetch_one(&self.pool)
        .await?;

        Ok(blocked)
    }

    async fn relationship_state(
        &self,
        user_id_a: &Uuid,
        user_id_b: &Uuid,
    ) -> Result<RelationshipState, error::SystemError> {
        let pair = canonical_pair_key(*user_id_a, *user_id_b);
        let mut conn = self.pool.acquire().await?;
        load_record(&mut conn, &pair).await?.state(&pair)
    }

    async fn list_friendships(
        &self,
        user_id: &Uuid,
    ) -> Result<Vec<FriendshipEntity>, error::SystemError> {
        let friendships = sqlx::query_as::<_, FriendshipEntity>(
            r#"
            SELECT *
            FROM friendships
            WHERE user_low_id = $1
               OR user_high_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(friendships)
    }

    async fn list_requests(
        &self,
        user_id: &Uuid,
    ) -> Result<Vec<FriendRequestEntity>, error::SystemError> {
        let requests = sqlx::query_as::<_, FriendRequestEntity>(
            r#"
            SELECT *
            FROM friend_requests
            WHERE from_user_id = $1
               OR to_user_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(requests)
    }

    async fn list_blocks(&self, user_id: &Uuid) -> Result<Vec<BlockEntity>, error::SystemError> {
        let blocks = sqlx::query_as::<_, BlockEntity>(
            "SELECT * FROM user_blocks WHERE blocker_id = $1 ORDER BY created_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(blocks)
    }
}

pub struct PgPairTransaction {
    pair: PairKey,
    tx: sqlx::Transaction<'static, sqlx::Postgres>,
}

#[async_trait::async_trait]
impl PairTransaction for PgPairTransaction {
    fn pair(&self) -> PairKey {
        self.pair
    }

    async fn state(&mut self) -> Result<RelationshipState, error::SystemError> {
        load_record(&mut self.tx, &self.pair).await?.state(&self.pair)
    }

    async fn find_friendship(
        &mut self,
        user_id_a: &Uuid,
        user_id_b: &Uuid,
    ) -> Result<Option<FriendshipEntity>, error::SystemError> {
        self.pair.ensure_members(user_id_a, user_id_b)?;

        let friendship = sqlx::query_as::<_, FriendshipEntity>(
            "SELECT * FROM friendships WHERE user_low_id = $1 AND user_high_id = $2",
        )
        .bind(self.pair.low)
        .bind(self.pair.high)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(friendship)
    }

    async fn find_request(
        &mut self,
        sender_id: &Uuid,
        receiver_id: &Uuid,
    ) -> Result<Option<FriendRequestEntity>, error::SystemError> {
        self.pair.ensure_members(sender_id, receiver_id)?;

        let request = sqlx::query_as::<_, FriendRequestEntity>(
            "SELECT * FROM friend_requests WHERE from_user_id = $1 AND to_user_id = $2",
        )
        .bind(sender_id)
        .bind(receiver_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(request)
    }

    async fn find_block(
        &mut self,
        blocker_id: &Uuid,
        blocked_id: &Uuid,
    ) -> Result<Option<BlockEntity>, error::SystemError> {
        self.pair.ensure_members(blocker_id, blocked_id)?;

        let block = sqlx::query_as::<_, BlockEntity>(
            "SELECT * FROM user_blocks WHERE blocker_id = $1 AND blocked_id = $2",
        )
        .bind(blocker_id)
        .bind(blocked_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(block)
    }

    async fn create_friendship(
        &mut self,
        user_id_a: &Uuid,
        user_id_b: &Uuid,
    ) -> Result<FriendshipEntity, error::SystemError> {
        self.pair.ensure_members(user_id_a, user_id_b)?;

        // A duplicate surfaces as 23505 and maps to SystemError::Conflict.
        let friendship = sqlx::query_as::<_, FriendshipEntity>(
            r#"
            INSERT INTO friendships (user_low_id, user_high_id)
            VALUES ($1, $2)
            RETURNING *
            "#,
        )
        .bind(self.pair.low)
        .bind(self.pair.high)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(friendship)
    }

    async fn delete_friendship(
        &mut self,
        user_id_a: &Uuid,
        user_id_b: &Uuid,
    ) -> Result<bool, error::SystemError> {
        self.pair.ensure_members(user_id_a, user_id_b)?;

        let result =
            sqlx::query("DELETE FROM friendships WHERE user_low_id = $1 AND user_high_id = $2")
                .bind(self.pair.low)
                .bind(self.pair.high)
                .execute(&mut *self.tx)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn create_request(
        &mut self,
        sender_id: &Uuid,
        receiver_id: &Uuid,
        message: &Option<String>,
    ) -> Result<FriendRequestEntity, error::SystemError> {
        self.pair.ensure_members(sender_id, receiver_id)?;

        let request = sqlx::query_as::<_, FriendRequestEntity>(
            r#"
            INSERT INTO friend_requests (id, from_user_id, to_user_id, message)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(sender_id)
        .bind(receiver_id)
        .bind(message)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(request)
    }

    async fn delete_request(
        &mut self,
        sender_id: &Uuid,
        receiver_id: &Uuid,
    ) -> Result<bool, error::SystemError> {
        self.pair.ensure_members(sender_id, receiver_id)?;

        let result =
            sqlx::query("DELETE FROM friend_requests WHERE from_user_id = $1 AND to_user_id = $2")
                .bind(sender_id)
                .bind(receiver_id)
                .execute(&mut *self.tx)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn create_block(
        &mut self,
        blocker_id: &Uuid,
        blocked_id: &Uuid,
    ) -> Result<BlockEntity, error::SystemError> {
        self.pair.ensure_members(blocker_id, blocked_id)?;

        sqlx::query(
            r#"
            INSERT INTO user_blocks (blocker_id, blocked_id)
            VALUES ($1, $2)
            ON CONFLICT (blocker_id, blocked_id) DO NOTHING
            "#,
        )
        .bind(blocker_id)
        .bind(blocked_id)
        .execute(&mut *self.tx)
        .await?;

        let block = sqlx::query_as::<_, BlockEntity>(
            "SELECT * FROM user_blocks WHERE blocker_id = $1 AND blocked_id = $2",
        )
        .bind(blocker_id)
        .bind(blocked_id)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(block)
    }

    async fn delete_block(
        &mut self,
        blocker_id: &Uuid,
        blocked_id: &Uuid,
    ) -> Result<bool, error::SystemError> {
        self.pair.ensure_members(blocker_id, blocked_id)?;

        let result =
            sqlx::query("DELETE FROM user_blocks WHERE blocker_id = $1 AND blocked_id = $2")
                .bind(blocker_id)
                .bind(blocked_id)
                .execute(&mut *self.tx)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn commit(self: Box<Self>) -> Result<(), error::SystemError> {
        self.tx.commit().await?;
        Ok(())
    }
}
