use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::repo_types::{ChannelProfile, NewUser, User, UserPatch, WatchedVideo, WatchedVideoRow};

#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    /// A unique column (`username` or `email`) already holds this value.
    #[error("duplicate {0}")]
    Duplicate(&'static str),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<sqlx::Error> for RepoError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e {
            if db.is_unique_violation() {
                let field = match db.constraint() {
                    Some(c) if c.contains("email") => "email",
                    _ => "username",
                };
                return RepoError::Duplicate(field);
            }
        }
        RepoError::Other(e.into())
    }
}

pub type RepoResult<T> = Result<T, RepoError>;

/// Persistence for users and the read-side joins over subscriptions and videos.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<User>>;

    /// Matches either column; `None` arguments never match.
    async fn find_by_username_or_email(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> RepoResult<Option<User>>;

    async fn create(&self, user: NewUser) -> RepoResult<User>;

    /// Returns `None` when the user does not exist.
    async fn update_fields(&self, id: Uuid, patch: UserPatch) -> RepoResult<Option<User>>;

    async fn set_refresh_token(&self, id: Uuid, token: Option<&str>) -> RepoResult<()>;

    /// Replaces the stored refresh token only if it still equals `presented`.
    async fn rotate_refresh_token(&self, id: Uuid, presented: &str, next: &str)
        -> RepoResult<bool>;

    async fn channel_profile(
        &self,
        username: &str,
        viewer: Option<Uuid>,
    ) -> RepoResult<Option<ChannelProfile>>;

    /// Videos in watch order, each with its owner. `None` when the user does not exist.
    async fn watch_history(&self, user_id: Uuid) -> RepoResult<Option<Vec<WatchedVideo>>>;
}

#[derive(Clone)]
pub struct PgUserRepository {
    db: PgPool,
}

impl PgUserRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, full_name, password_hash, avatar_url, cover_image_url,
                   subscriber_count, refresh_token, created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_username_or_email(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> RepoResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, full_name, password_hash, avatar_url, cover_image_url,
                   subscriber_count, refresh_token, created_at, updated_at
            FROM users
            WHERE username = $1 OR email = $2
            LIMIT 1
            "#,
        )
        .bind(username)
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn create(&self, user: NewUser) -> RepoResult<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, email, full_name, password_hash, avatar_url, cover_image_url)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, username, email, full_name, password_hash, avatar_url, cover_image_url,
                      subscriber_count, refresh_token, created_at, updated_at
            "#,
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.full_name)
        .bind(&user.password_hash)
        .bind(&user.avatar_url)
        .bind(&user.cover_image_url)
        .fetch_one(&self.db)
        .await?;
        Ok(user)
    }

    async fn update_fields(&self, id: Uuid, patch: UserPatch) -> RepoResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
               SET full_name       = COALESCE($2, full_name),
                   email           = COALESCE($3, email),
                   avatar_url      = COALESCE($4, avatar_url),
                   cover_image_url = COALESCE($5, cover_image_url),
                   password_hash   = COALESCE($6, password_hash),
                   updated_at      = now()
             WHERE id = $1
            RETURNING id, username, email, full_name, password_hash, avatar_url, cover_image_url,
                      subscriber_count, refresh_token, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(patch.full_name)
        .bind(patch.email)
        .bind(patch.avatar_url)
        .bind(patch.cover_image_url)
        .bind(patch.password_hash)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn set_refresh_token(&self, id: Uuid, token: Option<&str>) -> RepoResult<()> {
        sqlx::query("UPDATE users SET refresh_token = $2 WHERE id = $1")
            .bind(id)
            .bind(token)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn rotate_refresh_token(
        &self,
        id: Uuid,
        presented: &str,
        next: &str,
    ) -> RepoResult<bool> {
        let res = sqlx::query(
            "UPDATE users SET refresh_token = $3 WHERE id = $1 AND refresh_token = $2",
        )
        .bind(id)
        .bind(presented)
        .bind(next)
        .execute(&self.db)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn channel_profile(
        &self,
        username: &str,
        viewer: Option<Uuid>,
    ) -> RepoResult<Option<ChannelProfile>> {
        let profile = sqlx::query_as::<_, ChannelProfile>(
            r#"
            SELECT u.id, u.username, u.email, u.full_name, u.avatar_url, u.cover_image_url,
                   u.subscriber_count,
                   (SELECT COUNT(*) FROM subscriptions s WHERE s.channel_id = u.id)
                       AS subscribers_count,
                   (SELECT COUNT(*) FROM subscriptions s WHERE s.subscriber_id = u.id)
                       AS channels_subscriptions,
                   EXISTS (SELECT 1 FROM subscriptions s
                            WHERE s.channel_id = u.id AND s.subscriber_id = $2)
                       AS is_current_user_subscribed
            FROM users u
            WHERE u.username = $1
            "#,
        )
        .bind(username)
        .bind(viewer)
        .fetch_optional(&self.db)
        .await?;
        Ok(profile)
    }

    async fn watch_history(&self, user_id: Uuid) -> RepoResult<Option<Vec<WatchedVideo>>> {
        let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.db)
            .await?;
        if exists.is_none() {
            return Ok(None);
        }

        let rows = sqlx::query_as::<_, WatchedVideoRow>(
            r#"
            SELECT v.id, v.title, v.description, v.video_file, v.thumbnail, v.duration,
                   v.views, v.is_published, v.created_at,
                   o.id AS owner_id, o.full_name AS owner_full_name,
                   o.username AS owner_username, o.avatar_url AS owner_avatar
              FROM watch_history wh
              JOIN videos v ON v.id = wh.video_id
              LEFT JOIN users o ON o.id = v.owner_id
             WHERE wh.user_id = $1
             ORDER BY wh.position ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;
        Ok(Some(rows.into_iter().map(WatchedVideo::from).collect()))
    }
}
