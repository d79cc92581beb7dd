use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// User record in the database. Never serialized directly; see `PublicUser`.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub password_hash: String,
    pub avatar_url: String,
    pub cover_image_url: Option<String>,
    pub subscriber_count: i64,
    pub refresh_token: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Insert payload. `username` and `email` arrive already normalized.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub password_hash: String,
    pub avatar_url: String,
    pub cover_image_url: Option<String>,
}

/// Columns to overwrite; `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
    pub cover_image_url: Option<String>,
    pub password_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ChannelProfile {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub full_name: String,
    #[serde(rename = "avatar")]
    pub avatar_url: String,
    #[serde(rename = "coverImage")]
    pub cover_image_url: Option<String>,
    /// Stored counter on the user row.
    #[serde(rename = "subscribers")]
    pub subscriber_count: i64,
    /// Edges where this user is the channel.
    pub subscribers_count: i64,
    /// Edges where this user is the subscriber.
    pub channels_subscriptions: i64,
    pub is_current_user_subscribed: bool,
}

/// Video record owned by the video catalogue; read here only for watch history.
#[derive(Debug, Clone)]
pub struct Video {
    pub id: Uuid,
    pub owner_id: Option<Uuid>,
    pub title: String,
    pub description: String,
    pub video_file: String,
    pub thumbnail: String,
    pub duration: f64,
    pub views: i64,
    pub is_published: bool,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VideoOwner {
    pub id: Uuid,
    pub full_name: String,
    pub username: String,
    pub avatar: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchedVideo {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub video_file: String,
    pub thumbnail: String,
    pub duration: f64,
    pub views: i64,
    pub is_published: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub owner: Option<VideoOwner>,
}

/// Flat row of the watch-history join; the owner columns are null when the owner is gone.
#[derive(Debug, FromRow)]
pub struct WatchedVideoRow {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub video_file: String,
    pub thumbnail: String,
    pub duration: f64,
    pub views: i64,
    pub is_published: bool,
    pub created_at: OffsetDateTime,
    pub owner_id: Option<Uuid>,
    pub owner_full_name: Option<String>,
    pub owner_username: Option<String>,
    pub owner_avatar: Option<String>,
}

impl From<WatchedVideoRow> for WatchedVideo {
    fn from(r: WatchedVideoRow) -> Self {
        let owner = match (r.owner_id, r.owner_full_name, r.owner_username, r.owner_avatar) {
            (Some(id), Some(full_name), Some(username), Some(avatar)) => Some(VideoOwner {
                id,
                full_name,
                username,
                avatar,
            }),
            _ => None,
        };
        Self {
            id: r.id,
            title: r.title,
            description: r.description,
            video_file: r.video_file,
            thumbnail: r.thumbnail,
            duration: r.duration,
            views: r.views,
            is_published: r.is_published,
            created_at: r.created_at,
            owner,
        }
    }
}

impl WatchedVideo {
    pub fn from_parts(video: &Video, owner: Option<&User>) -> Self {
        Self {
            id: video.id,
            title: video.title.clone(),
            description: video.description.clone(),
            video_file: video.video_file.clone(),
            thumbnail: video.thumbnail.clone(),
            duration: video.duration,
            views: video.views,
            is_published: video.is_published,
            created_at: video.created_at,
            owner: owner.map(|u| VideoOwner {
                id: u.id,
                full_name: u.full_name.clone(),
                username: u.username.clone(),
                avatar: u.avatar_url.clone(),
            }),
        }
    }
}
