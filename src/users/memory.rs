use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::repo::{RepoError, RepoResult, UserRepository};
use super::repo_types::{ChannelProfile, NewUser, User, UserPatch, Video, WatchedVideo};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    /// (subscriber, channel)
    subscriptions: Vec<(Uuid, Uuid)>,
    videos: HashMap<Uuid, Video>,
    watch_history: HashMap<Uuid, Vec<Uuid>>,
}

impl Tables {
    fn taken(&self, except: Option<Uuid>, username: Option<&str>, email: Option<&str>) -> Option<&'static str> {
        self.users
            .values()
            .filter(|u| Some(u.id) != except)
            .find_map(|u| {
                if username == Some(u.username.as_str()) {
                    Some("username")
                } else if email == Some(u.email.as_str()) {
                    Some("email")
                } else {
                    None
                }
            })
    }
}

/// Process-local repository with the same uniqueness and join rules as the Postgres one.
#[derive(Default)]
pub struct MemoryUserRepo {
    tables: RwLock<Tables>,
}

impl MemoryUserRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, subscriber: Uuid, channel: Uuid) {
        let mut t = self.tables.write().await;
        if !t.subscriptions.contains(&(subscriber, channel)) {
            t.subscriptions.push((subscriber, channel));
        }
    }

    pub async fn insert_video(&self, video: Video) {
        self.tables.write().await.videos.insert(video.id, video);
    }

    pub async fn record_watch(&self, user_id: Uuid, video_id: Uuid) {
        self.tables
            .write()
            .await
            .watch_history
            .entry(user_id)
            .or_default()
            .push(video_id);
    }

    pub async fn delete_user(&self, id: Uuid) {
        let mut t = self.tables.write().await;
        t.users.remove(&id);
        t.subscriptions.retain(|(s, c)| *s != id && *c != id);
        t.watch_history.remove(&id);
        for video in t.videos.values_mut() {
            if video.owner_id == Some(id) {
                video.owner_id = None;
            }
        }
    }

    pub async fn delete_video(&self, id: Uuid) {
        self.tables.write().await.videos.remove(&id);
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepo {
    async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<User>> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn find_by_username_or_email(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> RepoResult<Option<User>> {
        let t = self.tables.read().await;
        Ok(t.users
            .values()
            .find(|u| username == Some(u.username.as_str()) || email == Some(u.email.as_str()))
            .cloned())
    }

    async fn create(&self, new: NewUser) -> RepoResult<User> {
        let mut t = self.tables.write().await;
        if let Some(field) = t.taken(None, Some(&new.username), Some(&new.email)) {
            return Err(RepoError::Duplicate(field));
        }
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::new_v4(),
            username: new.username,
            email: new.email,
            full_name: new.full_name,
            password_hash: new.password_hash,
            avatar_url: new.avatar_url,
            cover_image_url: new.cover_image_url,
            subscriber_count: 0,
            refresh_token: None,
            created_at: now,
            updated_at: now,
        };
        t.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update_fields(&self, id: Uuid, patch: UserPatch) -> RepoResult<Option<User>> {
        let mut t = self.tables.write().await;
        if let Some(field) = t.taken(Some(id), None, patch.email.as_deref()) {
            return Err(RepoError::Duplicate(field));
        }
        let Some(user) = t.users.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(v) = patch.full_name {
            user.full_name = v;
        }
        if let Some(v) = patch.email {
            user.email = v;
        }
        if let Some(v) = patch.avatar_url {
            user.avatar_url = v;
        }
        if let Some(v) = patch.cover_image_url {
            user.cover_image_url = Some(v);
        }
        if let Some(v) = patch.password_hash {
            user.password_hash = v;
        }
        user.updated_at = OffsetDateTime::now_utc();
        Ok(Some(user.clone()))
    }

    async fn set_refresh_token(&self, id: Uuid, token: Option<&str>) -> RepoResult<()> {
        if let Some(user) = self.tables.write().await.users.get_mut(&id) {
            user.refresh_token = token.map(str::to_string);
        }
        Ok(())
    }

    async fn rotate_refresh_token(
        &self,
        id: Uuid,
        presented: &str,
        next: &str,
    ) -> RepoResult<bool> {
        let mut t = self.tables.write().await;
        match t.users.get_mut(&id) {
            Some(user) if user.refresh_token.as_deref() == Some(presented) => {
                user.refresh_token = Some(next.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn channel_profile(
        &self,
        username: &str,
        viewer: Option<Uuid>,
    ) -> RepoResult<Option<ChannelProfile>> {
        let t = self.tables.read().await;
        let Some(user) = t.users.values().find(|u| u.username == username) else {
            return Ok(None);
        };
        let subscribers: Vec<Uuid> = t
            .subscriptions
            .iter()
            .filter(|(_, channel)| *channel == user.id)
            .map(|(subscriber, _)| *subscriber)
            .collect();
        let following = t
            .subscriptions
            .iter()
            .filter(|(subscriber, _)| *subscriber == user.id)
            .count();
        Ok(Some(ChannelProfile {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            full_name: user.full_name.clone(),
            avatar_url: user.avatar_url.clone(),
            cover_image_url: user.cover_image_url.clone(),
            subscriber_count: user.subscriber_count,
            subscribers_count: subscribers.len() as i64,
            channels_subscriptions: following as i64,
            is_current_user_subscribed: viewer.is_some_and(|v| subscribers.contains(&v)),
        }))
    }

    async fn watch_history(&self, user_id: Uuid) -> RepoResult<Option<Vec<WatchedVideo>>> {
        let t = self.tables.read().await;
        if !t.users.contains_key(&user_id) {
            return Ok(None);
        }
        let history = t
            .watch_history
            .get(&user_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| t.videos.get(id))
                    .map(|v| WatchedVideo::from_parts(v, v.owner_id.and_then(|o| t.users.get(&o))))
                    .collect()
            })
            .unwrap_or_default();
        Ok(Some(history))
    }
}
