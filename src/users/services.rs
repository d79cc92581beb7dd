use axum::extract::FromRef;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::dto::{
    ChangePasswordRequest, LoginRequest, PublicUser, RegisterForm, UpdateDetailsRequest,
};
use super::repo_types::{ChannelProfile, NewUser, User, UserPatch, WatchedVideo};
use crate::{
    auth::{
        claims::UserClaims,
        jwt::{TokenError, TokenIssuer, TokenPair},
        password::{hash_password, verify_password},
    },
    error::{AppError, AppResult},
    media::{self, MediaFolder, UploadItem},
    state::AppState,
};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn required(value: &str, field: &str) -> AppResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::bad_request(format!("{field} is required")));
    }
    Ok(value.to_string())
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

fn claims_of(user: &User) -> UserClaims<'_> {
    UserClaims {
        id: user.id,
        email: &user.email,
        username: &user.username,
        full_name: &user.full_name,
    }
}

pub async fn register(st: &AppState, form: RegisterForm) -> AppResult<PublicUser> {
    let username = normalize(&required(&form.username, "username")?);
    let email = normalize(&required(&form.email, "email")?);
    let full_name = required(&form.full_name, "fullname")?;
    if form.password.trim().is_empty() {
        return Err(AppError::bad_request("password is required"));
    }
    if !is_valid_email(&email) {
        warn!(%email, "invalid email");
        return Err(AppError::bad_request("Invalid email"));
    }

    if st
        .users
        .find_by_username_or_email(Some(username.as_str()), Some(email.as_str()))
        .await?
        .is_some()
    {
        warn!(%username, %email, "username or email already registered");
        return Err(AppError::conflict(
            "User with email or username already exists",
        ));
    }

    let avatar_file = form
        .avatar
        .ok_or_else(|| AppError::bad_request("Avatar file is required"))?;
    let avatar = media::upload(st.storage.as_ref(), MediaFolder::Avatars, avatar_file)
        .await
        .ok_or_else(|| AppError::bad_request("Avatar file is required"))?;
    let cover = match form.cover_image {
        Some(file) => media::upload(st.storage.as_ref(), MediaFolder::Covers, file).await,
        None => None,
    };

    let password_hash = hash_password(&form.password)?;
    let created = st
        .users
        .create(NewUser {
            username,
            email,
            full_name,
            password_hash,
            avatar_url: avatar.url.clone(),
            cover_image_url: cover.as_ref().map(|c| c.url.clone()),
        })
        .await;

    let user = match created {
        Ok(user) => user,
        Err(e) => {
            media::delete(st.storage.as_ref(), &avatar.url).await;
            if let Some(cover) = &cover {
                media::delete(st.storage.as_ref(), &cover.url).await;
            }
            return Err(e.into());
        }
    };

    info!(user_id = %user.id, username = %user.username, "user registered");
    Ok(PublicUser::from(user))
}

/// Signs a fresh pair and stores its refresh token, replacing any previous session.
async fn start_session(st: &AppState, user: &User) -> AppResult<TokenPair> {
    let pair = TokenIssuer::from_ref(st)
        .issue_pair(&claims_of(user))
        .map_err(|e| {
            error!(error = %e, user_id = %user.id, "token generation failed");
            AppError::from(e)
        })?;
    st.users
        .set_refresh_token(user.id, Some(&pair.refresh_token))
        .await?;
    Ok(pair)
}

pub async fn login(st: &AppState, req: LoginRequest) -> AppResult<(PublicUser, TokenPair)> {
    let username = req.username.as_deref().map(normalize).filter(|s| !s.is_empty());
    let email = req.email.as_deref().map(normalize).filter(|s| !s.is_empty());
    if username.is_none() && email.is_none() {
        return Err(AppError::bad_request("username or email is required"));
    }
    if req.password.is_empty() {
        return Err(AppError::bad_request("password is required"));
    }

    let user = st
        .users
        .find_by_username_or_email(username.as_deref(), email.as_deref())
        .await?
        .ok_or_else(|| {
            warn!(?username, ?email, "login for unknown account");
            AppError::not_found("User does not exist")
        })?;

    if !verify_password(&req.password, &user.password_hash)? {
        warn!(user_id = %user.id, "login invalid password");
        return Err(AppError::unauthorized("Invalid user credentials"));
    }

    let pair = start_session(st, &user).await?;
    info!(user_id = %user.id, "user logged in");
    Ok((PublicUser::from(user), pair))
}

pub async fn logout(st: &AppState, user_id: Uuid) -> AppResult<()> {
    st.users.set_refresh_token(user_id, None).await?;
    info!(%user_id, "user logged out");
    Ok(())
}

pub async fn refresh_session(st: &AppState, presented: Option<String>) -> AppResult<TokenPair> {
    let presented = presented
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| AppError::unauthorized("Unauthorized request"))?;

    let issuer = TokenIssuer::from_ref(st);
    let claims = issuer.verify_refresh(&presented).map_err(|e| {
        warn!(error = %e, "refresh token rejected");
        match e {
            TokenError::Expired => AppError::unauthorized("Refresh token expired"),
            _ => AppError::unauthorized("Invalid refresh token"),
        }
    })?;

    let user = st
        .users
        .find_by_id(claims.sub)
        .await?
        .ok_or_else(|| AppError::unauthorized("Invalid refresh token"))?;

    if user.refresh_token.as_deref() != Some(presented.as_str()) {
        warn!(user_id = %user.id, "refresh token reuse or stale session");
        return Err(AppError::unauthorized("Refresh token is expired or used"));
    }

    let pair = issuer.issue_pair(&claims_of(&user))?;
    if !st
        .users
        .rotate_refresh_token(user.id, &presented, &pair.refresh_token)
        .await?
    {
        warn!(user_id = %user.id, "refresh token rotated concurrently");
        return Err(AppError::unauthorized("Refresh token is expired or used"));
    }

    info!(user_id = %user.id, "session refreshed");
    Ok(pair)
}

pub async fn change_password(
    st: &AppState,
    user_id: Uuid,
    req: ChangePasswordRequest,
) -> AppResult<()> {
    if req.new_password.trim().is_empty() {
        return Err(AppError::bad_request("newPassword is required"));
    }
    let user = st
        .users
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;

    if !verify_password(&req.old_password, &user.password_hash)? {
        warn!(%user_id, "change password with wrong old password");
        return Err(AppError::bad_request("Invalid old password"));
    }

    let patch = UserPatch {
        password_hash: Some(hash_password(&req.new_password)?),
        ..UserPatch::default()
    };
    st.users.update_fields(user_id, patch).await?;
    info!(%user_id, "password changed");
    Ok(())
}

pub async fn update_details(
    st: &AppState,
    user_id: Uuid,
    req: UpdateDetailsRequest,
) -> AppResult<PublicUser> {
    let (full_name, email) = match (req.full_name.trim(), normalize(&req.email)) {
        (name, email) if !name.is_empty() && !email.is_empty() => (name.to_string(), email),
        _ => return Err(AppError::bad_request("All fields are required")),
    };
    if !is_valid_email(&email) {
        return Err(AppError::bad_request("Invalid email"));
    }

    let patch = UserPatch {
        full_name: Some(full_name),
        email: Some(email),
        ..UserPatch::default()
    };
    let user = st
        .users
        .update_fields(user_id, patch)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;
    info!(%user_id, "account details updated");
    Ok(PublicUser::from(user))
}

/// Which profile image a replacement targets.
#[derive(Debug, Clone, Copy)]
pub enum ImageSlot {
    Avatar,
    Cover,
}

impl ImageSlot {
    fn label(self) -> &'static str {
        match self {
            ImageSlot::Avatar => "Avatar",
            ImageSlot::Cover => "Cover image",
        }
    }

    fn folder(self) -> MediaFolder {
        match self {
            ImageSlot::Avatar => MediaFolder::Avatars,
            ImageSlot::Cover => MediaFolder::Covers,
        }
    }

    fn current(self, user: &User) -> Option<&str> {
        match self {
            ImageSlot::Avatar => Some(user.avatar_url.as_str()),
            ImageSlot::Cover => user.cover_image_url.as_deref(),
        }
    }

    fn patch(self, url: String) -> UserPatch {
        match self {
            ImageSlot::Avatar => UserPatch {
                avatar_url: Some(url),
                ..UserPatch::default()
            },
            ImageSlot::Cover => UserPatch {
                cover_image_url: Some(url),
                ..UserPatch::default()
            },
        }
    }
}

/// Uploads the new image, points the user at it, then drops the old object.
pub async fn replace_image(
    st: &AppState,
    user: &User,
    slot: ImageSlot,
    file: Option<UploadItem>,
) -> AppResult<PublicUser> {
    let file = file.ok_or_else(|| AppError::bad_request(format!("{} file is missing", slot.label())))?;
    let uploaded = media::upload(st.storage.as_ref(), slot.folder(), file)
        .await
        .ok_or_else(|| {
            AppError::bad_request(format!("Error while uploading {}", slot.label().to_lowercase()))
        })?;

    let previous = slot.current(user).map(str::to_string);
    let updated = st
        .users
        .update_fields(user.id, slot.patch(uploaded.url.clone()))
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;

    if let Some(old) = previous.filter(|old| *old != uploaded.url) {
        media::delete(st.storage.as_ref(), &old).await;
    }
    info!(user_id = %user.id, slot = ?slot, "profile image replaced");
    Ok(PublicUser::from(updated))
}

pub async fn channel_profile(
    st: &AppState,
    username: &str,
    viewer: Uuid,
) -> AppResult<ChannelProfile> {
    let username = normalize(username);
    if username.is_empty() {
        return Err(AppError::bad_request("username is missing"));
    }
    st.users
        .channel_profile(&username, Some(viewer))
        .await?
        .ok_or_else(|| AppError::not_found("Channel does not exist"))
}

pub async fn watch_history(st: &AppState, user_id: Uuid) -> AppResult<Vec<WatchedVideo>> {
    st.users
        .watch_history(user_id)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;
    use time::OffsetDateTime;

    use super::*;
    use crate::storage::{MemoryStorage, StorageClient};
    use crate::users::{memory::MemoryUserRepo, repo::UserRepository, repo_types::Video};

    struct Harness {
        st: AppState,
        repo: Arc<MemoryUserRepo>,
        storage: Arc<MemoryStorage>,
    }

    fn harness() -> Harness {
        let repo = Arc::new(MemoryUserRepo::new());
        let storage = Arc::new(MemoryStorage::new());
        let st = AppState::from_parts(
            Arc::new(crate::state::fake_config()),
            repo.clone(),
            storage.clone(),
        );
        Harness { st, repo, storage }
    }

    async fn registered(h: &Harness, username: &str, email: &str) -> PublicUser {
        register(&h.st, register_form(username, email, "secret1"))
            .await
            .expect("register")
    }

    #[tokio::test]
    async fn register_normalizes_and_sanitizes() {
        let h = harness();
        let user = register(&h.st, register_form("  Alice ", "ALICE@X.com", "secret1"))
            .await
            .unwrap();
        assert_eq!(user.username, "alice");
        assert_eq!(user.email, "alice@x.com");
        assert_eq!(user.full_name, "Alice A");
        assert_eq!(user.subscribers, 0);
        assert!(user.cover_image.is_none());
        assert_eq!(h.storage.len().await, 1);

        let stored = h.repo.find_by_id(user.id).await.unwrap().unwrap();
        assert_ne!(stored.password_hash, "secret1");
        assert!(verify_password("secret1", &stored.password_hash).unwrap());
        assert!(stored.refresh_token.is_none());
    }

    #[tokio::test]
    async fn register_duplicate_any_casing_conflicts() {
        let h = harness();
        registered(&h, "alice", "alice@x.com").await;

        let err = register(&h.st, register_form("ALICE", "other@x.com", "pw"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let err = register(&h.st, register_form("bob", "Alice@X.COM", "pw"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn register_requires_text_fields_and_avatar() {
        let h = harness();
        let mut form = register_form("alice", "alice@x.com", "secret1");
        form.full_name = "   ".into();
        assert!(matches!(register(&h.st, form).await, Err(AppError::BadRequest(_))));

        let mut form = register_form("alice", "alice@x.com", "secret1");
        form.avatar = None;
        assert!(matches!(register(&h.st, form).await, Err(AppError::BadRequest(_))));

        let form = register_form("alice", "not-an-email", "secret1");
        assert!(matches!(register(&h.st, form).await, Err(AppError::BadRequest(_))));
        assert_eq!(h.storage.len().await, 0);
    }

    #[tokio::test]
    async fn register_fails_when_avatar_upload_fails() {
        let h = harness();
        h.storage.fail_uploads(true);
        let err = register(&h.st, register_form("alice", "alice@x.com", "secret1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
        assert!(h
            .repo
            .find_by_username_or_email(Some("alice"), None)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn register_with_cover_uploads_both() {
        let h = harness();
        let mut form = register_form("alice", "alice@x.com", "secret1");
        form.cover_image = Some(png());
        let user = register(&h.st, form).await.unwrap();
        assert!(user.cover_image.is_some());
        assert_eq!(h.storage.len().await, 2);
    }

    #[tokio::test]
    async fn login_by_username_or_email() {
        let h = harness();
        registered(&h, "alice", "alice@x.com").await;

        let (user, pair) = login(&h.st, login_req(Some("Alice"), None, "secret1")).await.unwrap();
        assert_eq!(user.username, "alice");
        let stored = h.repo.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(stored.refresh_token.as_deref(), Some(pair.refresh_token.as_str()));

        let (by_email, _) = login(&h.st, login_req(None, Some("alice@x.com"), "secret1"))
            .await
            .unwrap();
        assert_eq!(by_email.id, user.id);
    }

    #[tokio::test]
    async fn login_failures() {
        let h = harness();
        registered(&h, "alice", "alice@x.com").await;

        let err = login(&h.st, login_req(None, None, "secret1")).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
        let err = login(&h.st, login_req(Some("bob"), None, "secret1")).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        let err = login(&h.st, login_req(Some("alice"), None, "wrong")).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn second_login_invalidates_first_refresh_token() {
        let h = harness();
        registered(&h, "alice", "alice@x.com").await;
        let (_, first) = login(&h.st, login_req(Some("alice"), None, "secret1")).await.unwrap();
        let (_, second) = login(&h.st, login_req(Some("alice"), None, "secret1")).await.unwrap();

        let err = refresh_session(&h.st, Some(first.refresh_token)).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
        assert!(refresh_session(&h.st, Some(second.refresh_token)).await.is_ok());
    }

    #[tokio::test]
    async fn refresh_rotates_exactly_once() {
        let h = harness();
        registered(&h, "alice", "alice@x.com").await;
        let (user, pair) = login(&h.st, login_req(Some("alice"), None, "secret1")).await.unwrap();

        let rotated = refresh_session(&h.st, Some(pair.refresh_token.clone())).await.unwrap();
        assert_ne!(rotated.refresh_token, pair.refresh_token);
        let stored = h.repo.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(stored.refresh_token.as_deref(), Some(rotated.refresh_token.as_str()));

        let replay = refresh_session(&h.st, Some(pair.refresh_token)).await.unwrap_err();
        assert!(matches!(replay, AppError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn refresh_after_logout_is_unauthorized() {
        let h = harness();
        registered(&h, "alice", "alice@x.com").await;
        let (user, pair) = login(&h.st, login_req(Some("alice"), None, "secret1")).await.unwrap();

        logout(&h.st, user.id).await.unwrap();
        let stored = h.repo.find_by_id(user.id).await.unwrap().unwrap();
        assert!(stored.refresh_token.is_none());

        let err = refresh_session(&h.st, Some(pair.refresh_token)).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn refresh_rejects_missing_and_access_tokens() {
        let h = harness();
        registered(&h, "alice", "alice@x.com").await;
        let (_, pair) = login(&h.st, login_req(Some("alice"), None, "secret1")).await.unwrap();

        assert!(matches!(
            refresh_session(&h.st, None).await,
            Err(AppError::Unauthorized(_))
        ));
        assert!(matches!(
            refresh_session(&h.st, Some(" ".into())).await,
            Err(AppError::Unauthorized(_))
        ));
        assert!(matches!(
            refresh_session(&h.st, Some(pair.access_token)).await,
            Err(AppError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn change_password_checks_old_password() {
        let h = harness();
        let user = registered(&h, "alice", "alice@x.com").await;
        let before = h.repo.find_by_id(user.id).await.unwrap().unwrap().password_hash;

        let err = change_password(&h.st, user.id, change_req("wrong", "secret2"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
        let unchanged = h.repo.find_by_id(user.id).await.unwrap().unwrap().password_hash;
        assert_eq!(before, unchanged);

        change_password(&h.st, user.id, change_req("secret1", "secret2"))
            .await
            .unwrap();
        assert!(login(&h.st, login_req(Some("alice"), None, "secret1")).await.is_err());
        assert!(login(&h.st, login_req(Some("alice"), None, "secret2")).await.is_ok());
    }

    #[tokio::test]
    async fn update_details_validates_and_detects_conflicts() {
        let h = harness();
        let alice = registered(&h, "alice", "alice@x.com").await;
        registered(&h, "bob", "bob@x.com").await;

        let err = update_details(&h.st, alice.id, details_req("", "a@x.com")).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        let err = update_details(&h.st, alice.id, details_req("Alice", "BOB@x.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let updated = update_details(&h.st, alice.id, details_req(" Alice B ", "New@X.com"))
            .await
            .unwrap();
        assert_eq!(updated.full_name, "Alice B");
        assert_eq!(updated.email, "new@x.com");
    }

    #[tokio::test]
    async fn avatar_replacement_deletes_previous_object() {
        let h = harness();
        let alice = registered(&h, "alice", "alice@x.com").await;
        let old_key = h.storage.key_from_url(&alice.avatar).unwrap();
        let user = h.repo.find_by_id(alice.id).await.unwrap().unwrap();

        let updated = replace_image(&h.st, &user, ImageSlot::Avatar, Some(png())).await.unwrap();
        assert_ne!(updated.avatar, alice.avatar);
        assert!(!h.storage.contains(&old_key).await);
        assert_eq!(h.storage.len().await, 1);
    }

    #[tokio::test]
    async fn cover_replacement_deletes_previous_object() {
        let h = harness();
        let alice = registered(&h, "alice", "alice@x.com").await;
        let user = h.repo.find_by_id(alice.id).await.unwrap().unwrap();
        let first = replace_image(&h.st, &user, ImageSlot::Cover, Some(png())).await.unwrap();
        let first_url = first.cover_image.clone().unwrap();

        let user = h.repo.find_by_id(alice.id).await.unwrap().unwrap();
        let second = replace_image(&h.st, &user, ImageSlot::Cover, Some(png())).await.unwrap();
        assert_ne!(second.cover_image.as_deref(), Some(first_url.as_str()));
        let first_key = h.storage.key_from_url(&first_url).unwrap();
        assert!(!h.storage.contains(&first_key).await);
    }

    #[tokio::test]
    async fn image_replacement_survives_delete_failure() {
        let h = harness();
        let alice = registered(&h, "alice", "alice@x.com").await;
        let user = h.repo.find_by_id(alice.id).await.unwrap().unwrap();
        h.storage.fail_deletes(true);

        let updated = replace_image(&h.st, &user, ImageSlot::Avatar, Some(png())).await.unwrap();
        assert_ne!(updated.avatar, alice.avatar);
        assert_eq!(h.storage.len().await, 2);
    }

    #[tokio::test]
    async fn image_replacement_rejects_missing_or_failed_upload() {
        let h = harness();
        let alice = registered(&h, "alice", "alice@x.com").await;
        let user = h.repo.find_by_id(alice.id).await.unwrap().unwrap();

        let err = replace_image(&h.st, &user, ImageSlot::Avatar, None).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        h.storage.fail_uploads(true);
        let err = replace_image(&h.st, &user, ImageSlot::Cover, Some(png())).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
        let stored = h.repo.find_by_id(alice.id).await.unwrap().unwrap();
        assert_eq!(stored.avatar_url, alice.avatar);
        assert!(stored.cover_image_url.is_none());
    }

    #[tokio::test]
    async fn channel_profile_counts_edges() {
        let h = harness();
        let alice = registered(&h, "alice", "alice@x.com").await;
        let bob = registered(&h, "bob", "bob@x.com").await;
        let carol = registered(&h, "carol", "carol@x.com").await;
        let dave = registered(&h, "dave", "dave@x.com").await;

        for fan in [bob.id, carol.id, dave.id] {
            h.repo.subscribe(fan, alice.id).await;
        }
        h.repo.subscribe(alice.id, bob.id).await;
        h.repo.subscribe(alice.id, carol.id).await;

        let profile = channel_profile(&h.st, "ALICE", bob.id).await.unwrap();
        assert_eq!(profile.subscribers_count, 3);
        assert_eq!(profile.channels_subscriptions, 2);
        assert!(profile.is_current_user_subscribed);

        let profile = channel_profile(&h.st, "bob", dave.id).await.unwrap();
        assert_eq!(profile.subscribers_count, 1);
        assert_eq!(profile.channels_subscriptions, 1);
        assert!(!profile.is_current_user_subscribed);

        let err = channel_profile(&h.st, "nobody", alice.id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        let err = channel_profile(&h.st, "  ", alice.id).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    fn video(owner: Option<Uuid>, title: &str) -> Video {
        Video {
            id: Uuid::new_v4(),
            owner_id: owner,
            title: title.into(),
            description: String::new(),
            video_file: format!("https://media.test/{title}.mp4"),
            thumbnail: format!("https://media.test/{title}.jpg"),
            duration: 12.5,
            views: 3,
            is_published: true,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[tokio::test]
    async fn watch_history_resolves_owners_in_order() {
        let h = harness();
        let alice = registered(&h, "alice", "alice@x.com").await;
        let bob = registered(&h, "bob", "bob@x.com").await;
        let carol = registered(&h, "carol", "carol@x.com").await;

        let first = video(Some(bob.id), "first");
        let second = video(Some(carol.id), "second");
        let gone = video(Some(bob.id), "gone");
        for v in [&first, &second, &gone] {
            h.repo.insert_video(v.clone()).await;
        }
        h.repo.record_watch(alice.id, second.id).await;
        h.repo.record_watch(alice.id, gone.id).await;
        h.repo.record_watch(alice.id, first.id).await;
        h.repo.delete_video(gone.id).await;
        h.repo.delete_user(carol.id).await;

        let history = watch_history(&h.st, alice.id).await.unwrap();
        let titles: Vec<_> = history.iter().map(|v| v.title.as_str()).collect();
        assert_eq!(titles, ["second", "first"]);
        assert!(history[0].owner.is_none());
        let owner = history[1].owner.as_ref().unwrap();
        assert_eq!(owner.username, "bob");
        assert_eq!(owner.avatar, bob.avatar);

        let json = serde_json::to_value(&history[1]).unwrap();
        assert!(json["owner"].is_object());
        assert!(json["owner"].get("email").is_none());

        assert!(watch_history(&h.st, bob.id).await.unwrap().is_empty());
        assert!(matches!(
            watch_history(&h.st, Uuid::new_v4()).await,
            Err(AppError::NotFound(_))
        ));
    }

    fn png() -> UploadItem {
        UploadItem {
            body: Bytes::from_static(b"\x89PNG\r\n"),
            content_type: "image/png".into(),
        }
    }

    fn register_form(username: &str, email: &str, password: &str) -> RegisterForm {
        RegisterForm {
            username: username.into(),
            email: email.into(),
            full_name: "Alice A".into(),
            password: password.into(),
            avatar: Some(png()),
            cover_image: None,
        }
    }

    fn login_req(username: Option<&str>, email: Option<&str>, password: &str) -> LoginRequest {
        LoginRequest {
            username: username.map(Into::into),
            email: email.map(Into::into),
            password: password.into(),
        }
    }

    fn change_req(old: &str, new: &str) -> ChangePasswordRequest {
        ChangePasswordRequest {
            old_password: old.into(),
            new_password: new.into(),
        }
    }

    fn details_req(full_name: &str, email: &str) -> UpdateDetailsRequest {
        UpdateDetailsRequest {
            full_name: full_name.into(),
            email: email.into(),
        }
    }
}
