//! Content store: the video catalog, per-video engagement and the upload
//! pipeline.
//!
//! Like/unlike are write-through (both remote writes are confirmed before
//! the local mutation) so a retried action cannot double-increment the
//! counter. Save/unsave are optimistic: the local flag flips immediately
//! and the remote write is fire-and-forget.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use lookym_gateway::rows::NewVideoRow;
use lookym_gateway::RemoteGateway;
use lookym_media::{
    content_type_for_path, MediaUpload, ResourceType, ThumbnailTransform, UploadRequest,
};
use lookym_shared::{Comment, Video};
use lookym_store::{keys, Database};

use crate::error::{Result, SyncError};
use crate::events::{EventBus, StoreEvent};
use crate::session::SessionManager;

const THUMBNAIL_WIDTH: u32 = 480;
const THUMBNAIL_HEIGHT: u32 = 854;
const THUMBNAIL_SEEK_SECONDS: f32 = 1.0;

/// Reactive content state handed to the presentation layer.
#[derive(Debug, Clone, Default)]
pub struct ContentState {
    /// The loaded catalog, newest first. Never persisted.
    pub videos: Vec<Video>,
    /// Video ids the current user has liked; absence means not liked.
    pub liked_videos: HashSet<Uuid>,
    /// Video ids the current user has saved for later.
    pub saved_videos: HashSet<Uuid>,
    pub is_loading: bool,
    pub error: Option<String>,
}

/// The persisted subset of [`ContentState`]: engagement flags survive a
/// catalog refresh, the catalog itself does not.
#[derive(Debug, Default, Serialize, Deserialize)]
struct EngagementSnapshot {
    liked_videos: HashSet<Uuid>,
    saved_videos: HashSet<Uuid>,
}

pub struct ContentStore {
    gateway: Arc<dyn RemoteGateway>,
    media: Arc<dyn MediaUpload>,
    session: Arc<SessionManager>,
    db: Arc<Database>,
    events: EventBus,
    state: Mutex<ContentState>,
}

impl ContentStore {
    pub fn new(
        gateway: Arc<dyn RemoteGateway>,
        media: Arc<dyn MediaUpload>,
        session: Arc<SessionManager>,
        db: Arc<Database>,
        events: EventBus,
    ) -> Self {
        let mut state = ContentState::default();
        match db.load_snapshot::<EngagementSnapshot>(keys::VIDEO_STORE) {
            Ok(Some(snapshot)) => {
                state.liked_videos = snapshot.liked_videos;
                state.saved_videos = snapshot.saved_videos;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, "discarding unreadable engagement snapshot");
            }
        }

        Self {
            gateway,
            media,
            session,
            db,
            events,
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ContentState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// A cheap clone of the current state.
    pub fn state(&self) -> ContentState {
        self.lock().clone()
    }

    pub fn is_liked(&self, video_id: Uuid) -> bool {
        self.lock().liked_videos.contains(&video_id)
    }

    pub fn is_saved(&self, video_id: Uuid) -> bool {
        self.lock().saved_videos.contains(&video_id)
    }

    fn begin(&self) {
        let mut state = self.lock();
        state.is_loading = true;
        state.error = None;
    }

    fn fail(&self, err: &SyncError) {
        let mut state = self.lock();
        state.is_loading = false;
        state.error = Some(err.to_string());
    }

    fn persist(&self) {
        let snapshot = {
            let state = self.lock();
            EngagementSnapshot {
                liked_videos: state.liked_videos.clone(),
                saved_videos: state.saved_videos.clone(),
            }
        };
        if let Err(e) = self.db.save_snapshot(keys::VIDEO_STORE, &snapshot) {
            tracing::warn!(error = %e, "failed to flush engagement snapshot");
        }
    }

    // -- Catalog ------------------------------------------------------------

    /// Load one page of the catalog. Page 1 replaces the loaded catalog;
    /// later pages append (infinite-scroll semantics). There is no
    /// de-duplication by id, so callers must not request overlapping
    /// pages.
    pub async fn fetch_videos(&self, page: u32, limit: u32) -> Result<Vec<Video>> {
        self.begin();
        let rows = match self.gateway.fetch_videos(page, limit).await {
            Ok(rows) => rows,
            Err(e) => {
                let err = SyncError::RemoteRead(e);
                self.fail(&err);
                return Err(err);
            }
        };

        let videos: Vec<Video> = rows.into_iter().map(|r| r.into_video()).collect();
        {
            let mut state = self.lock();
            if page <= 1 {
                state.videos = videos.clone();
            } else {
                state.videos.extend(videos.clone());
            }
            state.is_loading = false;
        }
        self.events.emit(StoreEvent::CatalogChanged);
        Ok(videos)
    }

    /// All videos uploaded by one account, newest first. Does not touch
    /// the feed catalog.
    pub async fn fetch_videos_by_user(&self, user_id: Uuid) -> Result<Vec<Video>> {
        self.begin();
        match self.gateway.fetch_videos_by_user(user_id).await {
            Ok(rows) => {
                self.lock().is_loading = false;
                Ok(rows.into_iter().map(|r| r.into_video()).collect())
            }
            Err(e) => {
                let err = SyncError::RemoteRead(e);
                self.fail(&err);
                Err(err)
            }
        }
    }

    /// One video by id. Refreshes the catalog entry in place when the
    /// video is already loaded.
    pub async fn fetch_video_by_id(&self, video_id: Uuid) -> Result<Option<Video>> {
        let row = self
            .gateway
            .fetch_video(video_id)
            .await
            .map_err(SyncError::RemoteRead)?;

        let video = row.map(|r| r.into_video());
        if let Some(video) = &video {
            let mut state = self.lock();
            if let Some(slot) = state.videos.iter_mut().find(|v| v.id == video.id) {
                *slot = video.clone();
            }
        }
        Ok(video)
    }

    // -- Engagement ---------------------------------------------------------

    /// Write-through like: the counter RPC and the edge insert are both
    /// confirmed before local state changes.
    pub async fn like_video(&self, video_id: Uuid) -> Result<()> {
        let user = self.session.require_user()?;
        self.begin();

        if let Err(err) = self.try_like(video_id, user.id).await {
            self.fail(&err);
            return Err(err);
        }

        {
            let mut state = self.lock();
            state.liked_videos.insert(video_id);
            if let Some(video) = state.videos.iter_mut().find(|v| v.id == video_id) {
                video.likes += 1;
            }
            state.is_loading = false;
        }
        self.persist();
        self.events.emit(StoreEvent::VideoUpdated { video_id });
        Ok(())
    }

    async fn try_like(&self, video_id: Uuid, user_id: Uuid) -> Result<()> {
        self.gateway
            .increment_likes(video_id)
            .await
            .map_err(SyncError::RemoteWrite)?;
        self.gateway
            .insert_like(video_id, user_id)
            .await
            .map_err(SyncError::RemoteWrite)?;
        Ok(())
    }

    /// Write-through unlike. The local counter never goes below zero.
    pub async fn unlike_video(&self, video_id: Uuid) -> Result<()> {
        let user = self.session.require_user()?;
        self.begin();

        if let Err(err) = self.try_unlike(video_id, user.id).await {
            self.fail(&err);
            return Err(err);
        }

        {
            let mut state = self.lock();
            state.liked_videos.remove(&video_id);
            if let Some(video) = state.videos.iter_mut().find(|v| v.id == video_id) {
                video.likes = video.likes.saturating_sub(1);
            }
            state.is_loading = false;
        }
        self.persist();
        self.events.emit(StoreEvent::VideoUpdated { video_id });
        Ok(())
    }

    async fn try_unlike(&self, video_id: Uuid, user_id: Uuid) -> Result<()> {
        self.gateway
            .decrement_likes(video_id)
            .await
            .map_err(SyncError::RemoteWrite)?;
        self.gateway
            .delete_like(video_id, user_id)
            .await
            .map_err(SyncError::RemoteWrite)?;
        Ok(())
    }

    /// Optimistic save: the flag flips immediately, the remote write is
    /// fire-and-forget. A remote failure is logged, never rolled back --
    /// the edge write is idempotent and low-stakes.
    pub fn save_video(&self, video_id: Uuid) -> Result<()> {
        let user = self.session.require_user()?;

        self.lock().saved_videos.insert(video_id);
        self.persist();

        let gateway = Arc::clone(&self.gateway);
        tokio::spawn(async move {
            if let Err(e) = gateway.insert_save(video_id, user.id).await {
                tracing::warn!(video = %video_id, error = %e, "save flag not persisted remotely");
            }
        });
        Ok(())
    }

    /// Optimistic unsave; mirror of [`Self::save_video`].
    pub fn unsave_video(&self, video_id: Uuid) -> Result<()> {
        let user = self.session.require_user()?;

        self.lock().saved_videos.remove(&video_id);
        self.persist();

        let gateway = Arc::clone(&self.gateway);
        tokio::spawn(async move {
            if let Err(e) = gateway.delete_save(video_id, user.id).await {
                tracing::warn!(video = %video_id, error = %e, "unsave not persisted remotely");
            }
        });
        Ok(())
    }

    /// Replace the engagement flags with the remote edge tables. Called
    /// after login so flags match the signed-in user.
    pub async fn hydrate_engagement(&self) -> Result<()> {
        let user = self.session.require_user()?;

        let liked = self
            .gateway
            .fetch_liked_video_ids(user.id)
            .await
            .map_err(SyncError::RemoteRead)?;
        let saved = self
            .gateway
            .fetch_saved_video_ids(user.id)
            .await
            .map_err(SyncError::RemoteRead)?;

        {
            let mut state = self.lock();
            state.liked_videos = liked.into_iter().collect();
            state.saved_videos = saved.into_iter().collect();
        }
        self.persist();
        Ok(())
    }

    // -- Comments -----------------------------------------------------------

    /// Insert a comment and append the returned row (with its author
    /// snapshot joined) to the video's comment list.
    pub async fn add_comment(&self, video_id: Uuid, text: &str) -> Result<Comment> {
        let user = self.session.require_user()?;
        if text.trim().is_empty() {
            return Err(SyncError::InvalidInput("empty comment".to_string()));
        }
        self.begin();

        let row = match self.gateway.insert_comment(video_id, user.id, text).await {
            Ok(row) => row,
            Err(e) => {
                let err = SyncError::RemoteWrite(e);
                self.fail(&err);
                return Err(err);
            }
        };

        let comment = row.into_comment();
        {
            let mut state = self.lock();
            if let Some(video) = state.videos.iter_mut().find(|v| v.id == video_id) {
                video.comments.push(comment.clone());
            }
            state.is_loading = false;
        }
        self.events.emit(StoreEvent::VideoUpdated { video_id });
        Ok(comment)
    }

    // -- Upload -------------------------------------------------------------

    /// Upload pipeline, gated to business accounts: transcode/host the
    /// binary, derive the thumbnail URL, persist the metadata row, prepend
    /// the new video to the catalog.
    ///
    /// A partial failure (upload succeeded, metadata write failed) leaves
    /// an orphaned remote asset; cleanup is out of scope here.
    pub async fn upload_video(
        &self,
        local_uri: &str,
        caption: &str,
        hashtags: Vec<String>,
        product_tags: Vec<String>,
    ) -> Result<Video> {
        let user = self.session.require_user()?;
        if !user.role.is_business() {
            return Err(SyncError::RoleNotAuthorized {
                required: "business",
            });
        }
        self.begin();

        match self
            .try_upload(user.id, local_uri, caption, hashtags, product_tags)
            .await
        {
            Ok(video) => {
                {
                    let mut state = self.lock();
                    state.videos.insert(0, video.clone());
                    state.is_loading = false;
                }
                self.events.emit(StoreEvent::CatalogChanged);
                Ok(video)
            }
            Err(err) => {
                self.fail(&err);
                Err(err)
            }
        }
    }

    async fn try_upload(
        &self,
        user_id: Uuid,
        local_uri: &str,
        caption: &str,
        hashtags: Vec<String>,
        product_tags: Vec<String>,
    ) -> Result<Video> {
        let asset = self
            .media
            .upload(
                local_uri,
                &UploadRequest {
                    resource_type: ResourceType::Video,
                    folder: format!("videos/{user_id}"),
                    public_id: None,
                },
            )
            .await?;

        let thumbnail_url = self.media.thumbnail_url(
            &asset.public_id,
            &ThumbnailTransform {
                width: Some(THUMBNAIL_WIDTH),
                height: Some(THUMBNAIL_HEIGHT),
                format: None,
                seek_seconds: THUMBNAIL_SEEK_SECONDS,
            },
        );

        let row = self
            .gateway
            .insert_video(&NewVideoRow {
                author_id: user_id,
                video_url: asset.secure_url,
                thumbnail_url,
                caption: caption.to_string(),
                hashtags,
                mime_type: content_type_for_path(local_uri),
                product_tags,
            })
            .await
            .map_err(SyncError::RemoteWrite)?;

        tracing::info!(video_id = %row.id, "video published");
        Ok(row.into_video())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use lookym_gateway::{MemoryGateway, RemoteGateway};
    use lookym_media::MemoryMedia;
    use lookym_shared::UserRole;

    struct Fixture {
        gateway: Arc<MemoryGateway>,
        media: Arc<MemoryMedia>,
        session: Arc<SessionManager>,
        store: ContentStore,
        db: Arc<Database>,
    }

    async fn fixture(role: UserRole) -> Fixture {
        let gateway = Arc::new(MemoryGateway::new());
        gateway.seed_account("acc@lookym.app", "pw", "acc", role);

        let db = Arc::new(Database::open_in_memory().unwrap());
        let events = EventBus::default();
        let session = Arc::new(SessionManager::new(
            gateway.clone(),
            db.clone(),
            events.clone(),
            "avatars",
        ));
        session.login("acc@lookym.app", "pw").await.unwrap();

        let media = Arc::new(MemoryMedia::new());
        let store = ContentStore::new(
            gateway.clone(),
            media.clone(),
            session.clone(),
            db.clone(),
            events,
        );
        Fixture {
            gateway,
            media,
            session,
            store,
            db,
        }
    }

    async fn seed_video(fx: &Fixture, caption: &str) -> Uuid {
        let author = fx.session.current_user().unwrap();
        fx.gateway
            .insert_video(&NewVideoRow {
                author_id: author.id,
                video_url: "https://cdn.example/v.mp4".to_string(),
                thumbnail_url: "https://cdn.example/t.jpg".to_string(),
                caption: caption.to_string(),
                hashtags: vec![],
                mime_type: None,
                product_tags: vec![],
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn like_round_trip_restores_counter() {
        let fx = fixture(UserRole::Business).await;
        let video_id = seed_video(&fx, "clip").await;
        fx.store.fetch_videos(1, 10).await.unwrap();

        fx.store.like_video(video_id).await.unwrap();
        let state = fx.store.state();
        assert!(state.liked_videos.contains(&video_id));
        assert_eq!(state.videos[0].likes, 1);
        assert_eq!(fx.gateway.likes_counter(video_id), Some(1));

        fx.store.unlike_video(video_id).await.unwrap();
        let state = fx.store.state();
        assert!(!state.liked_videos.contains(&video_id));
        assert_eq!(state.videos[0].likes, 0);
        assert_eq!(fx.gateway.likes_counter(video_id), Some(0));
    }

    #[tokio::test]
    async fn unlike_never_goes_negative() {
        let fx = fixture(UserRole::Business).await;
        let video_id = seed_video(&fx, "clip").await;
        fx.store.fetch_videos(1, 10).await.unwrap();

        fx.store.unlike_video(video_id).await.unwrap();
        fx.store.unlike_video(video_id).await.unwrap();

        assert_eq!(fx.store.state().videos[0].likes, 0);
        assert_eq!(fx.gateway.likes_counter(video_id), Some(0));
    }

    #[tokio::test]
    async fn failed_like_leaves_local_state_untouched() {
        let fx = fixture(UserRole::Business).await;
        let video_id = seed_video(&fx, "clip").await;
        fx.store.fetch_videos(1, 10).await.unwrap();

        fx.gateway.fail_next("increment_likes");
        let err = fx.store.like_video(video_id).await.unwrap_err();
        assert!(matches!(err, SyncError::RemoteWrite(_)));

        let state = fx.store.state();
        assert!(!state.liked_videos.contains(&video_id));
        assert_eq!(state.videos[0].likes, 0);
        assert!(state.error.is_some());
    }

    #[tokio::test]
    async fn page_one_replaces_later_pages_append() {
        let fx = fixture(UserRole::Business).await;
        for i in 0..3 {
            seed_video(&fx, &format!("clip-{i}")).await;
        }

        fx.store.fetch_videos(1, 2).await.unwrap();
        assert_eq!(fx.store.state().videos.len(), 2);

        // Refetching page 1 replaces rather than duplicates.
        fx.store.fetch_videos(1, 2).await.unwrap();
        assert_eq!(fx.store.state().videos.len(), 2);

        fx.store.fetch_videos(2, 2).await.unwrap();
        let state = fx.store.state();
        assert_eq!(state.videos.len(), 3);
        // Newest first, pages in order.
        assert_eq!(state.videos[0].caption, "clip-2");
        assert_eq!(state.videos[2].caption, "clip-0");
    }

    #[tokio::test]
    async fn save_is_optimistic_even_when_remote_fails() {
        let fx = fixture(UserRole::User).await;
        let video_id = Uuid::new_v4();

        fx.gateway.fail_next("insert_save");
        fx.store.save_video(video_id).unwrap();

        // The local flag flips immediately, before the remote write lands.
        assert!(fx.store.is_saved(video_id));

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        // The remote write failed and was swallowed; the flag stays.
        assert!(fx.store.is_saved(video_id));
        assert_eq!(fx.gateway.save_edge_count(), 0);
    }

    #[tokio::test]
    async fn save_reaches_remote_edge_table() {
        let fx = fixture(UserRole::User).await;
        let video_id = Uuid::new_v4();

        fx.store.save_video(video_id).unwrap();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(fx.gateway.save_edge_count(), 1);

        fx.store.unsave_video(video_id).unwrap();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(fx.gateway.save_edge_count(), 0);
        assert!(!fx.store.is_saved(video_id));
    }

    #[tokio::test]
    async fn engagement_survives_restart_via_snapshot() {
        let fx = fixture(UserRole::User).await;
        let video_id = Uuid::new_v4();
        fx.store.save_video(video_id).unwrap();

        let rehydrated = ContentStore::new(
            fx.gateway.clone(),
            Arc::new(MemoryMedia::new()),
            fx.session.clone(),
            fx.db.clone(),
            EventBus::default(),
        );
        assert!(rehydrated.is_saved(video_id));
        // The catalog is never persisted.
        assert!(rehydrated.state().videos.is_empty());
    }

    #[tokio::test]
    async fn add_comment_appends_in_order() {
        let fx = fixture(UserRole::Business).await;
        let video_id = seed_video(&fx, "clip").await;
        fx.store.fetch_videos(1, 10).await.unwrap();

        fx.store.add_comment(video_id, "first").await.unwrap();
        fx.store.add_comment(video_id, "second").await.unwrap();

        let state = fx.store.state();
        let texts: Vec<&str> = state.videos[0]
            .comments
            .iter()
            .map(|c| c.text.as_str())
            .collect();
        assert_eq!(texts, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn add_comment_failure_leaves_list_unchanged() {
        let fx = fixture(UserRole::Business).await;
        let video_id = seed_video(&fx, "clip").await;
        fx.store.fetch_videos(1, 10).await.unwrap();

        fx.gateway.fail_next("insert_comment");
        assert!(fx.store.add_comment(video_id, "nope").await.is_err());
        assert!(fx.store.state().videos[0].comments.is_empty());
    }

    #[tokio::test]
    async fn upload_requires_session() {
        let gateway = Arc::new(MemoryGateway::new());
        let db = Arc::new(Database::open_in_memory().unwrap());
        let events = EventBus::default();
        let session = Arc::new(SessionManager::new(
            gateway.clone(),
            db.clone(),
            events.clone(),
            "avatars",
        ));
        let store = ContentStore::new(
            gateway,
            Arc::new(MemoryMedia::new()),
            session,
            db,
            events,
        );

        let err = store
            .upload_video("/tmp/clip.mp4", "Hello", vec![], vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NotAuthenticated));
        assert!(store.state().videos.is_empty());
    }

    #[tokio::test]
    async fn upload_requires_business_role() {
        let fx = fixture(UserRole::User).await;
        let err = fx
            .store
            .upload_video("/tmp/clip.mp4", "Hello", vec![], vec![])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::RoleNotAuthorized {
                required: "business"
            }
        ));
        assert!(fx.store.state().videos.is_empty());
    }

    #[tokio::test]
    async fn upload_failure_propagates_for_missing_file() {
        let fx = fixture(UserRole::Business).await;
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.mp4");

        let err = fx
            .store
            .upload_video(&missing.display().to_string(), "Hello", vec![], vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Upload(_)));
        assert!(fx.store.state().videos.is_empty());
    }

    #[tokio::test]
    async fn upload_prepends_to_catalog() {
        let fx = fixture(UserRole::Business).await;
        seed_video(&fx, "older").await;
        fx.store.fetch_videos(1, 10).await.unwrap();

        let video = fx
            .store
            .upload_video(
                "data:video/mp4;base64,Y2xpcA==",
                "Hello",
                vec!["a".to_string(), "b".to_string()],
                vec![],
            )
            .await
            .unwrap();

        assert_eq!(video.caption, "Hello");
        assert_eq!(video.hashtags, vec!["a", "b"]);
        assert!(!video.video_url.is_empty());
        assert!(!video.thumbnail_url.is_empty());
        // The thumbnail is a frame extracted from the uploaded video.
        assert!(video.thumbnail_url.contains("so_1"));

        let state = fx.store.state();
        assert_eq!(state.videos.len(), 2);
        assert_eq!(state.videos[0].id, video.id);
        assert_eq!(state.videos[1].caption, "older");
        assert_eq!(fx.media.asset_count(), 1);
    }

    #[tokio::test]
    async fn metadata_failure_after_upload_leaves_catalog_unchanged() {
        let fx = fixture(UserRole::Business).await;

        fx.gateway.fail_next("insert_video");
        let err = fx
            .store
            .upload_video("data:video/mp4;base64,Y2xpcA==", "Hello", vec![], vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::RemoteWrite(_)));

        // The orphaned remote asset is accepted; the catalog is not.
        assert_eq!(fx.media.asset_count(), 1);
        assert!(fx.store.state().videos.is_empty());
    }

    #[tokio::test]
    async fn hydrate_engagement_pulls_remote_edges() {
        let fx = fixture(UserRole::User).await;
        let me = fx.session.current_user().unwrap().id;
        let video_id = Uuid::new_v4();
        fx.gateway.insert_like(video_id, me).await.unwrap();

        fx.store.hydrate_engagement().await.unwrap();
        assert!(fx.store.is_liked(video_id));
    }

    #[tokio::test]
    async fn fetch_video_by_id_refreshes_catalog_entry() {
        let fx = fixture(UserRole::Business).await;
        let video_id = seed_video(&fx, "clip").await;
        fx.store.fetch_videos(1, 10).await.unwrap();

        // Someone else likes the video behind our back.
        fx.gateway.increment_likes(video_id).await.unwrap();
        assert_eq!(fx.store.state().videos[0].likes, 0);

        let video = fx.store.fetch_video_by_id(video_id).await.unwrap().unwrap();
        assert_eq!(video.likes, 1);
        assert_eq!(fx.store.state().videos[0].likes, 1);
    }
}
