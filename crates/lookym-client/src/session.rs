//! Session manager: identity, authentication lifecycle and profile
//! mutation.
//!
//! State machine: `UNINITIALIZED -> (checking) -> {AUTHENTICATED |
//! ANONYMOUS}`. `is_initialized` becomes true on the first transition out
//! of `UNINITIALIZED` and stays true for the rest of the process lifetime;
//! `is_authenticated` always equals `current_user.is_some()`.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use lookym_gateway::rows::ProfilePatch;
use lookym_gateway::{GatewayError, RemoteGateway, UploadOptions};
use lookym_media::{is_local_uri, load_local_uri};
use lookym_shared::{User, UserRole};
use lookym_store::{keys, Database};

use crate::error::{Result, SyncError};
use crate::events::{EventBus, StoreEvent};

/// Reactive session state handed to the presentation layer.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub current_user: Option<User>,
    pub is_authenticated: bool,
    pub is_loading: bool,
    pub is_initialized: bool,
    pub error: Option<String>,
}

/// The persisted subset of [`SessionState`].
#[derive(Debug, Serialize, Deserialize)]
struct SessionSnapshot {
    current_user: Option<User>,
    is_authenticated: bool,
}

/// A partial profile mutation. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub bio: Option<String>,
    /// Either an already-hosted URL or a device-local URI; local URIs are
    /// uploaded to object storage first.
    pub avatar: Option<String>,
}

pub struct SessionManager {
    gateway: Arc<dyn RemoteGateway>,
    db: Arc<Database>,
    events: EventBus,
    avatar_bucket: String,
    state: Mutex<SessionState>,
}

impl SessionManager {
    /// Build the manager and rehydrate the persisted session snapshot if
    /// one exists (first run has none).
    pub fn new(
        gateway: Arc<dyn RemoteGateway>,
        db: Arc<Database>,
        events: EventBus,
        avatar_bucket: impl Into<String>,
    ) -> Self {
        let mut state = SessionState::default();
        match db.load_snapshot::<SessionSnapshot>(keys::AUTH_STORAGE) {
            Ok(Some(snapshot)) => {
                state.is_authenticated = snapshot.current_user.is_some();
                state.current_user = snapshot.current_user;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, "discarding unreadable session snapshot");
            }
        }

        Self {
            gateway,
            db,
            events,
            avatar_bucket: avatar_bucket.into(),
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// A cheap clone of the current state.
    pub fn state(&self) -> SessionState {
        self.lock().clone()
    }

    pub fn current_user(&self) -> Option<User> {
        self.lock().current_user.clone()
    }

    /// The signed-in user, or [`SyncError::NotAuthenticated`].
    pub fn require_user(&self) -> Result<User> {
        self.current_user().ok_or(SyncError::NotAuthenticated)
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
            SessionSnapshot {
                current_user: state.current_user.clone(),
                is_authenticated: state.is_authenticated,
            }
        };
        if let Err(e) = self.db.save_snapshot(keys::AUTH_STORAGE, &snapshot) {
            tracing::warn!(error = %e, "failed to flush session snapshot");
        }
    }

    fn apply_user(&self, user: User) {
        let user_id = user.id;
        {
            let mut state = self.lock();
            state.current_user = Some(user);
            state.is_authenticated = true;
            state.is_initialized = true;
            state.is_loading = false;
            state.error = None;
        }
        self.persist();
        self.events.emit(StoreEvent::SessionChanged {
            user_id: Some(user_id),
        });
    }

    fn apply_anonymous(&self) {
        {
            let mut state = self.lock();
            state.current_user = None;
            state.is_authenticated = false;
            state.is_initialized = true;
            state.is_loading = false;
        }
        self.events.emit(StoreEvent::SessionChanged { user_id: None });
    }

    /// Authenticate and load the profile row.
    ///
    /// Invalid credentials surface as [`SyncError::AuthFailed`]; a missing
    /// profile row after successful authentication surfaces as
    /// [`SyncError::ProfileInconsistency`], since it indicates a
    /// provisioning defect rather than a user error. On any failure the
    /// current user is cleared and initialization is forced.
    pub async fn login(&self, email: &str, password: &str) -> Result<User> {
        self.begin();
        match self.try_login(email, password).await {
            Ok(user) => {
                tracing::info!(user_id = %user.id, "logged in");
                self.apply_user(user.clone());
                Ok(user)
            }
            Err(err) => {
                tracing::warn!(error = %err, "login failed");
                {
                    let mut state = self.lock();
                    state.current_user = None;
                    state.is_authenticated = false;
                    state.is_initialized = true;
                    state.is_loading = false;
                    state.error = Some(err.to_string());
                }
                self.events.emit(StoreEvent::SessionChanged { user_id: None });
                Err(err)
            }
        }
    }

    async fn try_login(&self, email: &str, password: &str) -> Result<User> {
        let session = self
            .gateway
            .sign_in(email, password)
            .await
            .map_err(auth_error)?;

        let row = self
            .gateway
            .fetch_profile(session.user_id)
            .await
            .map_err(SyncError::RemoteRead)?
            .ok_or(SyncError::ProfileInconsistency(session.user_id))?;

        Ok(row.into_user())
    }

    /// Create the identity. Does NOT authenticate: the caller must tell
    /// the user to confirm via email before logging in.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        username: &str,
        role: UserRole,
    ) -> Result<Uuid> {
        self.begin();
        let result = self
            .gateway
            .sign_up(email, password, username, role)
            .await
            .map_err(auth_error);

        match result {
            Ok(user_id) => {
                tracing::info!(%user_id, %username, "registered, awaiting email confirmation");
                self.lock().is_loading = false;
                Ok(user_id)
            }
            Err(err) => {
                self.fail(&err);
                Err(err)
            }
        }
    }

    /// Sign out. The remote call is best-effort: local state and the
    /// persisted snapshot are always cleared, even when the backend is
    /// unreachable.
    pub async fn logout(&self) {
        if let Err(e) = self.gateway.sign_out().await {
            tracing::warn!(error = %e, "remote sign-out failed, clearing local session anyway");
        }
        if let Err(e) = self.db.delete_snapshot(keys::AUTH_STORAGE) {
            tracing::warn!(error = %e, "failed to clear persisted session");
        }

        {
            let mut state = self.lock();
            state.error = None;
            state.is_loading = false;
        }
        self.apply_anonymous();
        tracing::info!("logged out");
    }

    /// Persist only the changed profile columns and merge the result.
    ///
    /// A device-local avatar URI is uploaded to object storage first and
    /// replaced with its public URL. Failures propagate without mutating
    /// `current_user`.
    pub async fn update_profile(&self, update: ProfileUpdate) -> Result<User> {
        let user = self.require_user()?;
        self.begin();

        match self.try_update_profile(user, update).await {
            Ok(user) => {
                self.apply_user(user.clone());
                Ok(user)
            }
            Err(err) => {
                self.fail(&err);
                Err(err)
            }
        }
    }

    async fn try_update_profile(&self, user: User, update: ProfileUpdate) -> Result<User> {
        let avatar_url = match update.avatar {
            Some(avatar) if is_local_uri(&avatar) => {
                Some(self.upload_avatar(user.id, &avatar).await?)
            }
            other => other,
        };

        let patch = ProfilePatch {
            display_name: update.display_name,
            bio: update.bio,
            avatar_url,
        };
        if patch.is_empty() {
            return Ok(user);
        }

        let row = self
            .gateway
            .update_profile(user.id, &patch)
            .await
            .map_err(SyncError::RemoteWrite)?;
        Ok(row.into_user())
    }

    async fn upload_avatar(&self, user_id: Uuid, local_uri: &str) -> Result<String> {
        let (bytes, content_type) = load_local_uri(local_uri).await?;
        let extension = match content_type.as_deref() {
            Some("image/png") => "png",
            Some("image/jpeg") => "jpg",
            Some("image/webp") => "webp",
            _ => "bin",
        };
        let path = format!("{user_id}/avatar-{}.{extension}", Uuid::new_v4());

        let opts = UploadOptions {
            content_type,
            cache_control: Some("3600".to_string()),
            upsert: true,
        };
        let stored = self
            .gateway
            .upload_object(&self.avatar_bucket, &path, bytes, &opts)
            .await
            .map_err(SyncError::RemoteWrite)?;

        Ok(self.gateway.public_url(&self.avatar_bucket, &stored))
    }

    /// Restore the session from an active remote one, if any.
    ///
    /// Idempotent: after the first resolution (success, failure, or "no
    /// session") the manager is initialized and later calls return the
    /// current state without touching the backend. A profile
    /// inconsistency during restore triggers a full [`Self::logout`] so the
    /// process never sits in a half-authenticated state.
    pub async fn check_session(&self) -> Result<Option<User>> {
        if self.lock().is_initialized {
            return Ok(self.current_user());
        }
        self.begin();

        let session = match self.gateway.current_session().await {
            Ok(session) => session,
            Err(e) => {
                let err = SyncError::RemoteRead(e);
                {
                    let mut state = self.lock();
                    state.is_loading = false;
                    state.is_initialized = true;
                    state.error = Some(err.to_string());
                }
                return Err(err);
            }
        };

        let Some(session) = session else {
            self.apply_anonymous();
            tracing::debug!("no active session");
            return Ok(None);
        };

        match self.gateway.fetch_profile(session.user_id).await {
            Ok(Some(row)) => {
                let user = row.into_user();
                tracing::info!(user_id = %user.id, "session restored");
                self.apply_user(user.clone());
                Ok(Some(user))
            }
            Ok(None) => {
                tracing::error!(user_id = %session.user_id, "session has no profile row, forcing logout");
                self.logout().await;
                Err(SyncError::ProfileInconsistency(session.user_id))
            }
            Err(e) => {
                tracing::error!(error = %e, "profile fetch failed during restore, forcing logout");
                self.logout().await;
                Err(SyncError::RemoteRead(e))
            }
        }
    }
}

fn auth_error(err: GatewayError) -> SyncError {
    match err {
        GatewayError::AuthFailed(message) => SyncError::AuthFailed(message),
        GatewayError::Conflict(message) => SyncError::AuthFailed(message),
        other => SyncError::RemoteRead(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lookym_gateway::MemoryGateway;

    fn manager_with(gateway: Arc<MemoryGateway>) -> SessionManager {
        let db = Arc::new(Database::open_in_memory().unwrap());
        SessionManager::new(gateway, db, EventBus::default(), "avatars")
    }

    fn seeded() -> (Arc<MemoryGateway>, SessionManager, Uuid) {
        let gateway = Arc::new(MemoryGateway::new());
        let user_id = gateway.seed_account("lea@lookym.app", "secret", "lea", UserRole::User);
        let manager = manager_with(gateway.clone());
        (gateway, manager, user_id)
    }

    #[tokio::test]
    async fn login_sets_authenticated_state() {
        let (_, manager, user_id) = seeded();

        let user = manager.login("lea@lookym.app", "secret").await.unwrap();
        assert_eq!(user.id, user_id);

        let state = manager.state();
        assert!(state.is_authenticated);
        assert!(state.is_initialized);
        assert!(!state.is_loading);
        assert_eq!(state.current_user.unwrap().username, "lea");
    }

    #[tokio::test]
    async fn login_rejects_bad_credentials() {
        let (_, manager, _) = seeded();

        let err = manager.login("lea@lookym.app", "wrong").await.unwrap_err();
        assert!(matches!(err, SyncError::AuthFailed(_)));

        let state = manager.state();
        assert!(state.current_user.is_none());
        assert!(!state.is_authenticated);
        // Failure is a terminal initialization outcome.
        assert!(state.is_initialized);
        assert!(state.error.is_some());
    }

    #[tokio::test]
    async fn login_detects_missing_profile_row() {
        let gateway = Arc::new(MemoryGateway::without_profile_provisioning());
        gateway.seed_account("ghost@lookym.app", "secret", "ghost", UserRole::User);
        let manager = manager_with(gateway);

        let err = manager.login("ghost@lookym.app", "secret").await.unwrap_err();
        assert!(matches!(err, SyncError::ProfileInconsistency(_)));
        assert!(!manager.state().is_authenticated);
    }

    #[tokio::test]
    async fn register_does_not_authenticate() {
        let gateway = Arc::new(MemoryGateway::new());
        let manager = manager_with(gateway);

        manager
            .register("new@lookym.app", "secret", "newbie", UserRole::Business)
            .await
            .unwrap();

        let state = manager.state();
        assert!(!state.is_authenticated);
        assert!(state.current_user.is_none());
    }

    #[tokio::test]
    async fn logout_survives_remote_failure() {
        let (gateway, manager, _) = seeded();
        manager.login("lea@lookym.app", "secret").await.unwrap();

        gateway.fail_next("sign_out");
        manager.logout().await;

        let state = manager.state();
        assert!(!state.is_authenticated);
        assert!(state.current_user.is_none());
        assert!(state.is_initialized);
    }

    #[tokio::test]
    async fn logout_clears_persisted_snapshot() {
        let gateway = Arc::new(MemoryGateway::new());
        gateway.seed_account("lea@lookym.app", "secret", "lea", UserRole::User);
        let db = Arc::new(Database::open_in_memory().unwrap());
        let manager =
            SessionManager::new(gateway, db.clone(), EventBus::default(), "avatars");

        manager.login("lea@lookym.app", "secret").await.unwrap();
        assert!(db
            .load_snapshot::<serde_json::Value>(keys::AUTH_STORAGE)
            .unwrap()
            .is_some());

        manager.logout().await;
        assert!(db
            .load_snapshot::<serde_json::Value>(keys::AUTH_STORAGE)
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn check_session_with_no_session_is_terminal() {
        let gateway = Arc::new(MemoryGateway::new());
        let manager = manager_with(gateway);

        assert!(manager.check_session().await.unwrap().is_none());
        let state = manager.state();
        assert!(state.is_initialized);
        assert!(!state.is_authenticated);

        // Idempotent: a second call does not reset initialization.
        assert!(manager.check_session().await.unwrap().is_none());
        assert!(manager.state().is_initialized);
    }

    #[tokio::test]
    async fn check_session_restores_active_session() {
        let (gateway, manager, user_id) = seeded();
        // Another client already holds a session on this backend.
        gateway.sign_in("lea@lookym.app", "secret").await.unwrap();

        let user = manager.check_session().await.unwrap().unwrap();
        assert_eq!(user.id, user_id);
        assert!(manager.state().is_authenticated);
    }

    #[tokio::test]
    async fn check_session_forces_logout_on_profile_inconsistency() {
        let gateway = Arc::new(MemoryGateway::without_profile_provisioning());
        gateway.seed_account("ghost@lookym.app", "secret", "ghost", UserRole::User);
        gateway.sign_in("ghost@lookym.app", "secret").await.unwrap();
        let manager = manager_with(gateway.clone());

        let err = manager.check_session().await.unwrap_err();
        assert!(matches!(err, SyncError::ProfileInconsistency(_)));

        let state = manager.state();
        assert!(!state.is_authenticated);
        assert!(state.is_initialized);
        // The forced logout also dropped the gateway session.
        assert!(gateway.current_session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_profile_merges_partial_fields() {
        let (_, manager, _) = seeded();
        manager.login("lea@lookym.app", "secret").await.unwrap();

        let updated = manager
            .update_profile(ProfileUpdate {
                bio: Some("vintage hunter".to_string()),
                ..ProfileUpdate::default()
            })
            .await
            .unwrap();

        assert_eq!(updated.bio.as_deref(), Some("vintage hunter"));
        // Untouched fields survive the partial update.
        assert_eq!(updated.username, "lea");
        assert_eq!(
            manager.current_user().unwrap().bio.as_deref(),
            Some("vintage hunter")
        );
    }

    #[tokio::test]
    async fn update_profile_uploads_local_avatar() {
        let (gateway, manager, user_id) = seeded();
        manager.login("lea@lookym.app", "secret").await.unwrap();

        let updated = manager
            .update_profile(ProfileUpdate {
                avatar: Some("data:image/png;base64,aGVsbG8=".to_string()),
                ..ProfileUpdate::default()
            })
            .await
            .unwrap();

        let avatar = updated.avatar.unwrap();
        assert!(avatar.starts_with("memory://avatars/"));
        assert!(avatar.contains(&user_id.to_string()));

        let path = avatar.strip_prefix("memory://avatars/").unwrap();
        assert_eq!(&gateway.stored_object("avatars", path).unwrap()[..], b"hello");
    }

    #[tokio::test]
    async fn update_profile_requires_session() {
        let (_, manager, _) = seeded();
        let err = manager
            .update_profile(ProfileUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NotAuthenticated));
    }
}
