//! Application assembly.
//!
//! The presentation layer constructs one [`App`] at startup and keeps it
//! for the process lifetime. Every store receives its dependencies here;
//! nothing reaches for globals, so tests assemble the same graph over
//! `MemoryGateway`/`MemoryMedia` and an in-memory snapshot database via
//! [`App::with_parts`].

use std::sync::Arc;

use lookym_gateway::{GatewayConfig, RemoteGateway, RestGateway};
use lookym_media::{MediaConfig, MediaGateway, MediaUpload};
use lookym_shared::User;
use lookym_store::Database;

use crate::chat::ConversationStore;
use crate::content::ContentStore;
use crate::error::Result;
use crate::events::EventBus;
use crate::notifications::NotificationStore;
use crate::relations::RelationshipStore;
use crate::session::SessionManager;

/// Configuration for the whole data layer.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub gateway: GatewayConfig,
    pub media: MediaConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            gateway: GatewayConfig::from_env(),
            media: MediaConfig::from_env(),
        }
    }
}

/// The assembled data layer: five stores sharing one gateway, one media
/// client, one snapshot database and one event bus.
pub struct App {
    pub events: EventBus,
    pub session: Arc<SessionManager>,
    pub content: Arc<ContentStore>,
    pub relations: Arc<RelationshipStore>,
    pub conversations: Arc<ConversationStore>,
    pub notifications: Arc<NotificationStore>,
}

impl App {
    /// Wire the real parts: REST gateway, hosted media backend, snapshot
    /// database in the platform data directory.
    pub fn new(config: AppConfig) -> Result<Self> {
        let db = Arc::new(Database::open_default()?);
        let gateway: Arc<dyn RemoteGateway> = Arc::new(RestGateway::new(config.gateway.clone()));
        let media: Arc<dyn MediaUpload> = Arc::new(MediaGateway::new(config.media));
        Ok(Self::with_parts(
            gateway,
            media,
            db,
            &config.gateway.storage_bucket,
        ))
    }

    /// Wire explicit parts; used by tests and offline tooling.
    pub fn with_parts(
        gateway: Arc<dyn RemoteGateway>,
        media: Arc<dyn MediaUpload>,
        db: Arc<Database>,
        avatar_bucket: &str,
    ) -> Self {
        let events = EventBus::default();
        let session = Arc::new(SessionManager::new(
            gateway.clone(),
            db.clone(),
            events.clone(),
            avatar_bucket,
        ));
        let content = Arc::new(ContentStore::new(
            gateway.clone(),
            media,
            session.clone(),
            db.clone(),
            events.clone(),
        ));
        let relations = Arc::new(RelationshipStore::new(
            gateway.clone(),
            session.clone(),
            events.clone(),
        ));
        let conversations = Arc::new(ConversationStore::new(
            gateway.clone(),
            session.clone(),
            db.clone(),
            events.clone(),
        ));
        let notifications = Arc::new(NotificationStore::new(
            gateway,
            session.clone(),
            db,
            events.clone(),
        ));

        Self {
            events,
            session,
            content,
            relations,
            conversations,
            notifications,
        }
    }

    /// Process-start sequence: restore the session once, then warm the
    /// per-user caches. Cache warm-up is best-effort -- a cold cache is a
    /// rendering detail, not a startup failure.
    pub async fn bootstrap(&self) -> Result<Option<User>> {
        let restored = self.session.check_session().await?;

        if restored.is_some() {
            if let Err(e) = self.content.hydrate_engagement().await {
                tracing::warn!(error = %e, "engagement hydration failed");
            }
            if let Err(e) = self.relations.refresh().await {
                tracing::warn!(error = %e, "follow graph refresh failed");
            }
        }
        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lookym_gateway::MemoryGateway;
    use lookym_media::MemoryMedia;
    use lookym_shared::UserRole;
    use uuid::Uuid;

    fn app_over(gateway: Arc<MemoryGateway>) -> App {
        App::with_parts(
            gateway,
            Arc::new(MemoryMedia::new()),
            Arc::new(Database::open_in_memory().unwrap()),
            "avatars",
        )
    }

    #[tokio::test]
    async fn bootstrap_without_session_initializes_anonymous() {
        let app = app_over(Arc::new(MemoryGateway::new()));

        assert!(app.bootstrap().await.unwrap().is_none());
        let state = app.session.state();
        assert!(state.is_initialized);
        assert!(!state.is_authenticated);
    }

    #[tokio::test]
    async fn bootstrap_restores_session_and_warms_caches() {
        let gateway = Arc::new(MemoryGateway::new());
        let me = gateway.seed_account("me@lookym.app", "pw", "me", UserRole::User);
        let video_id = Uuid::new_v4();
        gateway.insert_like(video_id, me).await.unwrap();
        gateway.sign_in("me@lookym.app", "pw").await.unwrap();

        let app = app_over(gateway);
        let restored = app.bootstrap().await.unwrap().unwrap();
        assert_eq!(restored.id, me);
        assert!(app.content.is_liked(video_id));
    }
}
