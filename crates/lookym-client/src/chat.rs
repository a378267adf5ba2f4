//! Conversation store: two-party message threads.
//!
//! Chat identity is keyed by participant-set membership, not by a unique
//! constraint: `create_chat` appends to an existing thread with the same
//! participant instead of creating a duplicate.
//!
//! Realtime reconciliation is the transport-independent
//! [`merge_incoming`]: at most one copy per message id, re-sorted by
//! timestamp after insertion, because network delivery order is not
//! creation order.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use uuid::Uuid;

use lookym_gateway::rows::NewMessageRow;
use lookym_gateway::{MessageSubscription, RemoteGateway};
use lookym_shared::{Chat, Message};
use lookym_store::{keys, Database};

use crate::error::{Result, SyncError};
use crate::events::{EventBus, StoreEvent};
use crate::session::SessionManager;

const SEARCH_RESULT_LIMIT: usize = 100;

/// Reactive conversation state handed to the presentation layer.
#[derive(Debug, Clone, Default)]
pub struct ChatState {
    pub chats: Vec<Chat>,
    pub is_loading: bool,
    pub error: Option<String>,
}

/// The persisted subset of [`ChatState`].
#[derive(Debug, Serialize, Deserialize)]
struct ChatSnapshot {
    chats: Vec<Chat>,
}

/// Insert `incoming` into `messages` unless a message with the same id is
/// already present, then restore timestamp order. Returns whether the
/// message was inserted.
pub fn merge_incoming(messages: &mut Vec<Message>, incoming: Message) -> bool {
    if messages.iter().any(|m| m.id == incoming.id) {
        return false;
    }
    messages.push(incoming);
    messages.sort_by_key(|m| m.created_at);
    true
}

pub struct ConversationStore {
    gateway: Arc<dyn RemoteGateway>,
    session: Arc<SessionManager>,
    db: Arc<Database>,
    events: EventBus,
    state: Mutex<ChatState>,
}

impl ConversationStore {
    pub fn new(
        gateway: Arc<dyn RemoteGateway>,
        session: Arc<SessionManager>,
        db: Arc<Database>,
        events: EventBus,
    ) -> Self {
        let mut state = ChatState::default();
        match db.load_snapshot::<ChatSnapshot>(keys::CHAT_STORAGE) {
            Ok(Some(snapshot)) => state.chats = snapshot.chats,
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, "discarding unreadable chat snapshot");
            }
        }

        Self {
            gateway,
            session,
            db,
            events,
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChatState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// A cheap clone of the current state.
    pub fn state(&self) -> ChatState {
        self.lock().clone()
    }

    pub fn chat(&self, chat_id: Uuid) -> Option<Chat> {
        self.lock().chats.iter().find(|c| c.id == chat_id).cloned()
    }

    /// The loaded chat whose participant set contains `participant`, if
    /// any. Local lookup only.
    pub fn find_chat_with(&self, participant: Uuid) -> Option<Chat> {
        self.lock()
            .chats
            .iter()
            .find(|c| c.has_participant(participant))
            .cloned()
    }

    fn fail(&self, err: &SyncError) {
        let mut state = self.lock();
        state.is_loading = false;
        state.error = Some(err.to_string());
    }

    fn persist(&self) {
        let snapshot = {
            let state = self.lock();
            ChatSnapshot {
                chats: state.chats.clone(),
            }
        };
        if let Err(e) = self.db.save_snapshot(keys::CHAT_STORAGE, &snapshot) {
            tracing::warn!(error = %e, "failed to flush chat snapshot");
        }
    }

    /// Replace the loaded threads with the remote state.
    pub async fn fetch_chats(&self) -> Result<Vec<Chat>> {
        let user = self.session.require_user()?;
        {
            let mut state = self.lock();
            state.is_loading = true;
            state.error = None;
        }

        let rows = match self.gateway.fetch_chats(user.id).await {
            Ok(rows) => rows,
            Err(e) => {
                let err = SyncError::RemoteRead(e);
                self.fail(&err);
                return Err(err);
            }
        };

        let chats: Vec<Chat> = rows.into_iter().map(|r| r.into_chat(user.id)).collect();
        {
            let mut state = self.lock();
            state.chats = chats.clone();
            state.is_loading = false;
        }
        self.persist();
        Ok(chats)
    }

    /// Search-or-create: if a thread with `participant` already exists the
    /// initial message is appended to it, otherwise a new thread is
    /// created first. Returns the thread after the message landed.
    pub async fn create_chat(&self, participant: Uuid, initial_message: &str) -> Result<Chat> {
        let user = self.session.require_user()?;
        if participant == user.id {
            return Err(SyncError::InvalidInput(
                "cannot open a chat with yourself".to_string(),
            ));
        }

        let existing = match self.find_chat_with(participant) {
            Some(chat) => Some(chat),
            None => {
                // The thread may exist remotely without being loaded yet.
                self.fetch_chats().await?;
                self.find_chat_with(participant)
            }
        };

        let chat_id = match existing {
            Some(chat) => chat.id,
            None => {
                let row = self
                    .gateway
                    .insert_chat(&[user.id, participant])
                    .await
                    .map_err(SyncError::RemoteWrite)?;
                let chat = row.into_chat(user.id);
                let chat_id = chat.id;
                self.lock().chats.push(chat);
                self.persist();
                tracing::info!(%chat_id, %participant, "chat created");
                chat_id
            }
        };

        self.send_message(chat_id, initial_message).await?;
        self.chat(chat_id)
            .ok_or_else(|| SyncError::InvalidInput("chat vanished after send".to_string()))
    }

    /// Append a message to a thread. The sender's unread count resets to
    /// zero: replying means everything earlier has been seen.
    pub async fn send_message(&self, chat_id: Uuid, text: &str) -> Result<Message> {
        let user = self.session.require_user()?;
        if text.trim().is_empty() {
            return Err(SyncError::InvalidInput("empty message".to_string()));
        }

        let row = self
            .gateway
            .insert_message(&NewMessageRow {
                chat_id,
                sender_id: user.id,
                text: text.to_string(),
            })
            .await
            .map_err(SyncError::RemoteWrite)?;

        let message = row.into_message();
        {
            let mut state = self.lock();
            if let Some(chat) = state.chats.iter_mut().find(|c| c.id == chat_id) {
                merge_incoming(&mut chat.messages, message.clone());
                chat.touch_last_message();
                chat.unread_count = 0;
            }
        }
        self.persist();
        self.events.emit(StoreEvent::NewMessage {
            chat_id,
            message_id: message.id,
        });
        Ok(message)
    }

    /// Flip `read` on the current user's inbound unread messages in
    /// `chat_id` -- all of them, or only `ids` when given. Write-through.
    pub async fn mark_messages_read(&self, chat_id: Uuid, ids: Option<&[Uuid]>) -> Result<()> {
        let user = self.session.require_user()?;

        self.gateway
            .mark_messages_read(chat_id, user.id, ids)
            .await
            .map_err(SyncError::RemoteWrite)?;

        {
            let mut state = self.lock();
            if let Some(chat) = state.chats.iter_mut().find(|c| c.id == chat_id) {
                for message in chat.messages.iter_mut().filter(|m| {
                    m.sender_id != user.id
                        && !m.read
                        && ids.map_or(true, |ids| ids.contains(&m.id))
                }) {
                    message.read = true;
                }
                chat.unread_count = chat
                    .messages
                    .iter()
                    .filter(|m| m.sender_id != user.id && !m.read)
                    .count() as u64;
                chat.touch_last_message();
            }
        }
        self.persist();
        Ok(())
    }

    /// Inject a message delivered by the realtime transport. Idempotent:
    /// a row already merged (e.g. our own send echoed back) is dropped by
    /// id. Returns whether the message was new.
    pub fn apply_incoming_message(&self, message: Message) -> bool {
        let me = self.session.current_user().map(|u| u.id);
        let chat_id = message.chat_id;
        let message_id = message.id;

        let inserted = {
            let mut state = self.lock();
            let Some(chat) = state.chats.iter_mut().find(|c| c.id == chat_id) else {
                tracing::debug!(%chat_id, "incoming message for unloaded chat, ignoring");
                return false;
            };
            let inserted = merge_incoming(&mut chat.messages, message);
            if inserted {
                chat.touch_last_message();
                chat.unread_count = chat
                    .messages
                    .iter()
                    .filter(|m| Some(m.sender_id) != me && !m.read)
                    .count() as u64;
            }
            inserted
        };

        if inserted {
            self.persist();
            self.events.emit(StoreEvent::NewMessage {
                chat_id,
                message_id,
            });
        }
        inserted
    }

    /// Drive a gateway subscription into the store until it closes or the
    /// returned handle is dropped by the caller's screen teardown.
    pub fn attach_subscription(
        self: Arc<Self>,
        mut subscription: MessageSubscription,
    ) -> JoinHandle<()> {
        let store = self;
        tokio::spawn(async move {
            while let Some(row) = subscription.recv().await {
                store.apply_incoming_message(row.into_message());
            }
            tracing::debug!("message subscription drained");
        })
    }

    /// Case-insensitive substring search across loaded threads, newest
    /// first, capped at 100 hits.
    pub fn search_messages(&self, query: &str, chat_id: Option<Uuid>) -> Vec<Message> {
        let needle = query.to_lowercase();
        let state = self.lock();

        let mut hits: Vec<Message> = state
            .chats
            .iter()
            .filter(|c| chat_id.map_or(true, |id| c.id == id))
            .flat_map(|c| c.messages.iter())
            .filter(|m| m.text.to_lowercase().contains(&needle))
            .cloned()
            .collect();

        hits.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        hits.truncate(SEARCH_RESULT_LIMIT);
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use lookym_gateway::MemoryGateway;
    use lookym_shared::UserRole;

    fn message_at(chat_id: Uuid, sender: Uuid, secs: i64) -> Message {
        Message {
            id: Uuid::new_v4(),
            chat_id,
            sender_id: sender,
            text: format!("m{secs}"),
            created_at: Utc.timestamp_opt(secs, 0).unwrap(),
            read: false,
        }
    }

    #[test]
    fn merge_is_idempotent_by_id() {
        let chat_id = Uuid::new_v4();
        let sender = Uuid::new_v4();
        let mut messages = Vec::new();

        let m = message_at(chat_id, sender, 10);
        assert!(merge_incoming(&mut messages, m.clone()));
        assert!(!merge_incoming(&mut messages, m));
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn merge_restores_timestamp_order() {
        let chat_id = Uuid::new_v4();
        let sender = Uuid::new_v4();
        let mut messages = vec![message_at(chat_id, sender, 30)];

        // Delivered late: created earlier than what we already hold.
        merge_incoming(&mut messages, message_at(chat_id, sender, 10));
        merge_incoming(&mut messages, message_at(chat_id, sender, 20));

        let stamps: Vec<i64> = messages.iter().map(|m| m.created_at.timestamp()).collect();
        assert_eq!(stamps, vec![10, 20, 30]);
    }

    struct Fixture {
        gateway: Arc<MemoryGateway>,
        session: Arc<SessionManager>,
        store: Arc<ConversationStore>,
        db: Arc<Database>,
        me: Uuid,
        shop: Uuid,
    }

    async fn fixture() -> Fixture {
        let gateway = Arc::new(MemoryGateway::new());
        let me = gateway.seed_account("me@lookym.app", "pw", "me", UserRole::User);
        let shop = gateway.seed_account("shop@lookym.app", "pw", "shop", UserRole::Business);

        let db = Arc::new(Database::open_in_memory().unwrap());
        let events = EventBus::default();
        let session = Arc::new(SessionManager::new(
            gateway.clone(),
            db.clone(),
            events.clone(),
            "avatars",
        ));
        session.login("me@lookym.app", "pw").await.unwrap();

        let store = Arc::new(ConversationStore::new(
            gateway.clone(),
            session.clone(),
            db.clone(),
            events,
        ));
        Fixture {
            gateway,
            session,
            store,
            db,
            me,
            shop,
        }
    }

    #[tokio::test]
    async fn create_chat_twice_reuses_the_thread() {
        let fx = fixture().await;

        let first = fx.store.create_chat(fx.shop, "hello").await.unwrap();
        let second = fx.store.create_chat(fx.shop, "still there?").await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(fx.store.state().chats.len(), 1);

        let texts: Vec<&str> = second.messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["hello", "still there?"]);
    }

    #[tokio::test]
    async fn send_message_updates_last_message_and_resets_unread() {
        let fx = fixture().await;
        let chat = fx.store.create_chat(fx.shop, "hello").await.unwrap();

        // An inbound message arrives and is merged.
        let inbound = fx
            .gateway
            .insert_message(&NewMessageRow {
                chat_id: chat.id,
                sender_id: fx.shop,
                text: "yes!".to_string(),
            })
            .await
            .unwrap();
        assert!(fx.store.apply_incoming_message(inbound.into_message()));
        assert_eq!(fx.store.chat(chat.id).unwrap().unread_count, 1);

        // Replying resets the sender's unread count.
        let sent = fx.store.send_message(chat.id, "great").await.unwrap();
        let chat = fx.store.chat(chat.id).unwrap();
        assert_eq!(chat.unread_count, 0);
        let last = chat.last_message.unwrap();
        assert_eq!(last.id, sent.id);
        assert_eq!(last.sender_id, fx.me);
    }

    #[tokio::test]
    async fn realtime_echo_of_own_send_is_deduplicated() {
        let fx = fixture().await;
        let chat = fx.store.create_chat(fx.shop, "hello").await.unwrap();

        let mut subscription = fx.gateway.subscribe_messages(chat.id).await.unwrap();
        let sent = fx.store.send_message(chat.id, "ping").await.unwrap();

        // The transport echoes our own insert back; the merge drops it.
        let echoed = subscription.recv().await.unwrap();
        assert_eq!(echoed.id, sent.id);
        assert!(!fx.store.apply_incoming_message(echoed.into_message()));

        let messages = fx.store.chat(chat.id).unwrap().messages;
        assert_eq!(messages.iter().filter(|m| m.id == sent.id).count(), 1);
    }

    #[tokio::test]
    async fn attached_subscription_feeds_the_store() {
        let fx = fixture().await;
        let chat = fx.store.create_chat(fx.shop, "hello").await.unwrap();

        let subscription = fx.gateway.subscribe_messages(chat.id).await.unwrap();
        let handle = fx.store.clone().attach_subscription(subscription);

        fx.gateway
            .insert_message(&NewMessageRow {
                chat_id: chat.id,
                sender_id: fx.shop,
                text: "in stock".to_string(),
            })
            .await
            .unwrap();

        for _ in 0..20 {
            tokio::task::yield_now().await;
        }

        let chat = fx.store.chat(chat.id).unwrap();
        assert_eq!(chat.messages.last().unwrap().text, "in stock");
        assert_eq!(chat.unread_count, 1);
        handle.abort();
    }

    #[tokio::test]
    async fn mark_messages_read_flips_inbound_only() {
        let fx = fixture().await;
        let chat = fx.store.create_chat(fx.shop, "hello").await.unwrap();

        for text in ["a", "b"] {
            let inbound = fx
                .gateway
                .insert_message(&NewMessageRow {
                    chat_id: chat.id,
                    sender_id: fx.shop,
                    text: text.to_string(),
                })
                .await
                .unwrap();
            fx.store.apply_incoming_message(inbound.into_message());
        }
        assert_eq!(fx.store.chat(chat.id).unwrap().unread_count, 2);

        fx.store.mark_messages_read(chat.id, None).await.unwrap();

        let chat = fx.store.chat(chat.id).unwrap();
        assert_eq!(chat.unread_count, 0);
        assert!(chat
            .messages
            .iter()
            .filter(|m| m.sender_id == fx.shop)
            .all(|m| m.read));
    }

    #[tokio::test]
    async fn mark_subset_leaves_the_rest_unread() {
        let fx = fixture().await;
        let chat = fx.store.create_chat(fx.shop, "hello").await.unwrap();

        let mut inbound_ids = Vec::new();
        for text in ["a", "b"] {
            let inbound = fx
                .gateway
                .insert_message(&NewMessageRow {
                    chat_id: chat.id,
                    sender_id: fx.shop,
                    text: text.to_string(),
                })
                .await
                .unwrap();
            inbound_ids.push(inbound.id);
            fx.store.apply_incoming_message(inbound.into_message());
        }

        fx.store
            .mark_messages_read(chat.id, Some(&inbound_ids[..1]))
            .await
            .unwrap();
        assert_eq!(fx.store.chat(chat.id).unwrap().unread_count, 1);
    }

    #[tokio::test]
    async fn chats_rehydrate_from_snapshot() {
        let fx = fixture().await;
        fx.store.create_chat(fx.shop, "hello").await.unwrap();

        let rehydrated = ConversationStore::new(
            fx.gateway.clone(),
            fx.session.clone(),
            fx.db.clone(),
            EventBus::default(),
        );
        assert_eq!(rehydrated.state().chats.len(), 1);
        assert_eq!(
            rehydrated.state().chats[0].last_message.as_ref().unwrap().text,
            "hello"
        );
    }

    #[tokio::test]
    async fn search_is_case_insensitive_and_newest_first() {
        let fx = fixture().await;
        let chat = fx.store.create_chat(fx.shop, "Blue denim jacket").await.unwrap();
        fx.store.send_message(chat.id, "any red ones?").await.unwrap();
        fx.store.send_message(chat.id, "DENIM restocked").await.unwrap();

        let hits = fx.store.search_messages("denim", None);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].text, "DENIM restocked");
        assert_eq!(hits[1].text, "Blue denim jacket");

        assert!(fx.store.search_messages("velvet", None).is_empty());
    }
}
