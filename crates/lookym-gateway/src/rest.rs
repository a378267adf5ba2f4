//! [`RestGateway`]: the hosted-backend implementation of [`RemoteGateway`].
//!
//! Speaks PostgREST-style query strings against `/rest/v1`, GoTrue-style
//! auth endpoints under `/auth/v1`, and the storage API under
//! `/storage/v1`.  Realtime message subscriptions are served by interval
//! polling on the messages collection; the contract exposed to callers is
//! transport-independent.

use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use async_trait::async_trait;
use lookym_shared::UserRole;

use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::remote::{AuthSession, MessageSubscription, RemoteGateway, UploadOptions};
use crate::rows::{
    AuthorRow, ChatRow, CommentRow, MessageRow, NewMessageRow, NewNotificationRow, NewVideoRow,
    NotificationRow, ProfilePatch, UserRow, VideoRow,
};

const AUTHOR_SELECT: &str = "id,username,avatar_url,verified,role";

/// Hosted-backend gateway over HTTPS.
pub struct RestGateway {
    http: reqwest::Client,
    config: GatewayConfig,
    session: Mutex<Option<AuthSession>>,
}

impl RestGateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            session: Mutex::new(None),
        }
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.config.api_url, table)
    }

    fn auth_url(&self, endpoint: &str) -> String {
        format!("{}/auth/v1/{}", self.config.api_url, endpoint)
    }

    fn storage_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/storage/v1/object/{}/{}",
            self.config.api_url, bucket, path
        )
    }

    fn access_token(&self) -> Option<String> {
        self.session
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|s| s.access_token.clone())
    }

    /// Attach the anon key and, when signed in, the bearer token.
    fn authed(&self, rb: RequestBuilder) -> RequestBuilder {
        let rb = rb.header("apikey", &self.config.api_key);
        match self.access_token() {
            Some(token) => rb.bearer_auth(token),
            None => rb,
        }
    }

    async fn json_of<T: DeserializeOwned>(resp: Response) -> Result<T> {
        let status = resp.status();
        if !status.is_success() {
            return Err(status_error(status, resp.text().await.unwrap_or_default()));
        }
        let bytes = resp.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn check_ok(resp: Response) -> Result<()> {
        let status = resp.status();
        if !status.is_success() {
            return Err(status_error(status, resp.text().await.unwrap_or_default()));
        }
        Ok(())
    }

    /// `SELECT` against a table; `query` is the raw PostgREST query pairs.
    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>> {
        let resp = self
            .authed(self.http.get(self.rest_url(table)).query(query))
            .send()
            .await?;
        Self::json_of(resp).await
    }

    /// Insert a row and return the representation the backend sends back.
    async fn insert_returning<T: DeserializeOwned>(
        &self,
        table: &str,
        select: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        let resp = self
            .authed(
                self.http
                    .post(self.rest_url(table))
                    .query(&[("select", select)])
                    .header("Prefer", "return=representation")
                    .json(body),
            )
            .send()
            .await?;
        let mut rows: Vec<T> = Self::json_of(resp).await?;
        rows.pop().ok_or(GatewayError::NotFound)
    }

    /// Fire an insert without asking for the row back.
    async fn insert_minimal(
        &self,
        table: &str,
        prefer: &str,
        body: &serde_json::Value,
    ) -> Result<()> {
        let resp = self
            .authed(
                self.http
                    .post(self.rest_url(table))
                    .header("Prefer", prefer)
                    .json(body),
            )
            .send()
            .await?;
        Self::check_ok(resp).await
    }

    async fn delete_where(&self, table: &str, query: &[(&str, String)]) -> Result<()> {
        let resp = self
            .authed(self.http.delete(self.rest_url(table)).query(query))
            .send()
            .await?;
        Self::check_ok(resp).await
    }

    async fn patch_where(
        &self,
        table: &str,
        query: &[(&str, String)],
        body: &serde_json::Value,
    ) -> Result<()> {
        let resp = self
            .authed(
                self.http
                    .patch(self.rest_url(table))
                    .query(query)
                    .header("Prefer", "return=minimal")
                    .json(body),
            )
            .send()
            .await?;
        Self::check_ok(resp).await
    }

    /// Server-side RPC under `/rest/v1/rpc/{name}`.
    async fn rpc(&self, name: &str, body: &serde_json::Value) -> Result<()> {
        let url = format!("{}/rest/v1/rpc/{}", self.config.api_url, name);
        let resp = self.authed(self.http.post(url).json(body)).send().await?;
        Self::check_ok(resp).await
    }

    fn video_select() -> String {
        format!(
            "id,video_url,thumbnail_url,caption,hashtags,likes,created_at,mime_type,product_tags,\
             author:users({AUTHOR_SELECT}),\
             comments(id,video_id,text,likes,created_at,author:users({AUTHOR_SELECT}))"
        )
    }
}

fn status_error(status: StatusCode, message: String) -> GatewayError {
    match status {
        StatusCode::CONFLICT => GatewayError::Conflict(message),
        StatusCode::NOT_FOUND => GatewayError::NotFound,
        _ => GatewayError::Status {
            code: status.as_u16(),
            message,
        },
    }
}

fn id_list(ids: &[Uuid]) -> String {
    let joined = ids
        .iter()
        .map(Uuid::to_string)
        .collect::<Vec<_>>()
        .join(",");
    format!("in.({joined})")
}

// -- Auth wire shapes -------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SignUpResponse {
    id: Uuid,
}

#[derive(Debug, Deserialize)]
struct TokenUser {
    id: Uuid,
    email: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    user: TokenUser,
}

// -- Chat wire shapes (participants arrive wrapped in the join table) -------

#[derive(Debug, Deserialize)]
struct ChatParticipantRow {
    user: AuthorRow,
}

#[derive(Debug, Deserialize)]
struct RestChatRow {
    id: Uuid,
    participants: Vec<ChatParticipantRow>,
    #[serde(default)]
    messages: Vec<MessageRow>,
}

impl RestChatRow {
    fn into_row(self) -> ChatRow {
        ChatRow {
            id: self.id,
            participants: self.participants.into_iter().map(|p| p.user).collect(),
            messages: self.messages,
        }
    }
}

#[derive(Debug, Deserialize)]
struct VideoIdRow {
    video_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct FollowerIdRow {
    follower_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct FollowingIdRow {
    following_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct InsertedChatRow {
    id: Uuid,
}

#[async_trait]
impl RemoteGateway for RestGateway {
    // -- Auth ---------------------------------------------------------------

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        username: &str,
        role: UserRole,
    ) -> Result<Uuid> {
        let body = serde_json::json!({
            "email": email,
            "password": password,
            "data": { "username": username, "role": role.as_str() },
        });
        let resp = self
            .authed(self.http.post(self.auth_url("signup")).json(&body))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            if status.as_u16() == 400 || status.as_u16() == 422 {
                return Err(GatewayError::AuthFailed(message));
            }
            return Err(status_error(status, message));
        }
        let created: SignUpResponse = serde_json::from_slice(&resp.bytes().await?)?;
        tracing::info!(user_id = %created.id, "signed up");
        Ok(created.id)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession> {
        let body = serde_json::json!({ "email": email, "password": password });
        let resp = self
            .authed(
                self.http
                    .post(self.auth_url("token"))
                    .query(&[("grant_type", "password")])
                    .json(&body),
            )
            .send()
            .await?;

        let status = resp.status();
        if status.as_u16() == 400 || status.as_u16() == 401 {
            let message = resp.text().await.unwrap_or_default();
            return Err(GatewayError::AuthFailed(message));
        }
        if !status.is_success() {
            return Err(status_error(status, resp.text().await.unwrap_or_default()));
        }

        let token: TokenResponse = serde_json::from_slice(&resp.bytes().await?)?;
        let session = AuthSession {
            user_id: token.user.id,
            email: token.user.email,
            access_token: token.access_token,
        };

        *self.session.lock().unwrap_or_else(|e| e.into_inner()) = Some(session.clone());
        tracing::info!(user_id = %session.user_id, "signed in");
        Ok(session)
    }

    async fn sign_out(&self) -> Result<()> {
        // Drop the local token first so the gateway is signed out even when
        // the remote call fails.
        let token = self
            .session
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .map(|s| s.access_token);

        let Some(token) = token else {
            return Ok(());
        };

        let resp = self
            .http
            .post(self.auth_url("logout"))
            .header("apikey", &self.config.api_key)
            .bearer_auth(token)
            .send()
            .await?;
        Self::check_ok(resp).await
    }

    async fn current_session(&self) -> Result<Option<AuthSession>> {
        Ok(self
            .session
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone())
    }

    // -- Profiles -----------------------------------------------------------

    async fn fetch_profile(&self, user_id: Uuid) -> Result<Option<UserRow>> {
        let mut rows: Vec<UserRow> = self
            .select(
                "users",
                &[
                    ("select", "*".to_string()),
                    ("id", format!("eq.{user_id}")),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;
        Ok(rows.pop())
    }

    async fn update_profile(&self, user_id: Uuid, patch: &ProfilePatch) -> Result<UserRow> {
        let resp = self
            .authed(
                self.http
                    .patch(self.rest_url("users"))
                    .query(&[("id", format!("eq.{user_id}")), ("select", "*".to_string())])
                    .header("Prefer", "return=representation")
                    .json(patch),
            )
            .send()
            .await?;
        let mut rows: Vec<UserRow> = Self::json_of(resp).await?;
        rows.pop().ok_or(GatewayError::NotFound)
    }

    // -- Videos -------------------------------------------------------------

    async fn fetch_videos(&self, page: u32, limit: u32) -> Result<Vec<VideoRow>> {
        let offset = page.saturating_sub(1) * limit;
        self.select(
            "videos",
            &[
                ("select", Self::video_select()),
                ("order", "created_at.desc".to_string()),
                ("limit", limit.to_string()),
                ("offset", offset.to_string()),
            ],
        )
        .await
    }

    async fn fetch_videos_by_user(&self, user_id: Uuid) -> Result<Vec<VideoRow>> {
        self.select(
            "videos",
            &[
                ("select", Self::video_select()),
                ("author_id", format!("eq.{user_id}")),
                ("order", "created_at.desc".to_string()),
            ],
        )
        .await
    }

    async fn fetch_video(&self, id: Uuid) -> Result<Option<VideoRow>> {
        let mut rows: Vec<VideoRow> = self
            .select(
                "videos",
                &[
                    ("select", Self::video_select()),
                    ("id", format!("eq.{id}")),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;
        Ok(rows.pop())
    }

    async fn insert_video(&self, new: &NewVideoRow) -> Result<VideoRow> {
        self.insert_returning("videos", &Self::video_select(), &serde_json::to_value(new)?)
            .await
    }

    // -- Likes --------------------------------------------------------------

    async fn increment_likes(&self, video_id: Uuid) -> Result<()> {
        self.rpc(
            "increment_video_likes",
            &serde_json::json!({ "video_id": video_id }),
        )
        .await
    }

    async fn decrement_likes(&self, video_id: Uuid) -> Result<()> {
        self.rpc(
            "decrement_video_likes",
            &serde_json::json!({ "video_id": video_id }),
        )
        .await
    }

    async fn insert_like(&self, video_id: Uuid, user_id: Uuid) -> Result<()> {
        self.insert_minimal(
            "video_likes",
            "return=minimal",
            &serde_json::json!({ "video_id": video_id, "user_id": user_id }),
        )
        .await
    }

    async fn delete_like(&self, video_id: Uuid, user_id: Uuid) -> Result<()> {
        self.delete_where(
            "video_likes",
            &[
                ("video_id", format!("eq.{video_id}")),
                ("user_id", format!("eq.{user_id}")),
            ],
        )
        .await
    }

    async fn fetch_liked_video_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        let rows: Vec<VideoIdRow> = self
            .select(
                "video_likes",
                &[
                    ("select", "video_id".to_string()),
                    ("user_id", format!("eq.{user_id}")),
                ],
            )
            .await?;
        Ok(rows.into_iter().map(|r| r.video_id).collect())
    }

    // -- Saves --------------------------------------------------------------

    async fn insert_save(&self, video_id: Uuid, user_id: Uuid) -> Result<()> {
        self.insert_minimal(
            "saved_videos",
            "return=minimal,resolution=merge-duplicates",
            &serde_json::json!({ "video_id": video_id, "user_id": user_id }),
        )
        .await
    }

    async fn delete_save(&self, video_id: Uuid, user_id: Uuid) -> Result<()> {
        self.delete_where(
            "saved_videos",
            &[
                ("video_id", format!("eq.{video_id}")),
                ("user_id", format!("eq.{user_id}")),
            ],
        )
        .await
    }

    async fn fetch_saved_video_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        let rows: Vec<VideoIdRow> = self
            .select(
                "saved_videos",
                &[
                    ("select", "video_id".to_string()),
                    ("user_id", format!("eq.{user_id}")),
                ],
            )
            .await?;
        Ok(rows.into_iter().map(|r| r.video_id).collect())
    }

    // -- Comments -----------------------------------------------------------

    async fn insert_comment(
        &self,
        video_id: Uuid,
        user_id: Uuid,
        text: &str,
    ) -> Result<CommentRow> {
        let select = format!("id,video_id,text,likes,created_at,author:users({AUTHOR_SELECT})");
        self.insert_returning(
            "comments",
            &select,
            &serde_json::json!({
                "video_id": video_id,
                "author_id": user_id,
                "text": text,
            }),
        )
        .await
    }

    // -- Follows ------------------------------------------------------------

    async fn insert_follow(&self, follower: Uuid, following: Uuid) -> Result<()> {
        self.insert_minimal(
            "followers",
            "return=minimal,resolution=merge-duplicates",
            &serde_json::json!({ "follower_id": follower, "following_id": following }),
        )
        .await
    }

    async fn delete_follow(&self, follower: Uuid, following: Uuid) -> Result<()> {
        self.delete_where(
            "followers",
            &[
                ("follower_id", format!("eq.{follower}")),
                ("following_id", format!("eq.{following}")),
            ],
        )
        .await
    }

    async fn fetch_follower_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        let rows: Vec<FollowerIdRow> = self
            .select(
                "followers",
                &[
                    ("select", "follower_id".to_string()),
                    ("following_id", format!("eq.{user_id}")),
                ],
            )
            .await?;
        Ok(rows.into_iter().map(|r| r.follower_id).collect())
    }

    async fn fetch_following_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        let rows: Vec<FollowingIdRow> = self
            .select(
                "followers",
                &[
                    ("select", "following_id".to_string()),
                    ("follower_id", format!("eq.{user_id}")),
                ],
            )
            .await?;
        Ok(rows.into_iter().map(|r| r.following_id).collect())
    }

    async fn fetch_users_by_ids(&self, ids: &[Uuid]) -> Result<Vec<UserRow>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.select(
            "users",
            &[("select", "*".to_string()), ("id", id_list(ids))],
        )
        .await
    }

    // -- Notifications ------------------------------------------------------

    async fn insert_notification(&self, new: &NewNotificationRow) -> Result<NotificationRow> {
        let select = format!(
            "id,user_id,type,content,related_id,related_type,read,created_at,\
             actor:users({AUTHOR_SELECT})"
        );
        self.insert_returning("notifications", &select, &serde_json::to_value(new)?)
            .await
    }

    async fn fetch_notifications(&self, user_id: Uuid) -> Result<Vec<NotificationRow>> {
        let select = format!(
            "id,user_id,type,content,related_id,related_type,read,created_at,\
             actor:users({AUTHOR_SELECT})"
        );
        self.select(
            "notifications",
            &[
                ("select", select),
                ("user_id", format!("eq.{user_id}")),
                ("order", "created_at.desc".to_string()),
            ],
        )
        .await
    }

    async fn mark_notification_read(&self, id: Uuid) -> Result<()> {
        self.patch_where(
            "notifications",
            &[("id", format!("eq.{id}"))],
            &serde_json::json!({ "read": true }),
        )
        .await
    }

    async fn mark_all_notifications_read(&self, user_id: Uuid) -> Result<()> {
        self.patch_where(
            "notifications",
            &[
                ("user_id", format!("eq.{user_id}")),
                ("read", "eq.false".to_string()),
            ],
            &serde_json::json!({ "read": true }),
        )
        .await
    }

    // -- Chats --------------------------------------------------------------

    async fn fetch_chats(&self, user_id: Uuid) -> Result<Vec<ChatRow>> {
        let select = format!(
            "id,\
             participants:chat_participants!inner(user:users({AUTHOR_SELECT})),\
             messages(id,chat_id,sender_id,text,read,created_at)"
        );
        let rows: Vec<RestChatRow> = self
            .select(
                "chats",
                &[
                    ("select", select),
                    ("chat_participants.user_id", format!("eq.{user_id}")),
                ],
            )
            .await?;
        Ok(rows.into_iter().map(RestChatRow::into_row).collect())
    }

    async fn insert_chat(&self, participant_ids: &[Uuid]) -> Result<ChatRow> {
        let inserted: InsertedChatRow = self
            .insert_returning("chats", "id", &serde_json::json!({}))
            .await?;

        for user_id in participant_ids {
            self.insert_minimal(
                "chat_participants",
                "return=minimal",
                &serde_json::json!({ "chat_id": inserted.id, "user_id": user_id }),
            )
            .await?;
        }

        let participants = self
            .fetch_users_by_ids(participant_ids)
            .await?
            .into_iter()
            .map(|u| AuthorRow {
                id: u.id,
                username: u.username,
                avatar_url: u.avatar_url,
                verified: u.verified,
                role: u.role,
            })
            .collect();

        Ok(ChatRow {
            id: inserted.id,
            participants,
            messages: Vec::new(),
        })
    }

    async fn insert_message(&self, new: &NewMessageRow) -> Result<MessageRow> {
        self.insert_returning(
            "messages",
            "id,chat_id,sender_id,text,read,created_at",
            &serde_json::to_value(new)?,
        )
        .await
    }

    async fn mark_messages_read(
        &self,
        chat_id: Uuid,
        reader_id: Uuid,
        ids: Option<&[Uuid]>,
    ) -> Result<()> {
        let mut query = vec![
            ("chat_id", format!("eq.{chat_id}")),
            ("sender_id", format!("neq.{reader_id}")),
            ("read", "eq.false".to_string()),
        ];
        if let Some(ids) = ids {
            if ids.is_empty() {
                return Ok(());
            }
            query.push(("id", id_list(ids)));
        }
        self.patch_where("messages", &query, &serde_json::json!({ "read": true }))
            .await
    }

    // -- Storage ------------------------------------------------------------

    async fn upload_object(
        &self,
        bucket: &str,
        path: &str,
        bytes: Bytes,
        opts: &UploadOptions,
    ) -> Result<String> {
        let mut rb = self
            .authed(self.http.post(self.storage_url(bucket, path)))
            .header("x-upsert", if opts.upsert { "true" } else { "false" });

        if let Some(content_type) = &opts.content_type {
            rb = rb.header("Content-Type", content_type.clone());
        }
        if let Some(cache_control) = &opts.cache_control {
            rb = rb.header("Cache-Control", cache_control.clone());
        }

        let resp = rb.body(bytes).send().await?;
        Self::check_ok(resp).await?;

        tracing::debug!(bucket, path, "uploaded object");
        Ok(path.to_string())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.config.api_url, bucket, path
        )
    }

    async fn remove_object(&self, bucket: &str, path: &str) -> Result<()> {
        let resp = self
            .authed(self.http.delete(self.storage_url(bucket, path)))
            .send()
            .await?;
        Self::check_ok(resp).await
    }

    // -- Realtime -----------------------------------------------------------

    async fn subscribe_messages(&self, chat_id: Uuid) -> Result<MessageSubscription> {
        let (tx, rx) = mpsc::channel(64);

        let http = self.http.clone();
        let url = self.rest_url("messages");
        let api_key = self.config.api_key.clone();
        let token = self.access_token();
        let interval = self.config.realtime_poll;

        let task = tokio::spawn(poll_messages(http, url, api_key, token, chat_id, interval, tx));

        Ok(MessageSubscription::new(rx, Some(task)))
    }
}

/// Poll the messages collection for rows newer than the last one seen and
/// forward them in creation order.  Exits when the subscriber goes away.
async fn poll_messages(
    http: reqwest::Client,
    url: String,
    api_key: String,
    token: Option<String>,
    chat_id: Uuid,
    interval: Duration,
    tx: mpsc::Sender<MessageRow>,
) {
    let mut last_seen: DateTime<Utc> = Utc::now();

    loop {
        tokio::time::sleep(interval).await;

        let mut rb = http
            .get(url.as_str())
            .query(&[
                ("select", "id,chat_id,sender_id,text,read,created_at".to_string()),
                ("chat_id", format!("eq.{chat_id}")),
                ("created_at", format!("gt.{}", last_seen.to_rfc3339())),
                ("order", "created_at.asc".to_string()),
            ])
            .header("apikey", &api_key);
        if let Some(token) = &token {
            rb = rb.bearer_auth(token);
        }

        let rows: Vec<MessageRow> = match rb.send().await {
            Ok(resp) if resp.status().is_success() => match resp.bytes().await {
                Ok(bytes) => match serde_json::from_slice(&bytes) {
                    Ok(rows) => rows,
                    Err(e) => {
                        tracing::warn!(chat = %chat_id, error = %e, "realtime poll decode failed");
                        continue;
                    }
                },
                Err(e) => {
                    tracing::warn!(chat = %chat_id, error = %e, "realtime poll body read failed");
                    continue;
                }
            },
            Ok(resp) => {
                tracing::warn!(chat = %chat_id, status = %resp.status(), "realtime poll rejected");
                continue;
            }
            Err(e) => {
                tracing::warn!(chat = %chat_id, error = %e, "realtime poll failed");
                continue;
            }
        };

        for row in rows {
            if row.created_at > last_seen {
                last_seen = row.created_at;
            }
            if tx.send(row).await.is_err() {
                return;
            }
        }
    }
}
