use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;
use warp::ws::{Message, WebSocket};
use warp::{Filter, Rejection, Reply};

use crate::api::Unauthorized;
use crate::auth::{self, Claims, TokenQuery};
use crate::discussion::DiscussionAccess;
use crate::messages::{ClientMessage, ServerMessage};
use crate::registry::ChatRooms;
use crate::store::{MessageStore, MAX_CONTENT_LENGTH};

type Connections = Arc<RwLock<HashMap<String, mpsc::UnboundedSender<Message>>>>;

/// The chat gateway: subscribes connections to discussion rooms, persists
/// and fans out messages, and relays typing indicators. All room state is
/// owned here and dies with the process; clients rejoin on reconnect.
#[derive(Clone)]
pub struct ChatGateway {
    rooms: Arc<RwLock<ChatRooms>>,
    connections: Connections,
    store: Arc<dyn MessageStore>,
    access: Arc<dyn DiscussionAccess>,
}

impl ChatGateway {
    pub fn new(store: Arc<dyn MessageStore>, access: Arc<dyn DiscussionAccess>) -> Self {
        ChatGateway {
            rooms: Arc::new(RwLock::new(ChatRooms::new())),
            connections: Arc::new(RwLock::new(HashMap::new())),
            store,
            access,
        }
    }

    /// `/ws/chat` upgrade filter. The token travels in the query string and
    /// is verified before the protocol switch: a bad handshake never reaches
    /// the event handlers.
    pub fn route(
        self,
        jwt_secret: String,
    ) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
        warp::path!("ws" / "chat")
            .and(warp::query::<TokenQuery>())
            .and(warp::ws())
            .and_then(move |query: TokenQuery, ws: warp::ws::Ws| {
                let gateway = self.clone();
                let secret = jwt_secret.clone();
                async move {
                    match auth::verify(&secret, query.token.as_deref()) {
                        Ok(user) => Ok::<_, Rejection>(ws.on_upgrade(move |socket| async move {
                            gateway.handle_connection(socket, user).await;
                        })),
                        Err(e) => {
                            warn!("chat: handshake rejected: {e}");
                            Err(warp::reject::custom(Unauthorized))
                        }
                    }
                }
            })
    }

    pub async fn handle_connection(&self, ws: WebSocket, user: Claims) {
        let conn_id = Uuid::new_v4().to_string();
        let (mut ws_tx, mut ws_rx) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel();

        self.connections.write().await.insert(conn_id.clone(), tx);
        info!("chat connected: {} ({})", user.username, conn_id);

        let gateway = self.clone();
        tokio::spawn(async move {
            while let Some(result) = ws_rx.next().await {
                match result {
                    Ok(msg) => {
                        if let Ok(text) = msg.to_str() {
                            match serde_json::from_str::<ClientMessage>(text) {
                                Ok(event) => gateway.handle_event(&conn_id, &user, event).await,
                                Err(e) => {
                                    warn!("chat: ignoring malformed event from {conn_id}: {e}");
                                }
                            }
                        }
                    }
                    Err(e) => {
                        debug!("chat: socket error on {conn_id}: {e}");
                        break;
                    }
                }
            }

            gateway.handle_disconnect(&conn_id, &user).await;
        });

        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if ws_tx.send(message).await.is_err() {
                    break;
                }
            }
        });
    }

    async fn handle_event(&self, conn_id: &str, user: &Claims, event: ClientMessage) {
        match event {
            ClientMessage::JoinDiscussion { discussion_id } => {
                self.join(conn_id, user, &discussion_id).await;
            }
            ClientMessage::LeaveDiscussion { discussion_id } => {
                self.leave(conn_id, user, &discussion_id).await;
            }
            ClientMessage::SendMessage {
                discussion_id,
                content,
            } => {
                self.send_message(conn_id, user, &discussion_id, &content)
                    .await;
            }
            ClientMessage::Typing { discussion_id } => {
                self.typing(conn_id, user, &discussion_id, true).await;
            }
            ClientMessage::StopTyping { discussion_id } => {
                self.typing(conn_id, user, &discussion_id, false).await;
            }
        }
    }

    async fn join(&self, conn_id: &str, user: &Claims, discussion_id: &str) {
        if discussion_id.is_empty() {
            warn!("chat: join with empty discussion id from {conn_id}");
            return;
        }

        if !self.access.is_participant(discussion_id, &user.id).await {
            warn!(
                "chat: {} denied access to discussion {}",
                user.username, discussion_id
            );
            self.send_to(
                conn_id,
                &ServerMessage::Error {
                    message: "not a participant of this discussion".to_string(),
                },
            )
            .await;
            return;
        }

        let outcome = self.rooms.write().await.join(discussion_id, conn_id);

        // One active chat room per connection: a join while subscribed
        // elsewhere leaves the old room first.
        if let Some(previous) = outcome.previous {
            self.broadcast(&previous, &user_left(user), None).await;
        }

        if outcome.joined {
            info!(
                "chat: {} joined discussion {}",
                user.username, discussion_id
            );
            self.broadcast(
                discussion_id,
                &ServerMessage::UserJoined {
                    user_id: user.id.clone(),
                    username: user.username.clone(),
                },
                Some(conn_id),
            )
            .await;
        }
    }

    async fn leave(&self, conn_id: &str, user: &Claims, discussion_id: &str) {
        let left = self.rooms.write().await.leave(discussion_id, conn_id);
        if left {
            info!("chat: {} left discussion {}", user.username, discussion_id);
            self.broadcast(discussion_id, &user_left(user), None).await;
        }
    }

    async fn send_message(&self, conn_id: &str, user: &Claims, discussion_id: &str, content: &str) {
        let content = content.trim();
        if discussion_id.is_empty() || content.is_empty() {
            warn!("chat: dropping message with empty discussion id or content from {conn_id}");
            return;
        }
        if content.chars().count() > MAX_CONTENT_LENGTH {
            warn!(
                "chat: dropping over-long message from {} ({} chars)",
                user.username,
                content.chars().count()
            );
            return;
        }

        // Sender identity comes from the verified token, never the payload.
        let message = match self
            .store
            .append(discussion_id, &user.id, &user.username, content)
            .await
        {
            Ok(stored) => ServerMessage::NewMessage {
                id: stored.id,
                user_id: stored.sender_id,
                username: stored.sender_username,
                content: stored.content,
                timestamp: stored.created_at,
            },
            Err(e) => {
                // Live-only fallback: connected peers still get the message,
                // but it will be missing from history after a reload.
                error!(
                    "chat: failed to persist message for discussion {discussion_id}: {e} \
                     (delivering live only)"
                );
                ServerMessage::NewMessage {
                    id: Uuid::new_v4().to_string(),
                    user_id: user.id.clone(),
                    username: user.username.clone(),
                    content: content.to_string(),
                    timestamp: Utc::now(),
                }
            }
        };

        // The sender is included: its UI reconciles optimistic state against
        // the stored copy.
        self.broadcast(discussion_id, &message, None).await;
    }

    async fn typing(&self, conn_id: &str, user: &Claims, discussion_id: &str, active: bool) {
        if discussion_id.is_empty() {
            return;
        }
        let indicator = if active {
            ServerMessage::UserTyping {
                user_id: user.id.clone(),
                username: user.username.clone(),
            }
        } else {
            ServerMessage::UserStoppedTyping {
                user_id: user.id.clone(),
                username: user.username.clone(),
            }
        };
        self.broadcast(discussion_id, &indicator, Some(conn_id)).await;
    }

    async fn handle_disconnect(&self, conn_id: &str, user: &Claims) {
        let room = self.rooms.write().await.disconnect(conn_id);
        self.connections.write().await.remove(conn_id);

        if let Some(discussion_id) = room {
            self.broadcast(&discussion_id, &user_left(user), None).await;
        }
        info!("chat disconnected: {} ({})", user.username, conn_id);
    }

    async fn broadcast(&self, discussion_id: &str, message: &ServerMessage, except: Option<&str>) {
        if let Ok(text) = serde_json::to_string(message) {
            let members = self.rooms.read().await.members(discussion_id);
            let connections = self.connections.read().await;
            for conn_id in members {
                if Some(conn_id.as_str()) == except {
                    continue;
                }
                if let Some(sender) = connections.get(&conn_id) {
                    let _ = sender.send(Message::text(text.clone()));
                }
            }
        }
    }

    async fn send_to(&self, conn_id: &str, message: &ServerMessage) {
        if let Ok(text) = serde_json::to_string(message) {
            if let Some(sender) = self.connections.read().await.get(conn_id) {
                let _ = sender.send(Message::text(text));
            }
        }
    }
}

fn user_left(user: &Claims) -> ServerMessage {
    ServerMessage::UserLeft {
        user_id: user.id.clone(),
        username: user.username.clone(),
    }
}
