use std::collections::HashMap;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;
use warp::ws::{Message, WebSocket};
use warp::{Filter, Rejection, Reply};

use crate::api::Unauthorized;
use crate::auth::{self, Claims, TokenQuery};
use crate::discussion::DiscussionAccess;
use crate::messages::{ClientSignal, ServerSignal};
use crate::registry::{AudioRooms, Participant};

type Connections = Arc<RwLock<HashMap<String, mpsc::UnboundedSender<Message>>>>;

/// Designates which of two peers sends the offer when both discover each
/// other at once: the socket id that sorts greater by native string ordering.
/// Both ends of a pair evaluate this independently and must agree, so the
/// rule must never change without a protocol version bump.
pub fn offer_initiator<'a>(a: &'a str, b: &'a str) -> &'a str {
    if a > b {
        a
    } else {
        b
    }
}

/// The audio signaling relay: tracks per-discussion rosters and forwards
/// WebRTC negotiation envelopes between peers by socket address. Peers
/// connect to each other directly in a mesh, so rooms are expected to stay
/// small; the relay never touches media.
#[derive(Clone)]
pub struct SignalRelay {
    rooms: Arc<RwLock<AudioRooms>>,
    connections: Connections,
    access: Arc<dyn DiscussionAccess>,
}

impl SignalRelay {
    pub fn new(access: Arc<dyn DiscussionAccess>) -> Self {
        SignalRelay {
            rooms: Arc::new(RwLock::new(AudioRooms::new())),
            connections: Arc::new(RwLock::new(HashMap::new())),
            access,
        }
    }

    /// `/ws/audio` upgrade filter, authenticated the same way as the chat
    /// channel but against its own connection.
    pub fn route(
        self,
        jwt_secret: String,
    ) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
        warp::path!("ws" / "audio")
            .and(warp::query::<TokenQuery>())
            .and(warp::ws())
            .and_then(move |query: TokenQuery, ws: warp::ws::Ws| {
                let relay = self.clone();
                let secret = jwt_secret.clone();
                async move {
                    match auth::verify(&secret, query.token.as_deref()) {
                        Ok(user) => Ok::<_, Rejection>(ws.on_upgrade(move |socket| async move {
                            relay.handle_connection(socket, user).await;
                        })),
                        Err(e) => {
                            warn!("audio: handshake rejected: {e}");
                            Err(warp::reject::custom(Unauthorized))
                        }
                    }
                }
            })
    }

    pub async fn handle_connection(&self, ws: WebSocket, user: Claims) {
        let socket_id = Uuid::new_v4().to_string();
        let (mut ws_tx, mut ws_rx) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel();

        self.connections
            .write()
            .await
            .insert(socket_id.clone(), tx);
        info!("audio connected: {} ({})", user.username, socket_id);

        let relay = self.clone();
        tokio::spawn(async move {
            while let Some(result) = ws_rx.next().await {
                match result {
                    Ok(msg) => {
                        if let Ok(text) = msg.to_str() {
                            match serde_json::from_str::<ClientSignal>(text) {
                                Ok(event) => relay.handle_event(&socket_id, &user, event).await,
                                Err(e) => {
                                    warn!("audio: ignoring malformed event from {socket_id}: {e}");
                                }
                            }
                        }
                    }
                    Err(e) => {
                        debug!("audio: socket error on {socket_id}: {e}");
                        break;
                    }
                }
            }

            relay.handle_disconnect(&socket_id, &user).await;
        });

        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if ws_tx.send(message).await.is_err() {
                    break;
                }
            }
        });
    }

    async fn handle_event(&self, socket_id: &str, user: &Claims, event: ClientSignal) {
        match event {
            ClientSignal::JoinDiscussion { discussion_id } => {
                self.join(socket_id, user, &discussion_id).await;
            }
            ClientSignal::LeaveDiscussion { discussion_id } => {
                self.leave(socket_id, user, &discussion_id).await;
            }
            ClientSignal::Offer { to, offer } => {
                self.relay_to(socket_id, &to, RelayedPayload::Offer(offer))
                    .await;
            }
            ClientSignal::Answer { to, answer } => {
                self.relay_to(socket_id, &to, RelayedPayload::Answer(answer))
                    .await;
            }
            ClientSignal::IceCandidate { to, candidate } => {
                self.relay_to(socket_id, &to, RelayedPayload::Candidate(candidate))
                    .await;
            }
            ClientSignal::Speaking {
                discussion_id,
                is_speaking,
            } => {
                self.speaking(socket_id, &discussion_id, is_speaking).await;
            }
        }
    }

    async fn join(&self, socket_id: &str, user: &Claims, discussion_id: &str) {
        if discussion_id.is_empty() {
            warn!("audio: join with empty discussion id from {socket_id}");
            return;
        }

        if !self.access.is_participant(discussion_id, &user.id).await {
            warn!(
                "audio: {} denied access to discussion {}",
                user.username, discussion_id
            );
            return;
        }

        info!(
            "audio: {} joining room {} as {}",
            user.username, discussion_id, socket_id
        );

        let roster = self.rooms.write().await.join(
            discussion_id,
            Participant {
                user_id: user.id.clone(),
                username: user.username.clone(),
                socket_id: socket_id.to_string(),
            },
        );

        // The full roster goes to the joiner only; it initiates negotiation
        // with everyone already present. The rest get a lightweight notice.
        self.send_to(socket_id, &ServerSignal::Participants { participants: roster })
            .await;
        self.broadcast(
            discussion_id,
            &ServerSignal::UserJoined {
                user_id: user.id.clone(),
                username: user.username.clone(),
            },
            Some(socket_id),
        )
        .await;
    }

    async fn leave(&self, socket_id: &str, user: &Claims, discussion_id: &str) {
        if discussion_id.is_empty() {
            return;
        }
        let removed = self.rooms.write().await.leave(discussion_id, socket_id);
        if removed.is_some() {
            info!("audio: {} leaving room {}", user.username, discussion_id);
            self.broadcast(
                discussion_id,
                &ServerSignal::UserLeft {
                    socket_id: socket_id.to_string(),
                },
                None,
            )
            .await;
        }
    }

    async fn relay_to(&self, from: &str, to: &str, payload: RelayedPayload) {
        let envelope = match payload {
            RelayedPayload::Offer(offer) => ServerSignal::Offer {
                from: from.to_string(),
                offer,
            },
            RelayedPayload::Answer(answer) => ServerSignal::Answer {
                from: from.to_string(),
                answer,
            },
            RelayedPayload::Candidate(candidate) => ServerSignal::IceCandidate {
                from: from.to_string(),
                candidate,
            },
        };

        // Delivery to a vanished address is a no-op; WebRTC renegotiates.
        if !self.send_to(to, &envelope).await {
            debug!("audio: dropped relay from {from} to absent peer {to}");
        }
    }

    async fn speaking(&self, socket_id: &str, discussion_id: &str, is_speaking: bool) {
        if discussion_id.is_empty() {
            return;
        }
        self.broadcast(
            discussion_id,
            &ServerSignal::Speaking {
                user_id: socket_id.to_string(),
                is_speaking,
            },
            Some(socket_id),
        )
        .await;
    }

    async fn handle_disconnect(&self, socket_id: &str, user: &Claims) {
        let removed = self.rooms.write().await.remove_everywhere(socket_id);
        self.connections.write().await.remove(socket_id);

        for (discussion_id, _) in removed {
            self.broadcast(
                &discussion_id,
                &ServerSignal::UserLeft {
                    socket_id: socket_id.to_string(),
                },
                None,
            )
            .await;
        }
        info!("audio disconnected: {} ({})", user.username, socket_id);
    }

    async fn broadcast(&self, discussion_id: &str, signal: &ServerSignal, except: Option<&str>) {
        if let Ok(text) = serde_json::to_string(signal) {
            let members = self.rooms.read().await.members(discussion_id);
            let connections = self.connections.read().await;
            for participant in members {
                if Some(participant.socket_id.as_str()) == except {
                    continue;
                }
                if let Some(sender) = connections.get(&participant.socket_id) {
                    let _ = sender.send(Message::text(text.clone()));
                }
            }
        }
    }

    async fn send_to(&self, socket_id: &str, signal: &ServerSignal) -> bool {
        if let Ok(text) = serde_json::to_string(signal) {
            if let Some(sender) = self.connections.read().await.get(socket_id) {
                return sender.send(Message::text(text)).is_ok();
            }
        }
        false
    }
}

enum RelayedPayload {
    Offer(Value),
    Answer(Value),
    Candidate(Value),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discussion::OpenAccess;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn claims(id: &str, username: &str) -> Claims {
        Claims {
            id: id.to_string(),
            username: username.to_string(),
            email: None,
            exp: u64::MAX,
        }
    }

    fn relay() -> SignalRelay {
        SignalRelay::new(Arc::new(OpenAccess))
    }

    async fn attach(relay: &SignalRelay, socket_id: &str) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        relay
            .connections
            .write()
            .await
            .insert(socket_id.to_string(), tx);
        rx
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<ServerSignal> {
        let mut events = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            let text = msg.to_str().expect("text frame");
            events.push(serde_json::from_str(text).expect("valid server signal"));
        }
        events
    }

    #[tokio::test]
    async fn late_joiner_gets_the_roster_and_others_get_one_notice() {
        let rl = relay();
        let mut rx_a = attach(&rl, "s-a").await;
        let mut rx_b = attach(&rl, "s-b").await;
        let mut rx_c = attach(&rl, "s-c").await;

        rl.join("s-a", &claims("u1", "alice"), "d1").await;
        rl.join("s-b", &claims("u2", "bob"), "d1").await;
        drain(&mut rx_a);
        drain(&mut rx_b);

        rl.join("s-c", &claims("u3", "carol"), "d1").await;

        let to_c = drain(&mut rx_c);
        assert_eq!(to_c.len(), 1);
        match &to_c[0] {
            ServerSignal::Participants { participants } => {
                let mut ids: Vec<&str> =
                    participants.iter().map(|p| p.socket_id.as_str()).collect();
                ids.sort_unstable();
                assert_eq!(ids, vec!["s-a", "s-b"]);
            }
            other => panic!("expected participants, got {other:?}"),
        }

        let notice = ServerSignal::UserJoined {
            user_id: "u3".to_string(),
            username: "carol".to_string(),
        };
        assert_eq!(drain(&mut rx_a), vec![notice.clone()]);
        assert_eq!(drain(&mut rx_b), vec![notice]);
    }

    #[tokio::test]
    async fn disconnect_leaves_every_room_and_prunes_empties() {
        let rl = relay();
        let _rx_a = attach(&rl, "s-a").await;
        let mut rx_b = attach(&rl, "s-b").await;

        // a alone in x, a and b in y
        rl.join("s-a", &claims("u1", "alice"), "x").await;
        rl.join("s-a", &claims("u1", "alice"), "y").await;
        rl.join("s-b", &claims("u2", "bob"), "y").await;
        drain(&mut rx_b);

        rl.handle_disconnect("s-a", &claims("u1", "alice")).await;

        assert_eq!(
            drain(&mut rx_b),
            vec![ServerSignal::UserLeft {
                socket_id: "s-a".to_string(),
            }]
        );

        // x was pruned: a later join starts from an empty roster.
        let mut rx_c = attach(&rl, "s-c").await;
        rl.join("s-c", &claims("u3", "carol"), "x").await;
        match drain(&mut rx_c).first() {
            Some(ServerSignal::Participants { participants }) => {
                assert!(participants.is_empty());
            }
            other => panic!("expected participants, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn leave_prunes_an_emptied_room() {
        let rl = relay();
        let _rx_a = attach(&rl, "s-a").await;

        rl.join("s-a", &claims("u1", "alice"), "d1").await;
        rl.leave("s-a", &claims("u1", "alice"), "d1").await;

        assert_eq!(rl.rooms.read().await.room_count(), 0);
    }

    #[tokio::test]
    async fn offers_are_forwarded_verbatim_with_the_sender_attached() {
        let rl = relay();
        let _rx_a = attach(&rl, "s-a").await;
        let mut rx_b = attach(&rl, "s-b").await;

        let offer = json!({ "type": "offer", "sdp": "v=0..." });
        rl.relay_to("s-a", "s-b", RelayedPayload::Offer(offer.clone()))
            .await;

        assert_eq!(
            drain(&mut rx_b),
            vec![ServerSignal::Offer {
                from: "s-a".to_string(),
                offer,
            }]
        );
    }

    #[tokio::test]
    async fn relaying_to_a_vanished_peer_is_a_noop() {
        let rl = relay();
        let _rx_a = attach(&rl, "s-a").await;

        rl.relay_to("s-a", "s-gone", RelayedPayload::Answer(json!({})))
            .await;
        // Nothing to assert beyond not panicking; the envelope is dropped.
    }

    #[tokio::test]
    async fn speaking_reaches_the_rest_of_the_room_only() {
        let rl = relay();
        let mut rx_a = attach(&rl, "s-a").await;
        let mut rx_b = attach(&rl, "s-b").await;
        let mut rx_c = attach(&rl, "s-c").await;

        rl.join("s-a", &claims("u1", "alice"), "d1").await;
        rl.join("s-b", &claims("u2", "bob"), "d1").await;
        rl.join("s-c", &claims("u3", "carol"), "other").await;
        drain(&mut rx_a);
        drain(&mut rx_b);
        drain(&mut rx_c);

        rl.speaking("s-a", "d1", true).await;

        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(
            drain(&mut rx_b),
            vec![ServerSignal::Speaking {
                user_id: "s-a".to_string(),
                is_speaking: true,
            }]
        );
        assert!(drain(&mut rx_c).is_empty());
    }

    #[test]
    fn both_sides_agree_on_the_offer_initiator() {
        assert_eq!(offer_initiator("s-aaa", "s-zzz"), "s-zzz");
        assert_eq!(offer_initiator("s-zzz", "s-aaa"), "s-zzz");
        // Uuid-shaped ids behave the same way.
        let (a, b) = ("91f3c2d0-0000-4000-8000-1", "2b7e1516-0000-4000-8000-2");
        assert_eq!(offer_initiator(a, b), offer_initiator(b, a));
    }
}
