use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::registry::Participant;

/// Events a chat client sends over `/ws/chat`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    JoinDiscussion { discussion_id: String },
    LeaveDiscussion { discussion_id: String },
    SendMessage { discussion_id: String, content: String },
    Typing { discussion_id: String },
    StopTyping { discussion_id: String },
}

/// Events the chat gateway fans out to room members.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    UserJoined {
        user_id: String,
        username: String,
    },
    UserLeft {
        user_id: String,
        username: String,
    },
    NewMessage {
        id: String,
        user_id: String,
        username: String,
        content: String,
        timestamp: DateTime<Utc>,
    },
    UserTyping {
        user_id: String,
        username: String,
    },
    UserStoppedTyping {
        user_id: String,
        username: String,
    },
    Error {
        message: String,
    },
}

/// Events an audio client sends over `/ws/audio`. Offer/answer/candidate
/// payloads are opaque: the relay routes them by `to` and never parses SDP
/// or ICE contents.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientSignal {
    JoinDiscussion { discussion_id: String },
    LeaveDiscussion { discussion_id: String },
    Offer { to: String, offer: Value },
    Answer { to: String, answer: Value },
    IceCandidate { to: String, candidate: Value },
    Speaking { discussion_id: String, is_speaking: bool },
}

/// Events the signaling relay emits. Relayed envelopes carry the sender's
/// socket id in `from` so the recipient knows whom to answer. The `speaking`
/// broadcast labels the speaker by socket id in `userId`, as the original
/// protocol does.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerSignal {
    Participants { participants: Vec<Participant> },
    UserJoined { user_id: String, username: String },
    UserLeft { socket_id: String },
    Offer { from: String, offer: Value },
    Answer { from: String, answer: Value },
    IceCandidate { from: String, candidate: Value },
    Speaking { user_id: String, is_speaking: bool },
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn chat_events_use_the_wire_names() {
        let event: ClientMessage =
            serde_json::from_str(r#"{"type":"sendMessage","discussionId":"d1","content":"hi"}"#)
                .expect("should parse");
        assert_eq!(
            event,
            ClientMessage::SendMessage {
                discussion_id: "d1".to_string(),
                content: "hi".to_string(),
            }
        );

        let notice = serde_json::to_value(ServerMessage::UserJoined {
            user_id: "u2".to_string(),
            username: "bob".to_string(),
        })
        .expect("should serialize");
        assert_eq!(
            notice,
            json!({ "type": "userJoined", "userId": "u2", "username": "bob" })
        );
    }

    #[test]
    fn signal_events_use_kebab_case_names() {
        let event: ClientSignal = serde_json::from_str(
            r#"{"type":"ice-candidate","to":"s2","candidate":{"sdpMid":"0"}}"#,
        )
        .expect("should parse");
        assert_eq!(
            event,
            ClientSignal::IceCandidate {
                to: "s2".to_string(),
                candidate: json!({ "sdpMid": "0" }),
            }
        );

        let left = serde_json::to_value(ServerSignal::UserLeft {
            socket_id: "s1".to_string(),
        })
        .expect("should serialize");
        assert_eq!(left, json!({ "type": "user-left", "socketId": "s1" }));
    }

    #[test]
    fn relayed_offers_pass_payloads_through_untouched() {
        let offer = json!({ "sdp": "v=0...", "type": "offer" });
        let relayed = serde_json::to_value(ServerSignal::Offer {
            from: "s1".to_string(),
            offer: offer.clone(),
        })
        .expect("should serialize");
        assert_eq!(relayed["offer"], offer);
    }
}
