use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// A member of an audio room. Keyed by socket id, not user id: the same user
/// reconnecting gets a fresh entry under the new address.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user_id: String,
    pub username: String,
    pub socket_id: String,
}

pub struct JoinOutcome {
    /// Room the connection was auto-removed from, if this join displaced one.
    pub previous: Option<String>,
    /// False when the connection was already in the target room (no-op join).
    pub joined: bool,
}

/// Chat-side room registry: which connections are subscribed to which
/// discussion. A connection holds at most one chat room at a time; joining a
/// second room leaves the first. Rooms vanish when their last member does.
#[derive(Default)]
pub struct ChatRooms {
    members: HashMap<String, HashSet<String>>,
    current: HashMap<String, String>,
}

impl ChatRooms {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&mut self, discussion_id: &str, conn_id: &str) -> JoinOutcome {
        if self.current.get(conn_id).map(String::as_str) == Some(discussion_id) {
            return JoinOutcome {
                previous: None,
                joined: false,
            };
        }

        let previous = self.remove(conn_id);
        self.members
            .entry(discussion_id.to_string())
            .or_default()
            .insert(conn_id.to_string());
        self.current
            .insert(conn_id.to_string(), discussion_id.to_string());

        JoinOutcome {
            previous,
            joined: true,
        }
    }

    /// No-op (returns false) when the connection is not a member.
    pub fn leave(&mut self, discussion_id: &str, conn_id: &str) -> bool {
        if self.current.get(conn_id).map(String::as_str) != Some(discussion_id) {
            return false;
        }
        self.remove(conn_id);
        true
    }

    pub fn disconnect(&mut self, conn_id: &str) -> Option<String> {
        self.remove(conn_id)
    }

    pub fn members(&self, discussion_id: &str) -> Vec<String> {
        self.members
            .get(discussion_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn room_count(&self) -> usize {
        self.members.len()
    }

    fn remove(&mut self, conn_id: &str) -> Option<String> {
        let room = self.current.remove(conn_id)?;
        if let Some(set) = self.members.get_mut(&room) {
            set.remove(conn_id);
            if set.is_empty() {
                self.members.remove(&room);
            }
        }
        Some(room)
    }
}

/// Audio-side registry: per-discussion participant maps keyed by socket id.
/// Unlike chat, one connection may sit in several rooms mid-handoff, so
/// disconnect cleanup scans them all.
#[derive(Default)]
pub struct AudioRooms {
    rooms: HashMap<String, HashMap<String, Participant>>,
}

impl AudioRooms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the participant and returns the roster as it stood before
    /// the join: everyone the newcomer must start negotiating with.
    pub fn join(&mut self, discussion_id: &str, participant: Participant) -> Vec<Participant> {
        let room = self.rooms.entry(discussion_id.to_string()).or_default();
        let others = room
            .values()
            .filter(|p| p.socket_id != participant.socket_id)
            .cloned()
            .collect();
        room.insert(participant.socket_id.clone(), participant);
        others
    }

    pub fn leave(&mut self, discussion_id: &str, socket_id: &str) -> Option<Participant> {
        let room = self.rooms.get_mut(discussion_id)?;
        let removed = room.remove(socket_id);
        if room.is_empty() {
            self.rooms.remove(discussion_id);
        }
        removed
    }

    pub fn members(&self, discussion_id: &str) -> Vec<Participant> {
        self.rooms
            .get(discussion_id)
            .map(|room| room.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Removes the address from every room it appears in, pruning rooms that
    /// empty out. Returns what was removed, per room.
    pub fn remove_everywhere(&mut self, socket_id: &str) -> Vec<(String, Participant)> {
        let mut removed = Vec::new();
        self.rooms.retain(|discussion_id, room| {
            if let Some(participant) = room.remove(socket_id) {
                removed.push((discussion_id.clone(), participant));
            }
            !room.is_empty()
        });
        removed
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
