//! Room registry for the rendezvous server
//!
//! This module tracks which connections have joined which room. Rooms are
//! created on first join and removed the moment their last member leaves.
//! Each room lives in its own [`DashMap`] entry, so joins and leaves on one
//! room are mutually exclusive while unrelated rooms proceed independently.

use crate::error::SignalingError;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

/// Outbound queue of a single connection
pub type PeerSender = UnboundedSender<Message>;

/// Room identifier
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoomId(pub String);

impl RoomId {
    /// Normalize a join path like "/room_name" into a room id.
    ///
    /// Every leading `/` is stripped; an empty remainder is rejected.
    pub fn from_path(path: &str) -> Result<Self, SignalingError> {
        let room = path.trim_start_matches('/');
        if room.is_empty() {
            Err(SignalingError::InvalidRoomId)
        } else {
            Ok(RoomId(room.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of one logical client session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A room member as seen by a snapshot
#[derive(Debug, Clone)]
pub struct Peer {
    pub id: ConnectionId,
    pub sender: PeerSender,
}

#[derive(Debug, Default)]
struct Room {
    members: HashMap<ConnectionId, PeerSender>,
    /// Set once the handshake signal has been handed out for this room
    peer_ready_sent: bool,
}

impl Room {
    fn snapshot_excluding(&self, id: ConnectionId) -> Vec<Peer> {
        self.members
            .iter()
            .filter(|(member, _)| **member != id)
            .map(|(member, sender)| Peer {
                id: *member,
                sender: sender.clone(),
            })
            .collect()
    }
}

/// Result of a successful join
#[derive(Debug)]
pub struct JoinOutcome {
    pub room_id: RoomId,
    /// Member count right after the join, including the joiner
    pub member_count: usize,
    /// Members to notify with `peer-ready`, taken under the room lock.
    /// Empty unless `peer_ready` is set.
    pub others: Vec<Peer>,
    /// Whether this join claimed the room's one-shot `peer-ready` signal
    pub peer_ready: bool,
}

/// Result of a leave
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaveOutcome {
    pub remaining: usize,
    pub room_deleted: bool,
}

/// The shared room registry handle
#[derive(Debug, Default, Clone)]
pub struct ServerState {
    rooms: Arc<DashMap<RoomId, Room>>,
}

impl ServerState {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to the room named by `path`, creating the room if needed.
    ///
    /// `initiator` is consumed here: if it is set and the room has just reached
    /// two members, the join claims the room's `peer-ready` signal. The claim
    /// happens under the same lock as the insert, so it can be won at most once
    /// per room lifetime.
    pub fn join(
        &self,
        path: &str,
        id: ConnectionId,
        sender: PeerSender,
        initiator: bool,
    ) -> Result<JoinOutcome, SignalingError> {
        let room_id = RoomId::from_path(path)?;
        let mut room = self.rooms.entry(room_id.clone()).or_default();

        room.members.insert(id, sender);
        let member_count = room.members.len();

        let peer_ready = initiator && member_count == 2 && !room.peer_ready_sent;
        let others = if peer_ready {
            room.peer_ready_sent = true;
            room.snapshot_excluding(id)
        } else {
            Vec::new()
        };

        Ok(JoinOutcome {
            room_id,
            member_count,
            others,
            peer_ready,
        })
    }

    /// Remove a connection from a room, deleting the room once it is empty.
    ///
    /// Leaving a room the connection is not in is a no-op.
    pub fn leave(&self, room_id: &RoomId, id: ConnectionId) -> LeaveOutcome {
        match self.rooms.entry(room_id.clone()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().members.remove(&id);
                let remaining = entry.get().members.len();
                if remaining == 0 {
                    entry.remove();
                }
                LeaveOutcome {
                    remaining,
                    room_deleted: remaining == 0,
                }
            }
            Entry::Vacant(_) => LeaveOutcome {
                remaining: 0,
                room_deleted: false,
            },
        }
    }

    /// Point-in-time copy of a room's members (empty if the room does not exist)
    pub fn members(&self, room_id: &RoomId) -> Vec<Peer> {
        self.rooms
            .get(room_id)
            .map(|room| {
                room.members
                    .iter()
                    .map(|(id, sender)| Peer {
                        id: *id,
                        sender: sender.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Current member count of a room
    pub fn room_size(&self, room_id: &RoomId) -> usize {
        self.rooms
            .get(room_id)
            .map(|room| room.members.len())
            .unwrap_or(0)
    }

    /// Whether a room currently exists
    pub fn contains_room(&self, room_id: &RoomId) -> bool {
        self.rooms.contains_key(room_id)
    }

    /// Number of live rooms
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

    fn peer() -> (ConnectionId, PeerSender, UnboundedReceiver<Message>) {
        let (tx, rx) = unbounded_channel();
        (ConnectionId::new(), tx, rx)
    }

    fn room(name: &str) -> RoomId {
        RoomId(name.to_string())
    }

    #[test]
    fn room_id_strips_leading_separators() {
        assert_eq!(RoomId::from_path("/abc").unwrap(), room("abc"));
        assert_eq!(RoomId::from_path("///abc/def").unwrap(), room("abc/def"));
    }

    #[test]
    fn empty_room_id_is_rejected() {
        assert!(matches!(
            RoomId::from_path("/"),
            Err(SignalingError::InvalidRoomId)
        ));
        assert!(matches!(
            RoomId::from_path(""),
            Err(SignalingError::InvalidRoomId)
        ));
    }

    #[test]
    fn join_with_empty_path_creates_no_room() {
        let state = ServerState::new();
        let (id, tx, _rx) = peer();

        let result = state.join("/", id, tx, true);

        assert!(matches!(result, Err(SignalingError::InvalidRoomId)));
        assert_eq!(state.room_count(), 0);
    }

    #[test]
    fn first_join_creates_room() {
        let state = ServerState::new();
        let (id, tx, _rx) = peer();

        let outcome = state.join("/abc", id, tx, false).unwrap();

        assert_eq!(outcome.room_id, room("abc"));
        assert_eq!(outcome.member_count, 1);
        assert!(outcome.others.is_empty());
        assert!(!outcome.peer_ready);
        assert!(state.contains_room(&room("abc")));
    }

    #[test]
    fn joining_twice_does_not_duplicate_member() {
        let state = ServerState::new();
        let (id, tx, _rx) = peer();

        state.join("/abc", id, tx.clone(), false).unwrap();
        let outcome = state.join("/abc", id, tx, false).unwrap();

        assert_eq!(outcome.member_count, 1);
        assert_eq!(state.room_size(&room("abc")), 1);
    }

    #[test]
    fn second_initiator_join_claims_peer_ready() {
        let state = ServerState::new();
        let (a, a_tx, _a_rx) = peer();
        let (b, b_tx, _b_rx) = peer();

        state.join("/abc", a, a_tx, false).unwrap();
        let outcome = state.join("/abc", b, b_tx, true).unwrap();

        assert!(outcome.peer_ready);
        assert_eq!(outcome.member_count, 2);
        let others: Vec<_> = outcome.others.iter().map(|p| p.id).collect();
        assert_eq!(others, vec![a]);
    }

    #[test]
    fn join_without_peer_ready_holds_no_peer_senders() {
        let state = ServerState::new();
        let (a, a_tx, _a_rx) = peer();
        let (b, b_tx, _b_rx) = peer();
        let (c, c_tx, _c_rx) = peer();

        state.join("/abc", a, a_tx, false).unwrap();
        let second = state.join("/abc", b, b_tx, false).unwrap();
        let third = state.join("/abc", c, c_tx, true).unwrap();

        assert!(second.others.is_empty());
        assert!(third.others.is_empty());
    }

    #[test]
    fn second_non_initiator_join_does_not_claim_peer_ready() {
        let state = ServerState::new();
        let (a, a_tx, _a_rx) = peer();
        let (b, b_tx, _b_rx) = peer();

        state.join("/abc", a, a_tx, true).unwrap();
        let outcome = state.join("/abc", b, b_tx, false).unwrap();

        assert!(!outcome.peer_ready);
    }

    #[test]
    fn first_initiator_join_does_not_claim_peer_ready() {
        let state = ServerState::new();
        let (a, a_tx, _a_rx) = peer();

        let outcome = state.join("/abc", a, a_tx, true).unwrap();

        assert!(!outcome.peer_ready);
    }

    #[test]
    fn third_join_never_claims_peer_ready() {
        let state = ServerState::new();
        let (a, a_tx, _a_rx) = peer();
        let (b, b_tx, _b_rx) = peer();
        let (c, c_tx, _c_rx) = peer();

        state.join("/abc", a, a_tx, false).unwrap();
        state.join("/abc", b, b_tx, false).unwrap();
        let outcome = state.join("/abc", c, c_tx, true).unwrap();

        assert_eq!(outcome.member_count, 3);
        assert!(!outcome.peer_ready);
    }

    #[test]
    fn peer_ready_is_claimed_once_per_room_lifetime() {
        let state = ServerState::new();
        let (a, a_tx, _a_rx) = peer();
        let (b, b_tx, _b_rx) = peer();
        let (c, c_tx, _c_rx) = peer();

        state.join("/abc", a, a_tx, false).unwrap();
        assert!(state.join("/abc", b, b_tx, true).unwrap().peer_ready);
        state.leave(&room("abc"), b);

        let outcome = state.join("/abc", c, c_tx, true).unwrap();
        assert_eq!(outcome.member_count, 2);
        assert!(!outcome.peer_ready);
    }

    #[test]
    fn peer_ready_resets_with_a_new_room() {
        let state = ServerState::new();
        let (a, a_tx, _a_rx) = peer();
        let (b, b_tx, _b_rx) = peer();

        state.join("/abc", a, a_tx.clone(), false).unwrap();
        assert!(state.join("/abc", b, b_tx.clone(), true).unwrap().peer_ready);
        state.leave(&room("abc"), a);
        state.leave(&room("abc"), b);
        assert!(!state.contains_room(&room("abc")));

        state.join("/abc", a, a_tx, false).unwrap();
        assert!(state.join("/abc", b, b_tx, true).unwrap().peer_ready);
    }

    #[test]
    fn leave_reports_remaining_and_deletes_empty_room() {
        let state = ServerState::new();
        let (a, a_tx, _a_rx) = peer();
        let (b, b_tx, _b_rx) = peer();
        state.join("/abc", a, a_tx, false).unwrap();
        state.join("/abc", b, b_tx, true).unwrap();

        let first = state.leave(&room("abc"), b);
        assert_eq!(
            first,
            LeaveOutcome {
                remaining: 1,
                room_deleted: false
            }
        );
        assert!(state.contains_room(&room("abc")));

        let second = state.leave(&room("abc"), a);
        assert_eq!(
            second,
            LeaveOutcome {
                remaining: 0,
                room_deleted: true
            }
        );
        assert!(!state.contains_room(&room("abc")));
        assert_eq!(state.room_count(), 0);
    }

    #[test]
    fn leave_is_idempotent() {
        let state = ServerState::new();
        let (a, a_tx, _a_rx) = peer();
        let (b, b_tx, _b_rx) = peer();
        state.join("/abc", a, a_tx, false).unwrap();
        state.join("/abc", b, b_tx, false).unwrap();

        state.leave(&room("abc"), b);
        let again = state.leave(&room("abc"), b);

        assert_eq!(again.remaining, 1);
        assert!(!again.room_deleted);
        assert_eq!(state.room_size(&room("abc")), 1);
    }

    #[test]
    fn leaving_unknown_room_or_stranger_is_noop() {
        let state = ServerState::new();
        let (a, a_tx, _a_rx) = peer();
        state.join("/abc", a, a_tx, false).unwrap();

        let unknown_room = state.leave(&room("nope"), a);
        let stranger = state.leave(&room("abc"), ConnectionId::new());

        assert!(!unknown_room.room_deleted);
        assert_eq!(stranger.remaining, 1);
        assert!(!state.contains_room(&room("nope")));
        assert_eq!(state.room_size(&room("abc")), 1);
    }

    #[test]
    fn members_of_missing_room_is_empty() {
        let state = ServerState::new();
        assert!(state.members(&room("abc")).is_empty());
    }

    #[test]
    fn members_tracks_joins_minus_leaves() {
        let state = ServerState::new();
        let peers: Vec<_> = (0..5).map(|_| peer()).collect();
        for (id, tx, _) in &peers {
            state.join("/abc", *id, tx.clone(), false).unwrap();
        }
        state.leave(&room("abc"), peers[1].0);
        state.leave(&room("abc"), peers[3].0);
        state.leave(&room("abc"), peers[3].0);

        let mut members: Vec<_> = state.members(&room("abc")).iter().map(|p| p.id).collect();
        members.sort();
        let mut expected = vec![peers[0].0, peers[2].0, peers[4].0];
        expected.sort();
        assert_eq!(members, expected);
    }

    #[test]
    fn rooms_are_independent() {
        let state = ServerState::new();
        let (a, a_tx, _a_rx) = peer();
        let (b, b_tx, _b_rx) = peer();
        state.join("/one", a, a_tx, false).unwrap();
        state.join("/two", b, b_tx, false).unwrap();

        state.leave(&room("one"), a);

        assert!(!state.contains_room(&room("one")));
        assert_eq!(state.room_size(&room("two")), 1);
    }

    #[test]
    fn concurrent_joins_and_leaves_leave_no_empty_rooms() {
        let state = ServerState::new();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let state = state.clone();
                std::thread::spawn(move || {
                    let path = format!("/room-{}", i % 2);
                    for _ in 0..200 {
                        let (id, tx, _rx) = peer();
                        let outcome = state.join(&path, id, tx, false).unwrap();
                        state.leave(&outcome.room_id, id);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(state.room_count(), 0);
    }
}
