//! Per-connection relay for the rendezvous server
//!
//! A connection moves through `Joining → Active → Closing → Closed`. While
//! active, every data frame it sends is forwarded unmodified to every other
//! member of its room. Room membership is released when the session ends,
//! whichever way it ends.

use crate::error::{ClientRequestError, SignalingError};
use crate::protocol::{ClientEnvelope, ServerEvent};
use crate::state::{ConnectionId, JoinOutcome, Peer, PeerSender, RoomId, ServerState};
use futures_util::{Stream, StreamExt};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, warn};

/// Close reason sent when the join path names no room
pub const ROOM_ID_REQUIRED: &str = "Room ID required";

/// What a client asked for when it connected
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    /// Request path, e.g. "/room_name"
    pub path: String,
    pub initiator: bool,
}

impl JoinRequest {
    /// Build a join request from the handshake path and query string
    pub fn new(path: &str, query: Option<&str>) -> Self {
        Self {
            path: path.to_string(),
            initiator: get_query_param(query, "initiator") == Some("true"),
        }
    }
}

/// Get query parameter from URI
fn get_query_param<'a>(query: Option<&'a str>, key: &str) -> Option<&'a str> {
    query?.split('&').find_map(|pair| {
        let mut parts = pair.splitn(2, '=');
        let k = parts.next()?;
        let v = parts.next()?;
        if k == key { Some(v) } else { None }
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Joining,
    Active,
    Closing,
    Closed,
}

impl Phase {
    fn can_enter(self, next: Phase) -> bool {
        matches!(
            (self, next),
            (Phase::Joining, Phase::Active)
                | (Phase::Joining, Phase::Closed)
                | (Phase::Active, Phase::Closing)
                | (Phase::Closing, Phase::Closed)
        )
    }
}

/// Per-connection state threaded through the session
#[derive(Debug)]
struct SessionContext {
    id: ConnectionId,
    phase: Phase,
}

impl SessionContext {
    fn transition(&mut self, next: Phase) {
        debug_assert!(
            self.phase.can_enter(next),
            "illegal transition {:?} -> {:?}",
            self.phase,
            next
        );
        debug!("connection {}: {:?} -> {:?}", self.id, self.phase, next);
        self.phase = next;
    }
}

/// Room membership held by an active session; leaving happens on drop
struct Membership<'a> {
    state: &'a ServerState,
    room_id: RoomId,
    id: ConnectionId,
}

impl Drop for Membership<'_> {
    fn drop(&mut self) {
        let outcome = self.state.leave(&self.room_id, self.id);
        if outcome.room_deleted {
            info!("room {} deleted", self.room_id);
        } else {
            info!(
                "connection {} left room {} ({} remaining)",
                self.id, self.room_id, outcome.remaining
            );
        }
    }
}

/// Drive one connection from join to disconnect.
///
/// `inbound` yields the frames received from the client; `outbound` is the
/// client's own send queue, which is also what the registry hands to peers.
pub async fn run_session<S>(
    id: ConnectionId,
    request: JoinRequest,
    mut inbound: S,
    outbound: PeerSender,
    state: &ServerState,
) -> Result<(), SignalingError>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    let mut ctx = SessionContext {
        id,
        phase: Phase::Joining,
    };
    info!(
        "new connection {id}: path={}, initiator={}",
        request.path, request.initiator
    );

    let joined = match admit(id, &request, &outbound, state) {
        Ok(joined) => joined,
        Err(e) => {
            warn!("connection {id} rejected: {e}");
            if matches!(e, SignalingError::InvalidRoomId) {
                let _ = outbound.send(Message::Close(Some(CloseFrame {
                    code: CloseCode::Policy,
                    reason: ROOM_ID_REQUIRED.into(),
                })));
            }
            ctx.transition(Phase::Closed);
            return Err(e);
        }
    };

    let membership = Membership {
        state,
        room_id: joined.room_id.clone(),
        id,
    };
    ctx.transition(Phase::Active);

    let result = run_active(&ctx, joined, &mut inbound, state).await;

    ctx.transition(Phase::Closing);
    drop(membership);
    ctx.transition(Phase::Closed);
    result
}

/// Greet the connection and add it to its room.
///
/// `connected` is queued before the join makes this connection visible to
/// other members, so it is always the first frame the client receives.
fn admit(
    id: ConnectionId,
    request: &JoinRequest,
    outbound: &PeerSender,
    state: &ServerState,
) -> Result<JoinOutcome, SignalingError> {
    let room_id = RoomId::from_path(&request.path)?;
    let connected = ServerEvent::Connected {
        room_id: room_id.clone(),
    }
    .to_message()?;
    outbound
        .send(connected)
        .map_err(|_| SignalingError::DeliveryFailure(id))?;

    state.join(room_id.as_str(), id, outbound.clone(), request.initiator)
}

async fn run_active<S>(
    ctx: &SessionContext,
    joined: JoinOutcome,
    inbound: &mut S,
    state: &ServerState,
) -> Result<(), SignalingError>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    let JoinOutcome {
        room_id,
        others,
        peer_ready,
        ..
    } = joined;

    if peer_ready {
        info!("room {room_id}: initiator {} arrived, sending peer-ready", ctx.id);
        fan_out(&others, &ServerEvent::PeerReady.to_message()?);
    }
    drop(others);

    loop {
        let message = match next_frame(inbound).await {
            Ok(message) => message,
            Err(ClientRequestError::UnsupportedType) => continue,
            Err(ClientRequestError::Close) => {
                debug!("connection {} closed by client", ctx.id);
                return Ok(());
            }
            Err(ClientRequestError::WebSocket(e)) => {
                warn!("connection {}: transport fault: {e}", ctx.id);
                return Err(SignalingError::TransportFault(e));
            }
        };

        match ClientEnvelope::parse(&message.clone().into_data()) {
            Ok(envelope) => info!("message in room {room_id}: {}", envelope.kind()),
            Err(e) => warn!("connection {}: {e}", ctx.id),
        }

        let peers: Vec<Peer> = state
            .members(&room_id)
            .into_iter()
            .filter(|peer| peer.id != ctx.id)
            .collect();
        fan_out(&peers, &message);
    }
}

/// Receive the next data frame, mapping stream end and close frames to `Close`
async fn next_frame<S>(inbound: &mut S) -> Result<Message, ClientRequestError>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    match inbound.next().await {
        Some(Ok(message @ (Message::Text(_) | Message::Binary(_)))) => Ok(message),
        Some(Ok(Message::Close(_))) | None => Err(ClientRequestError::Close),
        Some(Ok(_)) => Err(ClientRequestError::UnsupportedType),
        Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
            Err(ClientRequestError::Close)
        }
        Some(Err(e)) => Err(ClientRequestError::WebSocket(e)),
    }
}

/// Best-effort send of `message` to each peer
fn fan_out(peers: &[Peer], message: &Message) {
    for peer in peers {
        if let Err(e) = deliver(peer, message.clone()) {
            debug!("{e}");
        }
    }
}

fn deliver(peer: &Peer, message: Message) -> Result<(), SignalingError> {
    peer.sender
        .send(message)
        .map_err(|_| SignalingError::DeliveryFailure(peer.id))
}
