//! WebSocket transport: accept loop and per-connection plumbing.
//!
//! Each accepted TCP connection is upgraded to a WebSocket on its own Tokio
//! task. The request path and query are captured during the handshake and
//! become the connection's [`JoinRequest`]. The socket is then split: a
//! writer task drains the connection's outbound queue into the sink, while
//! [`run_session`] consumes the read half. When the session returns, a close
//! frame is queued so the writer answers the close handshake and exits.

use crate::handler::{JoinRequest, run_session};
use crate::state::{ConnectionId, ServerState};
use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::unbounded_channel;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::Uri;
use tracing::{debug, error, info, warn};

/// Bind the listener for the configured address.
///
/// # Errors
///
/// Returns an error if the port is in use or cannot be bound.
pub async fn bind(addr: SocketAddr) -> anyhow::Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind WebSocket listener on {addr}"))
}

/// Accept connections until `shutdown` resolves.
///
/// Accept errors are logged and the loop keeps going.
pub async fn serve<F>(listener: TcpListener, state: ServerState, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()>,
{
    let local_addr = listener
        .local_addr()
        .context("listener has no local address")?;
    info!("rendezvous server listening on {local_addr}");
    info!("connect with ws://{local_addr}/<room-id>");

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown requested; stopping accept loop");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    let state = state.clone();
                    tokio::spawn(async move {
                        handle_connection(stream, peer_addr, state).await;
                    });
                }
                Err(e) => error!("accept error: {e}"),
            },
        }
    }

    Ok(())
}

async fn handle_connection(stream: TcpStream, peer_addr: SocketAddr, state: ServerState) {
    let mut uri = Uri::default();
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        uri = request.uri().clone();
        Ok(response)
    };

    let ws_stream = match accept_hdr_async(stream, callback).await {
        Ok(ws_stream) => ws_stream,
        Err(e) => {
            warn!("WebSocket handshake failed with {peer_addr}: {e}");
            return;
        }
    };

    let id = ConnectionId::new();
    let request = JoinRequest::new(uri.path(), uri.query());
    debug!("connection {id} from {peer_addr}");

    let (mut sink, inbound) = ws_stream.split();
    let (outbound, mut queue) = unbounded_channel::<Message>();

    let writer = tokio::spawn(async move {
        while let Some(message) = queue.recv().await {
            let closing = message.is_close();
            if let Err(e) = sink.send(message).await {
                debug!("connection {id}: send failed: {e}");
                break;
            }
            if closing {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let closer = outbound.clone();
    if let Err(e) = run_session(id, request, inbound, outbound, &state).await {
        debug!("connection {id} ended: {e}");
    }

    // Ends the writer even if a peer still holds a clone of the queue.
    let _ = closer.send(Message::Close(None));
    let _ = writer.await;
    info!("connection {id} from {peer_addr} closed");
}
