//! The per-peer TCP task: owns the socket after handshake and turns it into
//! a stream of events for [`super::manager::PeerManager`], generalizing the
//! teacher's `peer::handshake` + ad hoc read loop into a message-passing
//! actor per the design note against cyclic peer/manager references.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::{debug, instrument, warn};

use crate::wire::handshake::connect_and_handshake;
use crate::wire::{Handshake, Message, MessageCodec};

use super::PeerKey;

/// Something that happened on a peer connection, reported back to the
/// manager instead of the transport calling into it directly.
#[derive(Debug)]
pub enum TransportEvent {
    /// The outbound handshake completed; the peer's own handshake is
    /// attached so the manager can record its reserved bits / peer_id.
    Connected(PeerKey, Handshake),
    Message(PeerKey, Message),
    Disconnected(PeerKey),
}

/// A handle to a running transport task. Dropping every clone of `outbound`
/// (and the handle itself) ends the task's write side; a socket error or EOF
/// ends its read side, either of which tears the whole task down.
#[derive(Debug, Clone)]
pub struct PeerTransport {
    outbound: mpsc::UnboundedSender<Message>,
}

impl PeerTransport {
    /// Connects to `addr`, performs the BEP-3 handshake, and spawns the
    /// read/write loop. Events (including the initial `Connected`) are
    /// reported on `events_tx`; the returned handle is how the manager sends
    /// messages back out to the peer.
    #[instrument(level = "debug", skip(info_hash, peer_id, events_tx))]
    pub async fn connect(
        addr: SocketAddr,
        info_hash: [u8; 20],
        peer_id: [u8; 20],
        connect_timeout: Duration,
        events_tx: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Self, crate::wire::WireError> {
        let (stream, theirs) = connect_and_handshake(addr, info_hash, peer_id, connect_timeout).await?;
        Ok(Self::spawn(addr, stream, theirs, events_tx))
    }

    /// Wraps an already-handshaken stream (used for inbound connections,
    /// where the listener performs the handshake before handing off the
    /// socket) and spawns the read/write loop.
    pub fn spawn(
        key: PeerKey,
        stream: TcpStream,
        their_handshake: Handshake,
        events_tx: mpsc::UnboundedSender<TransportEvent>,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let _ = events_tx.send(TransportEvent::Connected(key, their_handshake));
        tokio::spawn(run(key, stream, outbound_rx, events_tx));
        PeerTransport { outbound: outbound_tx }
    }

    /// Queues `msg` for the peer. Returns `false` if the transport task has
    /// already exited (the manager should then treat the peer as gone).
    pub fn send(&self, msg: Message) -> bool {
        self.outbound.send(msg).is_ok()
    }
}

#[instrument(level = "debug", skip(stream, outbound_rx, events_tx), fields(peer = %key))]
async fn run(
    key: PeerKey,
    stream: TcpStream,
    mut outbound_rx: mpsc::UnboundedReceiver<Message>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
) {
    let framed = tokio_util::codec::Framed::new(stream, MessageCodec::default());
    let (mut sink, mut incoming) = framed.split();

    loop {
        tokio::select! {
            frame = incoming.next() => {
                match frame {
                    Some(Ok(msg)) => {
                        if events_tx.send(TransportEvent::Message(key, msg)).is_err() {
                            break;
                        }
                    }
                    Some(Err(err)) => {
                        warn!(%err, "peer connection error");
                        break;
                    }
                    None => {
                        debug!("peer closed connection");
                        break;
                    }
                }
            }
            outgoing = outbound_rx.recv() => {
                match outgoing {
                    Some(msg) => {
                        if sink.send(msg).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    let _ = events_tx.send(TransportEvent::Disconnected(key));
}
