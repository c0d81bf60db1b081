use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::messaging::transport::{MessageHandler, Transport, UdpTransport};
use crate::messaging::wire;
use crate::peer::onboarding::{self, JoinedSession};
use crate::team::config::SessionConfig;
use crate::team::events::{TeamEvent, TeamEventNotifier};
use crate::team::mutator::ChunkMutator;
use crate::team::registry::TeamRegistry;
use crate::team::relay::{ProcessOutcome, RelayEngine};

/// how many inbound datagrams may pile up before the receive loop is backpressured
const INBOUND_QUEUE_SIZE: usize = 256;
const DELIVERY_QUEUE_SIZE: usize = 256;

struct InboundDatagram {
    buf: Bytes,
    sender: SocketAddr,
}

/// Feeds received datagrams into the node's single-consumer queue. All engine state is mutated
///  only by the task draining that queue, which is what makes the engine lock-free.
struct EnqueueHandler {
    sender: mpsc::Sender<InboundDatagram>,
}

#[async_trait::async_trait]
impl MessageHandler for EnqueueHandler {
    async fn handle_message(&self, buf: &[u8], sender: SocketAddr) {
        let datagram = InboundDatagram {
            buf: Bytes::copy_from_slice(buf),
            sender,
        };
        if self.sender.send(datagram).await.is_err() {
            warn!("inbound queue closed, dropping datagram");
        }
    }
}


/// A peer node: joins a team via the splitter's TCP side, then relays chunks on the UDP team
///  channel through its [RelayEngine]. Received chunks are handed to the local player seam in
///  sequence order.
pub struct PeerNode {
    config: Arc<SessionConfig>,
    engine: RelayEngine,
    transport: Arc<UdpTransport>,
    event_notifier: Arc<TeamEventNotifier>,
    header: Bytes,
    delivery_sender: mpsc::Sender<Bytes>,
    /// play-out cursor: the next sequence number owed to the player; `None` until the first
    ///  chunk arrives
    played_chunk: Option<u16>,
}

impl PeerNode {
    /// Onboard with the splitter and bind the team socket. `mutator` is [crate::team::mutator::IdentityMutator]
    ///  for an honest peer; the malicious variants differ in nothing but this parameter.
    pub async fn join(splitter: SocketAddr, mutator: Arc<dyn ChunkMutator>) -> anyhow::Result<(PeerNode, mpsc::Receiver<Bytes>)> {
        let joined = onboarding::join_via_splitter(splitter).await?;
        Self::from_joined_session(joined, mutator).await
    }

    pub async fn from_joined_session(joined: JoinedSession, mutator: Arc<dyn ChunkMutator>) -> anyhow::Result<(PeerNode, mpsc::Receiver<Bytes>)> {
        let JoinedSession { session, mcast_endpoint, header } = joined;
        let config = Arc::new(session);

        // bound to the multicast port and joined to the group, so both the splitter's multicast
        //  and other peers' unicast datagrams arrive here
        let transport = Arc::new(UdpTransport::multicast(
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, mcast_endpoint.port())),
            *mcast_endpoint.ip(),
            1,
        ).await?);

        let event_notifier = Arc::new(TeamEventNotifier::new());
        let registry = TeamRegistry::new(config.max_chunk_debt, event_notifier.clone());
        let engine = RelayEngine::new(config.clone(), registry, mutator, transport.clone() as Arc<dyn Transport>);

        let (delivery_sender, delivery_receiver) = mpsc::channel(DELIVERY_QUEUE_SIZE);

        let node = PeerNode {
            config,
            engine,
            transport,
            event_notifier,
            header,
            delivery_sender,
            played_chunk: None,
        };
        Ok((node, delivery_receiver))
    }

    /// the stream header received during onboarding, to be fed to the player before any chunks
    pub fn header(&self) -> &Bytes {
        &self.header
    }

    pub fn team_events(&self) -> broadcast::Receiver<TeamEvent> {
        self.event_notifier.subscribe()
    }

    /// handle for requesting cooperative shutdown of a running node
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            transport: self.transport.clone(),
        }
    }

    /// Announce ourselves and process inbound datagrams until shutdown. Datagrams are consumed
    ///  strictly in arrival order by this one task - the engine relies on that.
    pub async fn run(mut self) -> anyhow::Result<()> {
        self.transport.send(self.config.splitter_addr, &wire::hello_datagram()).await?;
        info!(me = ?self.transport.local_addr(), "joined the team, processing chunks");

        // The queue closes when the receive loop ends (its handler owns the only sender), which
        //  is what terminates the processing loop on shutdown.
        let (inbound_sender, mut inbound_receiver) = mpsc::channel(INBOUND_QUEUE_SIZE);

        let recv_handle = {
            let transport = self.transport.clone();
            let handler = Arc::new(EnqueueHandler { sender: inbound_sender });
            tokio::spawn(async move {
                transport.recv_loop(handler).await
            })
        };

        while let Some(InboundDatagram { buf, sender }) = inbound_receiver.recv().await {
            match self.engine.process_message(buf, sender).await {
                Ok(ProcessOutcome::Chunk(sequence)) => self.feed_player(sequence).await,
                Ok(_) => {}
                Err(e) => {
                    // transport trouble while forwarding; the chunk itself is already stored
                    error!("error forwarding chunk: {}", e);
                }
            }
        }

        // announce departure - the hello tag doubles as goodbye for a known member
        if let Err(e) = self.transport.send(self.config.splitter_addr, &wire::hello_datagram()).await {
            debug!("could not send goodbye: {}", e);
        }

        match recv_handle.await {
            Ok(r) => r,
            Err(e) => {
                error!("receive loop panicked: {}", e);
                Err(e.into())
            }
        }
    }

    /// Hand all consecutively available chunks to the player, starting at the play-out cursor.
    ///  A gap (lost chunk) blocks delivery until the slot is either filled or overwritten.
    async fn feed_player(&mut self, sequence: u16) {
        if self.played_chunk.is_none() {
            self.played_chunk = Some(sequence);
        }

        while let Some(cursor) = self.played_chunk {
            let Some(payload) = self.engine.chunk_store().get(cursor).cloned() else {
                break;
            };
            if self.delivery_sender.send(payload).await.is_err() {
                debug!("player side closed, dropping delivery");
                break;
            }
            self.played_chunk = Some(cursor.wrapping_add(1));
        }
    }
}


pub struct ShutdownHandle {
    transport: Arc<UdpTransport>,
}

impl ShutdownHandle {
    /// Stops the receive loop; the processing loop drains what is queued and exits after
    ///  announcing the departure.
    pub fn shutdown(&self) {
        self.transport.cancel_recv_loop();
    }
}


#[cfg(test)]
mod test {
    use std::str::FromStr;

    use bytes::BytesMut;

    use crate::team::mutator::IdentityMutator;
    use crate::test_util::{test_peer_addr, RecordingTransport};

    use super::*;

    async fn test_node() -> (PeerNode, mpsc::Receiver<Bytes>, Arc<RecordingTransport>) {
        let mut session = SessionConfig::new(test_peer_addr(99));
        session.chunk_size = 4;
        session.buffer_size = 8;

        let joined = JoinedSession {
            session,
            mcast_endpoint: std::net::SocketAddrV4::from_str("239.255.0.1:0").unwrap(),
            header: Bytes::from_static(b"hdr"),
        };

        let (mut node, delivery) = PeerNode::from_joined_session(joined, Arc::new(IdentityMutator)).await.unwrap();

        // swap the engine's outbound path for a recording fake; the node's own socket stays
        //  unused in these tests
        let recording = Arc::new(RecordingTransport::new());
        let registry = TeamRegistry::new(node.config.max_chunk_debt, node.event_notifier.clone());
        node.engine = RelayEngine::new(node.config.clone(), registry, Arc::new(IdentityMutator), recording.clone() as Arc<dyn Transport>);

        (node, delivery, recording)
    }

    fn chunk_message(sequence: u16, payload: &[u8]) -> Bytes {
        let mut buf = BytesMut::new();
        wire::encode_chunk(sequence, payload, &mut buf);
        buf.freeze()
    }

    #[tokio::test]
    async fn test_in_order_chunks_are_delivered_to_the_player() {
        let (mut node, mut delivery, _) = test_node().await;

        for (sequence, payload) in [(5u16, b"aaaa"), (6u16, b"bbbb")] {
            let outcome = node.engine.process_message(chunk_message(sequence, payload), test_peer_addr(99)).await.unwrap();
            assert_eq!(outcome, ProcessOutcome::Chunk(sequence));
            node.feed_player(sequence).await;
        }

        assert_eq!(delivery.recv().await.unwrap(), Bytes::from_static(b"aaaa"));
        assert_eq!(delivery.recv().await.unwrap(), Bytes::from_static(b"bbbb"));
        assert!(delivery.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_delivery_stalls_on_a_gap_and_resumes_when_filled() {
        let (mut node, mut delivery, _) = test_node().await;

        node.engine.process_message(chunk_message(5, b"aaaa"), test_peer_addr(99)).await.unwrap();
        node.feed_player(5).await;
        assert_eq!(delivery.recv().await.unwrap(), Bytes::from_static(b"aaaa"));

        // chunk 6 is missing: 7 arrives but must not be delivered yet
        node.engine.process_message(chunk_message(7, b"cccc"), test_peer_addr(99)).await.unwrap();
        node.feed_player(7).await;
        assert!(delivery.try_recv().is_err());

        // the gap fills, delivery catches up in order
        node.engine.process_message(chunk_message(6, b"bbbb"), test_peer_addr(99)).await.unwrap();
        node.feed_player(6).await;
        assert_eq!(delivery.recv().await.unwrap(), Bytes::from_static(b"bbbb"));
        assert_eq!(delivery.recv().await.unwrap(), Bytes::from_static(b"cccc"));
    }

    #[tokio::test]
    async fn test_header_is_available_for_the_player() {
        let (node, _delivery, _) = test_node().await;
        assert_eq!(node.header(), &Bytes::from_static(b"hdr"));
    }
}
