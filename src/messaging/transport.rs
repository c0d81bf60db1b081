use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[cfg(test)] use mockall::automock;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tracing::{error, trace, warn};

/// Largest datagram the receive loop accepts. The chunk wire format stays far below this, but the
///  receive buffer must cover whatever arrives on the team port.
pub const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait Transport : Sync + Send {
    async fn send(&self, to: SocketAddr, buf: &[u8]) -> anyhow::Result<()>;

    async fn recv_loop(&self, handler: Arc<dyn MessageHandler>) -> anyhow::Result<()>;

    fn cancel_recv_loop(&self);
}

/// This trait decouples the implementation of message transport from the handling of a message
///  once it is received.
///
/// It is passed around as an `Arc<dyn ...>` to minimize dependencies of [Transport] implementations.
#[async_trait::async_trait]
pub trait MessageHandler : Sync + Send {
    async fn handle_message(&self, buf: &[u8], sender: SocketAddr);
}


/// UDP send/receive on a single bound socket.
///
/// Send and receive share one socket on purpose: team members are identified by the source
///  address of their datagrams, so all traffic of a node must originate from its team port.
pub struct UdpTransport {
    local_addr: SocketAddr,
    socket: Arc<UdpSocket>,
    cancel_sender: broadcast::Sender<()>,
    send_counter: AtomicU64,
    receive_counter: AtomicU64,
}

impl UdpTransport {
    pub async fn new(bind_addr: SocketAddr) -> anyhow::Result<UdpTransport> {
        Self::bound(bind_addr, None, 1)
    }

    /// Bind a transport that is also subscribed to an IPv4 multicast group, for receiving the
    ///  splitter's team channel. `ttl` applies to outgoing multicast datagrams.
    pub async fn multicast(bind_addr: SocketAddr, group: Ipv4Addr, ttl: u32) -> anyhow::Result<UdpTransport> {
        Self::bound(bind_addr, Some(group), ttl)
    }

    fn bound(bind_addr: SocketAddr, multicast_group: Option<Ipv4Addr>, ttl: u32) -> anyhow::Result<UdpTransport> {
        let domain = if bind_addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;

        if let Some(group) = multicast_group {
            socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
            socket.set_multicast_ttl_v4(ttl)?;
        }

        socket.bind(&bind_addr.into())?;

        let socket = UdpSocket::from_std(socket.into())?;
        let local_addr = socket.local_addr()?;

        let (cancel_sender, _) = broadcast::channel(1);

        Ok(UdpTransport {
            local_addr,
            socket: Arc::new(socket),
            cancel_sender,
            send_counter: AtomicU64::new(0),
            receive_counter: AtomicU64::new(0),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn send_counter(&self) -> u64 {
        self.send_counter.load(Ordering::Relaxed)
    }

    pub fn receive_counter(&self) -> u64 {
        self.receive_counter.load(Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl Transport for UdpTransport {
    async fn send(&self, to: SocketAddr, buf: &[u8]) -> anyhow::Result<()> {
        self.socket.send_to(buf, to).await?;
        self.send_counter.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn recv_loop(&self, handler: Arc<dyn MessageHandler>) -> anyhow::Result<()> {
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        let mut cancel_receiver = self.cancel_sender.subscribe();

        trace!(addr = ?self.local_addr, "starting UDP receive loop");

        loop {
            tokio::select! {
                r = self.socket.recv_from(&mut buf) => {
                    match r {
                        Ok((len, from)) => {
                            self.receive_counter.fetch_add(1, Ordering::Relaxed);
                            handler.handle_message(&buf[..len], from).await;
                        }
                        Err(e) => {
                            error!(error = ?e, "error receiving from datagram socket");
                            return Err(e.into());
                        }
                    }
                }
                _ = cancel_receiver.recv() => break,
            }
        }

        Ok(())
    }

    fn cancel_recv_loop(&self) {
        if let Err(err) = self.cancel_sender.send(()) {
            warn!(?err, "error canceling receive loop");
        }
    }
}
