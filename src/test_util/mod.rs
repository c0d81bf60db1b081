use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use bytes::Bytes;

use crate::messaging::transport::{MessageHandler, Transport};

/// convenience for unit test code: create a [SocketAddr] based on a number, the same number
///  generating the same address and different numbers different addresses
pub fn test_peer_addr(number: u16) -> SocketAddr {
    SocketAddrV4::new(Ipv4Addr::LOCALHOST, 16000 + number).into()
}


/// A [Transport] that records outbound datagrams in send order instead of touching the network.
///  It has no receive path.
pub struct RecordingTransport {
    sent: Mutex<Vec<(SocketAddr, Bytes)>>,
}

impl RecordingTransport {
    pub fn new() -> RecordingTransport {
        RecordingTransport {
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<(SocketAddr, Bytes)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, addr: SocketAddr) -> Vec<Bytes> {
        self.sent.lock().unwrap().iter()
            .filter(|(to, _)| *to == addr)
            .map(|(_, buf)| buf.clone())
            .collect()
    }
}

impl Default for RecordingTransport {
    fn default() -> Self {
        RecordingTransport::new()
    }
}

#[async_trait::async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, to: SocketAddr, buf: &[u8]) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push((to, Bytes::copy_from_slice(buf)));
        Ok(())
    }

    async fn recv_loop(&self, _handler: Arc<dyn MessageHandler>) -> anyhow::Result<()> {
        Err(anyhow!("RecordingTransport has no receive path"))
    }

    fn cancel_recv_loop(&self) {}
}
