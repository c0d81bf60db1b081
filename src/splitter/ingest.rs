use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use crate::messaging::transport::{Transport, UdpTransport};
use crate::messaging::wire;
use crate::splitter::config::SplitterConfig;
use crate::splitter::onboarding;

/// The splitter: ingests the source stream and multicasts sequence-numbered chunks to the team
///  channel, while the onboarding accept loop runs concurrently (sharing only read-only
///  configuration and the ingested header).
pub struct Splitter {
    config: Arc<SplitterConfig>,
    cancel_sender: broadcast::Sender<()>,
    /// next sequence number to assign, wrapping mod 65536; only the splitter ever numbers chunks
    chunk_number: u16,
    receive_counter: u64,
}

impl Splitter {
    pub fn new(config: SplitterConfig) -> Splitter {
        let (cancel_sender, _) = broadcast::channel(1);
        Splitter {
            config: Arc::new(config),
            cancel_sender,
            chunk_number: 0,
            receive_counter: 0,
        }
    }

    /// Requests the stream, ingests the header, then runs peer onboarding and the chunk loop
    ///  until [Splitter::shutdown] or the source closes the stream.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        let mut source = self.request_the_video().await?;
        let header = self.load_the_video_header(&mut source).await?;
        info!("stream header received ({} bytes)", header.len());

        let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.config.port))).await?;
        let accept_handle = tokio::spawn(onboarding::accept_loop(
            listener,
            self.config.clone(),
            header,
            self.cancel_sender.clone(),
        ));

        // The team socket is bound to the well-known port so that peers can attribute the
        //  splitter's datagrams by their source address.
        let transport = UdpTransport::multicast(
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.config.port)),
            self.config.mcast_addr,
            self.config.ttl,
        ).await?;

        let result = self.ingest_loop(&mut source, &transport).await;

        let _ = self.cancel_sender.send(());
        match accept_handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("onboarding loop failed: {}", e),
            Err(e) => warn!("onboarding loop did not shut down cleanly: {}", e),
        }

        result
    }

    /// signal the ingest and onboarding loops to exit at their next blocking point
    pub fn shutdown(&self) {
        let _ = self.cancel_sender.send(());
    }

    async fn request_the_video(&self) -> anyhow::Result<TcpStream> {
        let mut source = TcpStream::connect(self.config.source_addr).await?;
        info!(source = ?self.config.source_addr, "connected to the source");

        let request = format!("GET /{} HTTP/1.1\r\n\r\n", self.config.channel);
        source.write_all(request.as_bytes()).await?;

        Ok(source)
    }

    async fn load_the_video_header(&mut self, source: &mut (impl AsyncRead + Unpin)) -> anyhow::Result<Bytes> {
        debug!("loading the video header");

        let mut header = vec![0u8; self.config.header_size * self.config.chunk_size];
        source.read_exact(&mut header).await?;
        self.receive_counter += self.config.header_size as u64;

        Ok(Bytes::from(header))
    }

    async fn ingest_loop(&mut self, source: &mut (impl AsyncRead + Unpin), transport: &dyn Transport) -> anyhow::Result<()> {
        let destination = SocketAddr::V4(self.config.mcast_endpoint());
        let mut payload = vec![0u8; self.config.chunk_size];
        let mut cancel_receiver = self.cancel_sender.subscribe();

        loop {
            tokio::select! {
                r = source.read_exact(&mut payload) => {
                    match r {
                        Ok(_) => {}
                        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                            info!("source closed the stream");
                            break;
                        }
                        Err(e) => return Err(e.into()),
                    }
                    self.receive_counter += 1;

                    let mut message = BytesMut::with_capacity(wire::SEQUENCE_HEADER_SIZE + payload.len());
                    wire::encode_chunk(self.chunk_number, &payload, &mut message);
                    transport.send(destination, &message).await?;

                    trace!(chunk_number = self.chunk_number, "chunk multicast to the team");
                    self.chunk_number = self.chunk_number.wrapping_add(1);
                }
                _ = cancel_receiver.recv() => break,
            }
        }

        debug!(chunks = self.receive_counter, "ingest loop stopped");
        Ok(())
    }
}


#[cfg(test)]
mod test {
    use std::str::FromStr;

    use crate::test_util::RecordingTransport;

    use super::*;

    fn test_splitter(chunk_size: usize, header_size: usize) -> Splitter {
        let mut config = SplitterConfig::new(SocketAddr::from_str("127.0.0.1:4551").unwrap());
        config.chunk_size = chunk_size;
        config.header_size = header_size;
        Splitter::new(config)
    }

    #[tokio::test]
    async fn test_ingest_numbers_and_multicasts_chunks() {
        let mut splitter = test_splitter(4, 0);
        let transport = RecordingTransport::new();
        let mut source: &[u8] = b"aaaabbbbcccc";

        splitter.ingest_loop(&mut source, &transport).await.unwrap();

        let destination = SocketAddr::V4(splitter.config.mcast_endpoint());
        assert_eq!(transport.sent(), vec![
            (destination, Bytes::from_static(b"\x00\x00aaaa")),
            (destination, Bytes::from_static(b"\x00\x01bbbb")),
            (destination, Bytes::from_static(b"\x00\x02cccc")),
        ]);
        assert_eq!(splitter.receive_counter, 3);
    }

    #[tokio::test]
    async fn test_ingest_drops_trailing_partial_chunk() {
        let mut splitter = test_splitter(4, 0);
        let transport = RecordingTransport::new();
        let mut source: &[u8] = b"aaaabb";

        splitter.ingest_loop(&mut source, &transport).await.unwrap();

        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_sequence_wraps_at_65536() {
        let mut splitter = test_splitter(1, 0);
        splitter.chunk_number = 65535;
        let transport = RecordingTransport::new();
        let mut source: &[u8] = b"xy";

        splitter.ingest_loop(&mut source, &transport).await.unwrap();

        let destination = SocketAddr::V4(splitter.config.mcast_endpoint());
        assert_eq!(transport.sent(), vec![
            (destination, Bytes::from_static(b"\xff\xffx")),
            (destination, Bytes::from_static(b"\x00\x00y")),
        ]);
    }

    #[tokio::test]
    async fn test_header_ingestion_reads_exactly_the_header() {
        let mut splitter = test_splitter(4, 2);
        let mut source: &[u8] = b"aaaabbbbrest";

        let header = splitter.load_the_video_header(&mut source).await.unwrap();

        assert_eq!(header, Bytes::from_static(b"aaaabbbb"));
        assert_eq!(source, b"rest");
    }

    #[tokio::test]
    async fn test_header_ingestion_fails_on_short_stream() {
        let mut splitter = test_splitter(4, 2);
        let mut source: &[u8] = b"aaaa";

        assert!(splitter.load_the_video_header(&mut source).await.is_err());
    }
}
