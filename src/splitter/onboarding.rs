use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::splitter::config::SplitterConfig;
use crate::util::safe_converter::PrecheckedCast;

/// The configuration handoff sent to every joining peer, in onboarding wire order: multicast
///  IPv4 + port, header size in chunks, chunk size in bytes, the raw header, buffer size. All
///  numbers in network byte order.
pub fn write_configuration(config: &SplitterConfig, header: &Bytes, buf: &mut BytesMut) {
    let endpoint = config.mcast_endpoint();
    buf.put_slice(&endpoint.ip().octets());
    buf.put_u16(endpoint.port());
    buf.put_u16(config.header_size.prechecked_cast());
    buf.put_u16(config.chunk_size.prechecked_cast());
    buf.put_slice(header);
    buf.put_u16(config.buffer_size.prechecked_cast());
}

async fn handle_peer_arrival(mut stream: TcpStream, config: Arc<SplitterConfig>, header: Bytes) -> anyhow::Result<()> {
    let peer = stream.peer_addr()?;
    info!(?peer, "accepted connection from peer");

    let mut buf = BytesMut::new();
    write_configuration(&config, &header, &mut buf);
    stream.write_all(&buf).await?;
    stream.shutdown().await?;
    Ok(())
}

/// Accept loop of the splitter's TCP side: one task per arriving peer, all sharing the same
///  read-only configuration and header.
pub async fn accept_loop(
    listener: TcpListener,
    config: Arc<SplitterConfig>,
    header: Bytes,
    cancel_sender: broadcast::Sender<()>,
) -> anyhow::Result<()> {
    let mut cancel_receiver = cancel_sender.subscribe();

    loop {
        tokio::select! {
            r = listener.accept() => {
                match r {
                    Ok((stream, peer)) => {
                        let config = config.clone();
                        let header = header.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_peer_arrival(stream, config, header).await {
                                warn!(?peer, "error onboarding peer: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = ?e, "error accepting peer connection");
                        return Err(e.into());
                    }
                }
            }
            _ = cancel_receiver.recv() => break,
        }
    }

    Ok(())
}


#[cfg(test)]
mod test {
    use std::net::SocketAddr;
    use std::str::FromStr;

    use super::*;

    #[test]
    fn test_write_configuration_wire_layout() {
        let mut config = SplitterConfig::new(SocketAddr::from_str("127.0.0.1:4551").unwrap());
        config.port = 0x11c8; // 4552
        config.header_size = 2;
        config.chunk_size = 3;
        config.buffer_size = 256;

        let mut buf = BytesMut::new();
        write_configuration(&config, &Bytes::from_static(b"abcdef"), &mut buf);

        assert_eq!(buf.as_ref(), b"\xe0\x00\x00\x01\x11\xc8\x00\x02\x00\x03abcdef\x01\x00");
    }
}
