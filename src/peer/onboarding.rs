use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use bytes::{Buf, Bytes};
use bytes_varint::try_get_fixed::TryGetFixedSupport;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::team::config::SessionConfig;
use crate::util::safe_converter::SafeCast;

/// Everything a peer needs to participate in a session, as handed over by the splitter during
///  onboarding.
#[derive(Debug, Clone)]
pub struct JoinedSession {
    pub session: SessionConfig,
    pub mcast_endpoint: SocketAddrV4,
    pub header: Bytes,
}

/// the fixed-size front of the handoff, up to but not including the header bytes
#[derive(Debug, Eq, PartialEq)]
struct ConfigPrefix {
    mcast_endpoint: SocketAddrV4,
    header_size_in_chunks: u16,
    chunk_size: u16,
}

const CONFIG_PREFIX_SIZE: usize = 10;

fn try_parse_prefix(buf: &mut impl Buf) -> anyhow::Result<ConfigPrefix> {
    let ip = Ipv4Addr::from(buf.try_get_u32()?);
    let port = buf.try_get_u16()?;
    let header_size_in_chunks = buf.try_get_u16()?;
    let chunk_size = buf.try_get_u16()?;

    Ok(ConfigPrefix {
        mcast_endpoint: SocketAddrV4::new(ip, port),
        header_size_in_chunks,
        chunk_size,
    })
}

/// Connect to the splitter and receive the session configuration. The splitter closes the
///  connection once the handoff is complete; membership traffic happens over UDP afterwards.
pub async fn join_via_splitter(splitter: SocketAddr) -> anyhow::Result<JoinedSession> {
    let mut stream = TcpStream::connect(splitter).await?;
    info!(?splitter, "connected to the splitter");

    receive_configuration(splitter, &mut stream).await
}

async fn receive_configuration(splitter: SocketAddr, stream: &mut (impl AsyncRead + Unpin)) -> anyhow::Result<JoinedSession> {
    let mut prefix_buf = [0u8; CONFIG_PREFIX_SIZE];
    stream.read_exact(&mut prefix_buf).await?;
    let prefix = try_parse_prefix(&mut prefix_buf.as_ref())?;

    let header_size_in_chunks: usize = prefix.header_size_in_chunks.safe_cast();
    let chunk_size: usize = prefix.chunk_size.safe_cast();
    let header_size_in_bytes = header_size_in_chunks * chunk_size;
    let mut header = vec![0u8; header_size_in_bytes];
    stream.read_exact(&mut header).await?;

    let mut tail = [0u8; 2];
    stream.read_exact(&mut tail).await?;
    let buffer_size = u16::from_be_bytes(tail);

    debug!(
        mcast_endpoint = ?prefix.mcast_endpoint,
        chunk_size = prefix.chunk_size,
        buffer_size,
        "received session configuration ({} header bytes)", header_size_in_bytes,
    );

    let mut session = SessionConfig::new(splitter);
    session.chunk_size = prefix.chunk_size.safe_cast();
    session.buffer_size = buffer_size.safe_cast();

    Ok(JoinedSession {
        session,
        mcast_endpoint: prefix.mcast_endpoint,
        header: Bytes::from(header),
    })
}


#[cfg(test)]
mod test {
    use std::str::FromStr;

    use bytes::BytesMut;
    use rstest::rstest;

    use crate::splitter::config::SplitterConfig;
    use crate::splitter::onboarding::write_configuration;

    use super::*;

    #[rstest]
    #[case::mcast_channel(b"\xe0\x00\x00\x01\x11\xc8\x00\x0a\x04\x00", ConfigPrefix {
        mcast_endpoint: SocketAddrV4::from_str("224.0.0.1:4552").unwrap(),
        header_size_in_chunks: 10,
        chunk_size: 1024,
    })]
    #[case::zeroes(b"\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00", ConfigPrefix {
        mcast_endpoint: SocketAddrV4::from_str("0.0.0.0:0").unwrap(),
        header_size_in_chunks: 0,
        chunk_size: 0,
    })]
    fn test_try_parse_prefix(#[case] mut buf: &[u8], #[case] expected: ConfigPrefix) {
        let actual = try_parse_prefix(&mut buf).unwrap();
        assert_eq!(actual, expected);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_try_parse_prefix_too_short() {
        let mut buf: &[u8] = b"\xe0\x00\x00\x01\x11";
        assert!(try_parse_prefix(&mut buf).is_err());
    }

    #[tokio::test]
    async fn test_handoff_round_trip() {
        let mut config = SplitterConfig::new(SocketAddr::from_str("127.0.0.1:4551").unwrap());
        config.chunk_size = 4;
        config.header_size = 3;
        config.buffer_size = 16;
        let header = Bytes::from_static(b"abcdefghijkl");

        let mut buf = BytesMut::new();
        write_configuration(&config, &header, &mut buf);

        let splitter = SocketAddr::from_str("127.0.0.1:4552").unwrap();
        let joined = receive_configuration(splitter, &mut buf.as_ref()).await.unwrap();

        assert_eq!(joined.session.splitter_addr, splitter);
        assert_eq!(joined.session.chunk_size, 4);
        assert_eq!(joined.session.buffer_size, 16);
        assert_eq!(joined.mcast_endpoint, config.mcast_endpoint());
        assert_eq!(joined.header, header);
    }

    #[tokio::test]
    async fn test_truncated_handoff_is_an_error() {
        let mut config = SplitterConfig::new(SocketAddr::from_str("127.0.0.1:4551").unwrap());
        config.chunk_size = 4;
        config.header_size = 3;
        let header = Bytes::from_static(b"abcdefghijkl");

        let mut buf = BytesMut::new();
        write_configuration(&config, &header, &mut buf);
        let truncated = &buf[..buf.len() - 4];

        let splitter = SocketAddr::from_str("127.0.0.1:4552").unwrap();
        assert!(receive_configuration(splitter, &mut &truncated[..]).await.is_err());
    }
}
