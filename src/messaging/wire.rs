use anyhow::anyhow;
use bytes::{BufMut, Bytes, BytesMut};
use bytes_varint::try_get_fixed::TryGetFixedSupport;

/// Every chunk datagram starts with the chunk's sequence number in network byte order. Peers
///  forward chunks verbatim, so the header survives any number of relay hops.
pub const SEQUENCE_HEADER_SIZE: usize = size_of::<u16>();

/// Tag byte of the hello control datagram. The same tag doubles as "goodbye": a hello from an
///  address that is already a team member announces that member's departure.
pub const HELLO_TAG: u8 = b'H';

/// Inbound datagrams on the team channel, classified at the transport boundary.
///
/// Chunk and control datagrams share one channel and are distinguished purely by size: a chunk
///  datagram is always exactly `SEQUENCE_HEADER_SIZE + chunk_size` bytes, everything else is a
///  control datagram identified by its first byte.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum TeamDatagram {
    /// A chunk message. `message` is the complete datagram including the sequence header, so it
    ///  can be forwarded to other peers without re-encoding.
    Chunk {
        sequence: u16,
        message: Bytes,
    },
    Hello,
    Unknown,
}

impl TeamDatagram {
    pub fn try_classify(datagram: Bytes, chunk_size: usize) -> anyhow::Result<TeamDatagram> {
        if datagram.len() == SEQUENCE_HEADER_SIZE + chunk_size {
            let mut header = datagram.as_ref();
            let sequence = header.try_get_u16()?;
            return Ok(TeamDatagram::Chunk {
                sequence,
                message: datagram,
            });
        }

        match datagram.first() {
            None => Err(anyhow!("empty datagram")),
            Some(&HELLO_TAG) => Ok(TeamDatagram::Hello),
            Some(_) => Ok(TeamDatagram::Unknown),
        }
    }
}

pub fn encode_chunk(sequence: u16, payload: &[u8], buf: &mut BytesMut) {
    buf.put_u16(sequence);
    buf.put_slice(payload);
}

pub fn hello_datagram() -> Bytes {
    Bytes::from_static(&[HELLO_TAG])
}


#[cfg(test)]
mod test {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::chunk(b"\x00\x2aabcd", 4, Some(TeamDatagram::Chunk { sequence: 42, message: Bytes::from_static(b"\x00\x2aabcd") }))]
    #[case::chunk_high_sequence(b"\xff\xffxyzw", 4, Some(TeamDatagram::Chunk { sequence: 65535, message: Bytes::from_static(b"\xff\xffxyzw") }))]
    #[case::hello(b"H", 4, Some(TeamDatagram::Hello))]
    #[case::hello_with_trailer(b"Hxx", 4, Some(TeamDatagram::Hello))]
    #[case::unknown_tag(b"Q", 4, Some(TeamDatagram::Unknown))]
    #[case::wrong_size_is_control(b"\x00\x2aabc", 4, Some(TeamDatagram::Unknown))]
    #[case::empty(b"", 4, None)]
    fn test_try_classify(#[case] datagram: &'static [u8], #[case] chunk_size: usize, #[case] expected: Option<TeamDatagram>) {
        match TeamDatagram::try_classify(Bytes::from_static(datagram), chunk_size) {
            Ok(actual) => assert_eq!(actual, expected.unwrap()),
            Err(_) => assert!(expected.is_none()),
        }
    }

    #[rstest]
    #[case(0, b"abcd", b"\x00\x00abcd")]
    #[case(1, b"abcd", b"\x00\x01abcd")]
    #[case(65535, b"", b"\xff\xff")]
    #[case(258, b"\x00\x00", b"\x01\x02\x00\x00")]
    fn test_encode_chunk(#[case] sequence: u16, #[case] payload: &[u8], #[case] expected: &[u8]) {
        let mut buf = BytesMut::new();
        encode_chunk(sequence, payload, &mut buf);
        assert_eq!(buf.as_ref(), expected);
    }

    #[test]
    fn test_encode_classify_round_trip() {
        let mut buf = BytesMut::new();
        encode_chunk(7, b"payload!", &mut buf);

        let actual = TeamDatagram::try_classify(buf.freeze(), 8).unwrap();
        assert_eq!(actual, TeamDatagram::Chunk {
            sequence: 7,
            message: Bytes::from_static(b"\x00\x07payload!"),
        });
    }

    #[test]
    fn test_hello_datagram_classifies_as_hello() {
        let actual = TeamDatagram::try_classify(hello_datagram(), 1024).unwrap();
        assert_eq!(actual, TeamDatagram::Hello);
    }
}
