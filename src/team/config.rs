use std::net::SocketAddr;

/// Per-session constants of a peer's relay engine. They are handed over once during onboarding
///  (see [crate::peer::onboarding]) and never change while the session lives.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// The splitter's datagram source address. Chunks arriving from this address trigger burst
    ///  flushing; the splitter is never a team member.
    pub splitter_addr: SocketAddr,
    pub chunk_size: usize,
    pub buffer_size: usize,
    /// A member whose debt strictly exceeds this is evicted as unsupportive.
    pub max_chunk_debt: i32,
}

impl SessionConfig {
    pub fn new(splitter_addr: SocketAddr) -> SessionConfig {
        SessionConfig {
            splitter_addr,
            chunk_size: 1024,
            buffer_size: 256,
            max_chunk_debt: 128,
        }
    }
}
