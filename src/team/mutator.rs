use std::fmt::Debug;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use rand::Rng;
use rustc_hash::FxHashSet;

use crate::messaging::wire::SEQUENCE_HEADER_SIZE;

/// Transformation applied to a chunk message immediately before it is forwarded to a specific
///  destination. The honest peer uses [IdentityMutator]; the malicious variants poison the
///  payload while keeping the sequence header intact, so downstream sequence tracking keeps
///  working and the attack stays silent.
///
/// One implementation is selected at session configuration time (see [AttackConfig]) - the relay
///  engine itself is identical for honest and malicious peers.
pub trait ChunkMutator : Debug + Send + Sync {
    fn mutate(&self, chunk: &Bytes, destination: SocketAddr) -> Bytes;
}

/// zero every payload byte, keep the sequence header
fn poisoned(chunk: &Bytes) -> Bytes {
    debug_assert!(chunk.len() >= SEQUENCE_HEADER_SIZE);

    let mut buf = BytesMut::with_capacity(chunk.len());
    buf.put_slice(&chunk[..SEQUENCE_HEADER_SIZE]);
    buf.resize(chunk.len(), 0);
    buf.freeze()
}


#[derive(Debug)]
pub struct IdentityMutator;

impl ChunkMutator for IdentityMutator {
    fn mutate(&self, chunk: &Bytes, _destination: SocketAddr) -> Bytes {
        chunk.clone()
    }
}


/// poisons every chunk for every destination
#[derive(Debug)]
pub struct PersistentPoisoner;

impl ChunkMutator for PersistentPoisoner {
    fn mutate(&self, chunk: &Bytes, _destination: SocketAddr) -> Bytes {
        poisoned(chunk)
    }
}


/// Poisons a chunk with probability `ratio`/100, per send. Stochastic degradation of service -
///  non-deterministic except at the 0 and 100 boundaries.
#[derive(Debug)]
pub struct OnOffPoisoner {
    ratio: u8,
}

impl OnOffPoisoner {
    /// `ratio` is a percentage in 0..=100
    pub fn new(ratio: u8) -> OnOffPoisoner {
        assert!(ratio <= 100, "on-off ratio is a percentage");
        OnOffPoisoner { ratio }
    }
}

impl ChunkMutator for OnOffPoisoner {
    fn mutate(&self, chunk: &Bytes, _destination: SocketAddr) -> Bytes {
        let draw: u8 = rand::thread_rng().gen_range(1..=100);
        if draw <= self.ratio {
            poisoned(chunk)
        }
        else {
            chunk.clone()
        }
    }
}


/// poisons chunks only for an explicitly configured set of victim addresses
#[derive(Debug)]
pub struct SelectivePoisoner {
    targets: FxHashSet<SocketAddr>,
}

impl SelectivePoisoner {
    pub fn new(targets: impl IntoIterator<Item = SocketAddr>) -> SelectivePoisoner {
        SelectivePoisoner {
            targets: targets.into_iter().collect(),
        }
    }
}

impl ChunkMutator for SelectivePoisoner {
    fn mutate(&self, chunk: &Bytes, destination: SocketAddr) -> Bytes {
        if self.targets.contains(&destination) {
            poisoned(chunk)
        }
        else {
            chunk.clone()
        }
    }
}


/// The attack surface of the malicious peer: three independent toggles, resolved into a single
///  [ChunkMutator] at configuration time. When several are set, precedence is persistent, then
///  on-off, then selective. All unset means an honest relay.
#[derive(Debug, Clone, Default)]
pub struct AttackConfig {
    pub persistent: bool,
    pub on_off_ratio: Option<u8>,
    pub selective_targets: Vec<SocketAddr>,
}

impl AttackConfig {
    pub fn into_mutator(self) -> Arc<dyn ChunkMutator> {
        if self.persistent {
            Arc::new(PersistentPoisoner)
        }
        else if let Some(ratio) = self.on_off_ratio {
            Arc::new(OnOffPoisoner::new(ratio))
        }
        else if !self.selective_targets.is_empty() {
            Arc::new(SelectivePoisoner::new(self.selective_targets))
        }
        else {
            Arc::new(IdentityMutator)
        }
    }
}


#[cfg(test)]
mod test {
    use rstest::rstest;

    use crate::test_util::test_peer_addr;

    use super::*;

    fn chunk() -> Bytes {
        Bytes::from_static(b"\x01\x02abcdef")
    }

    #[test]
    fn test_identity_leaves_chunk_unchanged() {
        let actual = IdentityMutator.mutate(&chunk(), test_peer_addr(1));
        assert_eq!(actual, chunk());
    }

    #[test]
    fn test_persistent_poisons_payload_keeps_header() {
        let actual = PersistentPoisoner.mutate(&chunk(), test_peer_addr(1));
        assert_eq!(actual, Bytes::from_static(b"\x01\x02\0\0\0\0\0\0"));
    }

    #[test]
    fn test_on_off_ratio_zero_never_poisons() {
        let poisoner = OnOffPoisoner::new(0);
        for _ in 0..100 {
            assert_eq!(poisoner.mutate(&chunk(), test_peer_addr(1)), chunk());
        }
    }

    #[test]
    fn test_on_off_ratio_hundred_always_poisons() {
        let poisoner = OnOffPoisoner::new(100);
        for _ in 0..100 {
            assert_eq!(poisoner.mutate(&chunk(), test_peer_addr(1)), Bytes::from_static(b"\x01\x02\0\0\0\0\0\0"));
        }
    }

    #[test]
    #[should_panic]
    fn test_on_off_ratio_above_hundred_is_rejected() {
        OnOffPoisoner::new(101);
    }

    #[test]
    fn test_selective_poisons_only_victims() {
        let poisoner = SelectivePoisoner::new([test_peer_addr(1), test_peer_addr(2)]);

        assert_eq!(poisoner.mutate(&chunk(), test_peer_addr(1)), Bytes::from_static(b"\x01\x02\0\0\0\0\0\0"));
        assert_eq!(poisoner.mutate(&chunk(), test_peer_addr(2)), Bytes::from_static(b"\x01\x02\0\0\0\0\0\0"));
        assert_eq!(poisoner.mutate(&chunk(), test_peer_addr(3)), chunk());
    }

    #[rstest]
    #[case::honest(AttackConfig::default(), "IdentityMutator")]
    #[case::persistent(AttackConfig { persistent: true, ..Default::default() }, "PersistentPoisoner")]
    #[case::on_off(AttackConfig { on_off_ratio: Some(50), ..Default::default() }, "OnOffPoisoner")]
    #[case::selective(AttackConfig { selective_targets: vec![test_peer_addr(1)], ..Default::default() }, "SelectivePoisoner")]
    #[case::persistent_wins(AttackConfig { persistent: true, on_off_ratio: Some(50), selective_targets: vec![test_peer_addr(1)] }, "PersistentPoisoner")]
    fn test_attack_config_resolution(#[case] config: AttackConfig, #[case] expected: &str) {
        let mutator = config.into_mutator();
        assert!(format!("{:?}", mutator).starts_with(expected));
    }
}
