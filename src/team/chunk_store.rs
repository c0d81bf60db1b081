use bytes::Bytes;

use crate::util::safe_converter::SafeCast;

#[derive(Debug, Clone, Eq, PartialEq)]
struct StoredChunk {
    sequence: u16,
    payload: Bytes,
}

/// Fixed-capacity ring buffer over chunk payloads, indexed by sequence number modulo capacity.
///
/// Overwriting a slot is lossy by design: a chunk that was never forwarded before its slot is
///  reused is simply gone. `get` checks the stored sequence number, so a lookup after wraparound
///  never returns a stale payload under the wrong sequence.
pub struct ChunkStore {
    slots: Vec<Option<StoredChunk>>,
}

impl ChunkStore {
    /// `capacity` is the session's buffer size, received once from the splitter during onboarding.
    pub fn new(capacity: usize) -> ChunkStore {
        assert!(capacity > 0, "chunk store capacity must be positive");
        ChunkStore {
            slots: vec![None; capacity],
        }
    }

    pub fn put(&mut self, sequence: u16, payload: Bytes) {
        let slot = self.slot_of(sequence);
        self.slots[slot] = Some(StoredChunk { sequence, payload });
    }

    pub fn get(&self, sequence: u16) -> Option<&Bytes> {
        let slot = self.slot_of(sequence);
        match &self.slots[slot] {
            Some(stored) if stored.sequence == sequence => Some(&stored.payload),
            _ => None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn slot_of(&self, sequence: u16) -> usize {
        let sequence: usize = sequence.safe_cast();
        sequence % self.slots.len()
    }
}
