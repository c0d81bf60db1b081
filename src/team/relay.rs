use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, trace, warn};

use crate::messaging::transport::Transport;
use crate::messaging::wire::{TeamDatagram, SEQUENCE_HEADER_SIZE};
use crate::team::chunk_store::ChunkStore;
use crate::team::config::SessionConfig;
use crate::team::mutator::ChunkMutator;
use crate::team::registry::TeamRegistry;

/// What [RelayEngine::process_message] did with one inbound datagram.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ProcessOutcome {
    /// a chunk with this sequence number was stored (and may have triggered forwarding)
    Chunk(u16),
    /// a control datagram was handled; no chunk was processed
    NoChunk,
    /// the datagram was malformed and discarded
    Invalid,
}

/// The protocol core of a peer: consumes inbound datagrams in arrival order, maintains team
///  membership and debt, stores chunks, and forwards the reference chunk to other members.
///
/// Forwarding has two modes. In steady state every incoming chunk pays for exactly one outgoing
///  chunk: the current reference chunk goes to the next member in round-robin order, which bounds
///  per-message work regardless of team size ("congestion avoidance"). A chunk arriving from the
///  splitter instead signals "catch up": whatever is still owed from the current round is flushed
///  in one burst, and the fresh chunk becomes the new reference.
///
/// All state is exclusively owned. The engine must be driven by a single logical consumer of the
///  peer's inbound channel; with that invariant there is nothing to lock.
pub struct RelayEngine {
    config: Arc<SessionConfig>,
    registry: TeamRegistry,
    chunk_store: ChunkStore,
    mutator: Arc<dyn ChunkMutator>,
    transport: Arc<dyn Transport>,
    /// Index of the next member owed a forward in the current round; values in
    ///  `0..=registry.len()`. Reset to 0 when a burst flush completes.
    round_robin_cursor: usize,
    /// The reference chunk for forwarding: the complete message (header included) of the most
    ///  recent splitter-originated chunk. `None` until the splitter has been heard once; nothing
    ///  is forwarded before that.
    previous: Option<Bytes>,
    received_counter: u64,
    forwarded_counter: u64,
}

impl RelayEngine {
    pub fn new(
        config: Arc<SessionConfig>,
        registry: TeamRegistry,
        mutator: Arc<dyn ChunkMutator>,
        transport: Arc<dyn Transport>,
    ) -> RelayEngine {
        let chunk_store = ChunkStore::new(config.buffer_size);
        RelayEngine {
            config,
            registry,
            chunk_store,
            mutator,
            transport,
            round_robin_cursor: 0,
            previous: None,
            received_counter: 0,
            forwarded_counter: 0,
        }
    }

    /// Process one inbound datagram. Malformed and unrecognized datagrams are reported through
    ///  the outcome, not as errors; `Err` means the transport failed while forwarding, and the
    ///  caller decides whether to retry, drop or log - the engine itself never retries.
    pub async fn process_message(&mut self, datagram: Bytes, sender: SocketAddr) -> anyhow::Result<ProcessOutcome> {
        let datagram = match TeamDatagram::try_classify(datagram, self.config.chunk_size) {
            Ok(datagram) => datagram,
            Err(e) => {
                warn!(?sender, "discarding malformed datagram: {}", e);
                return Ok(ProcessOutcome::Invalid);
            }
        };

        match datagram {
            TeamDatagram::Chunk { sequence, message } => {
                self.on_chunk(sequence, message, sender).await?;
                Ok(ProcessOutcome::Chunk(sequence))
            }
            TeamDatagram::Hello => {
                self.on_hello(sender);
                Ok(ProcessOutcome::NoChunk)
            }
            TeamDatagram::Unknown => {
                debug!(?sender, "ignoring unrecognized control datagram");
                Ok(ProcessOutcome::NoChunk)
            }
        }
    }

    /// A hello from an unknown address admits it to the team. A hello from a current member is
    ///  its goodbye - the tag does double duty on the wire, and membership state at receipt is
    ///  what disambiguates. NB: a duplicated hello therefore removes a healthy member.
    fn on_hello(&mut self, sender: SocketAddr) {
        if self.registry.admit(sender) {
            debug!(?sender, "added by [hello]");
        }
        else {
            info!(?sender, "received [goodbye]");
            self.registry.remove(sender);
        }
    }

    async fn on_chunk(&mut self, sequence: u16, message: Bytes, sender: SocketAddr) -> anyhow::Result<()> {
        trace!(?sender, sequence, "chunk received");

        self.chunk_store.put(sequence, message.slice(SEQUENCE_HEADER_SIZE..));
        self.received_counter += 1;

        if sender == self.config.splitter_addr {
            self.flush_backlog().await?;
            self.previous = Some(message);
        }
        else if self.registry.admit(sender) {
            debug!(?sender, sequence, "added by chunk");
        }
        else {
            // a relayed chunk from a known member is evidence of cooperation
            self.registry.forgive(sender);
        }

        self.feed_next().await
    }

    /// Burst mode: flush whatever the current round still owes. Only meaningful while a round is
    ///  mid-flight (cursor in `1..len`); a completed or never-started round flushes nothing.
    ///
    /// The pass runs over a snapshot of the member list; evictions are applied after the pass, so
    ///  removals cannot skip or re-target anyone within it.
    async fn flush_backlog(&mut self) -> anyhow::Result<()> {
        if self.round_robin_cursor == 0 {
            return Ok(());
        }

        // cursor > 0 implies a reference chunk exists
        let Some(previous) = self.previous.clone() else {
            self.round_robin_cursor = 0;
            return Ok(());
        };

        let members = self.registry.members();
        let backlog = if self.round_robin_cursor < members.len() {
            members[self.round_robin_cursor..].to_vec()
        }
        else {
            Vec::new()
        };

        for target in &backlog {
            self.forward(&previous, *target).await?;
            self.registry.charge(*target);
        }
        for target in backlog {
            self.registry.evict_if_overdrawn(target);
        }

        self.round_robin_cursor = 0;
        Ok(())
    }

    /// Steady state: one forward per incoming chunk, spread over the membership in round-robin
    ///  order.
    async fn feed_next(&mut self) -> anyhow::Result<()> {
        if self.round_robin_cursor >= self.registry.len() {
            return Ok(());
        }
        let Some(previous) = self.previous.clone() else {
            return Ok(());
        };

        let target = self.registry.members()[self.round_robin_cursor];
        self.forward(&previous, target).await?;
        self.registry.charge(target);

        if !self.registry.evict_if_overdrawn(target) {
            self.round_robin_cursor += 1;
        }
        // on eviction the removal has already shifted the round's next member into the cursor slot

        Ok(())
    }

    async fn forward(&mut self, chunk: &Bytes, target: SocketAddr) -> anyhow::Result<()> {
        let message = self.mutator.mutate(chunk, target);
        self.transport.send(target, &message).await?;
        self.forwarded_counter += 1;
        trace!(?target, "chunk forwarded");
        Ok(())
    }

    pub fn registry(&self) -> &TeamRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut TeamRegistry {
        &mut self.registry
    }

    pub fn chunk_store(&self) -> &ChunkStore {
        &self.chunk_store
    }

    pub fn received_counter(&self) -> u64 {
        self.received_counter
    }

    pub fn forwarded_counter(&self) -> u64 {
        self.forwarded_counter
    }
}
