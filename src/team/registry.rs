use std::net::SocketAddr;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::info;

use crate::team::events::{MemberAdmittedData, MemberEvictedData, MemberLeftData, TeamEvent, TeamEventNotifier};

/// The team from one peer's perspective: an ordered list of member addresses (the round-robin
///  forwarding order) plus a debt counter per member.
///
/// Both structures are mutated as one unit - the address set of the debt map is identical to the
///  address set of the member list at all times.
///
/// Debt counts chunks forwarded to a member without reciprocal evidence of cooperation. It is
///  signed and has no floor: a member that relays more than it receives accumulates credit.
pub struct TeamRegistry {
    members: Vec<SocketAddr>,
    debt: FxHashMap<SocketAddr, i32>,
    max_chunk_debt: i32,
    event_notifier: Arc<TeamEventNotifier>,
}

impl TeamRegistry {
    pub fn new(max_chunk_debt: i32, event_notifier: Arc<TeamEventNotifier>) -> TeamRegistry {
        TeamRegistry {
            members: Vec::new(),
            debt: FxHashMap::default(),
            max_chunk_debt,
            event_notifier,
        }
    }

    /// Admit an address to the team with a fresh debt of zero. Returns whether the address was
    ///  newly added, so the caller can log how the member was discovered.
    pub fn admit(&mut self, addr: SocketAddr) -> bool {
        if self.debt.contains_key(&addr) {
            return false;
        }

        self.members.push(addr);
        self.debt.insert(addr, 0);
        self.event_notifier.send_event(TeamEvent::MemberAdmitted(MemberAdmittedData { addr }));

        debug_assert!(self.is_consistent());
        true
    }

    /// Decrement a member's debt: the member was observed actively relaying a chunk.
    pub fn forgive(&mut self, addr: SocketAddr) {
        if let Some(debt) = self.debt.get_mut(&addr) {
            *debt -= 1;
        }
    }

    /// Increment a member's debt: a chunk was forwarded to it.
    pub fn charge(&mut self, addr: SocketAddr) {
        if let Some(debt) = self.debt.get_mut(&addr) {
            *debt += 1;
        }
    }

    /// Remove the member if its debt strictly exceeds the threshold. Returns whether it was
    ///  evicted. This is the only removal trigger besides an explicit goodbye.
    pub fn evict_if_overdrawn(&mut self, addr: SocketAddr) -> bool {
        let Some(&debt) = self.debt.get(&addr) else {
            return false;
        };
        if debt <= self.max_chunk_debt {
            return false;
        }

        self.forget(addr);
        info!(?addr, debt, "removed by unsupportive ({} losses)", debt);
        self.event_notifier.send_event(TeamEvent::MemberEvicted(MemberEvictedData { addr, debt }));

        debug_assert!(self.is_consistent());
        true
    }

    /// Explicit removal, on a goodbye from the member itself.
    pub fn remove(&mut self, addr: SocketAddr) -> bool {
        if !self.debt.contains_key(&addr) {
            return false;
        }

        self.forget(addr);
        self.event_notifier.send_event(TeamEvent::MemberLeft(MemberLeftData { addr }));

        debug_assert!(self.is_consistent());
        true
    }

    fn forget(&mut self, addr: SocketAddr) {
        self.members.retain(|m| *m != addr);
        self.debt.remove(&addr);
    }

    /// Members in round-robin forwarding order.
    pub fn members(&self) -> &[SocketAddr] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, addr: SocketAddr) -> bool {
        self.debt.contains_key(&addr)
    }

    pub fn debt_of(&self, addr: SocketAddr) -> Option<i32> {
        self.debt.get(&addr).copied()
    }

    fn is_consistent(&self) -> bool {
        self.members.len() == self.debt.len()
            && self.members.iter().all(|m| self.debt.contains_key(m))
    }
}
