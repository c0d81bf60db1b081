use std::net::SocketAddr;

use tokio::sync::broadcast;
use tracing::trace;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TeamEvent {
    MemberAdmitted(MemberAdmittedData),
    /// explicit departure, announced by the member itself
    MemberLeft(MemberLeftData),
    /// removal decided by the local engine because the member's debt crossed the threshold
    MemberEvicted(MemberEvictedData),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MemberAdmittedData {
    pub addr: SocketAddr,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MemberLeftData {
    pub addr: SocketAddr,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MemberEvictedData {
    pub addr: SocketAddr,
    pub debt: i32,
}


pub struct TeamEventNotifier {
    sender: broadcast::Sender<TeamEvent>,
}
impl TeamEventNotifier {
    pub fn new() -> TeamEventNotifier {
        let (sender, _) = broadcast::channel(128);

        TeamEventNotifier {
            sender
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TeamEvent> {
        self.sender.subscribe()
    }

    pub fn send_event(&self, event: TeamEvent) {
        trace!("event: {:?}", event);
        let _ = self.sender.send(event);
    }
}

impl Default for TeamEventNotifier {
    fn default() -> Self {
        TeamEventNotifier::new()
    }
}
