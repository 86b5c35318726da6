//! An in-process transport over tokio channels.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::trace;

use super::{Role, SessionId, Slot, Transfer};

#[derive(Debug, Error, PartialEq, Eq)]
/// Errors of the in-memory transport.
pub enum TransferError {
    #[error("the peer hung up")]
    Closed,
    #[error("no peer with role {0}")]
    UnknownRole(Role),
    #[error("message for {0} arrived on the wrong session")]
    ForeignSession(Slot),
}

/// A message together with its address.
pub type Envelope = (Slot, Vec<u8>);

#[derive(Debug)]
/// One end of an in-memory transport.
///
/// Messages that arrive for a slot nobody is waiting for yet are stashed until they are asked for.
/// Messages for discarded slots are dropped on arrival.
pub struct MemoryTransfer {
    role: Role,
    session: SessionId,
    outbox: mpsc::UnboundedSender<Envelope>,
    inbox: mpsc::UnboundedReceiver<Envelope>,
    pending: HashMap<Slot, Vec<u8>>,
    discarded: HashSet<Slot>,
}

/// Creates connected host and guest ends of a transport for one session.
pub fn pair(session: SessionId) -> (MemoryTransfer, MemoryTransfer) {
    let (to_guest, guest_inbox) = mpsc::unbounded_channel();
    let (to_host, host_inbox) = mpsc::unbounded_channel();
    let host = MemoryTransfer {
        role: Role::Host,
        session,
        outbox: to_guest,
        inbox: host_inbox,
        pending: HashMap::new(),
        discarded: HashSet::new(),
    };
    let guest = MemoryTransfer {
        role: Role::Guest,
        session,
        outbox: to_host,
        inbox: guest_inbox,
        pending: HashMap::new(),
        discarded: HashSet::new(),
    };
    (host, guest)
}

impl MemoryTransfer {
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Gets the number of received messages nobody asked for yet.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Waits for the next message regardless of its slot, stashed messages first.
    ///
    /// Returns `None` once the peer hung up and nothing is stashed.
    pub async fn next_envelope(&mut self) -> Option<Envelope> {
        let stashed = self.pending.keys().next().copied();
        if let Some(slot) = stashed {
            return self.pending.remove(&slot).map(|value| (slot, value));
        }
        loop {
            let (slot, value) = self.inbox.recv().await?;
            if !self.drop_discarded(slot) {
                return Some((slot, value));
            }
        }
    }

    fn drop_discarded(&mut self, slot: Slot) -> bool {
        let discarded = self.discarded.remove(&slot);
        if discarded {
            trace!("{} drops late message for {}", self.role, slot);
        }
        discarded
    }
}

#[async_trait]
impl Transfer for MemoryTransfer {
    type Error = TransferError;

    async fn remote(&mut self, value: Vec<u8>, role: Role, slot: Slot) -> Result<(), Self::Error> {
        if role == self.role {
            return Err(TransferError::UnknownRole(role));
        }
        if slot.session != self.session {
            return Err(TransferError::ForeignSession(slot));
        }
        trace!("{} sends {} bytes on {}", self.role, value.len(), slot);
        self.outbox
            .send((slot, value))
            .map_err(|_| TransferError::Closed)
    }

    async fn get(&mut self, slot: Slot) -> Result<Vec<u8>, Self::Error> {
        if let Some(value) = self.pending.remove(&slot) {
            return Ok(value);
        }
        loop {
            let (received, value) = self.inbox.recv().await.ok_or(TransferError::Closed)?;
            if received == slot {
                return Ok(value);
            }
            if !self.drop_discarded(received) {
                trace!("{} stashes message for {}", self.role, received);
                self.pending.insert(received, value);
            }
        }
    }

    fn discard(&mut self, slot: Slot) {
        if self.pending.remove(&slot).is_none() {
            self.discarded.insert(slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Channel;

    fn slot(channel: Channel, sample: u64) -> Slot {
        Slot {
            session: SessionId::from(1),
            channel,
            epoch: 0,
            sample,
        }
    }

    #[tokio::test]
    async fn test_out_of_order_messages_are_stashed() {
        let (mut host, mut guest) = pair(SessionId::from(1));
        for sample in 0..3 {
            guest
                .remote(vec![sample as u8], Role::Host, slot(Channel::CipherResidual, sample))
                .await
                .unwrap();
        }

        assert_eq!(
            host.get(slot(Channel::CipherResidual, 2)).await.unwrap(),
            vec![2]
        );
        assert_eq!(host.pending(), 2);
        assert_eq!(
            host.get(slot(Channel::CipherResidual, 0)).await.unwrap(),
            vec![0]
        );
        assert_eq!(
            host.get(slot(Channel::CipherResidual, 1)).await.unwrap(),
            vec![1]
        );
        assert_eq!(host.pending(), 0);
    }

    #[tokio::test]
    async fn test_discarded_messages_are_dropped() {
        let (mut host, mut guest) = pair(SessionId::from(1));
        host.discard(slot(Channel::CipherResidual, 0));
        for sample in 0..3 {
            guest
                .remote(vec![sample as u8], Role::Host, slot(Channel::CipherResidual, sample))
                .await
                .unwrap();
        }
        assert_eq!(
            host.get(slot(Channel::CipherResidual, 2)).await.unwrap(),
            vec![2]
        );
        // only the answer for sample 1 is stashed
        assert_eq!(host.pending(), 1);

        host.discard(slot(Channel::CipherResidual, 1));
        assert_eq!(host.pending(), 0);
        assert!(host.discarded.is_empty());
    }

    #[tokio::test]
    async fn test_closed_peer() {
        let (mut host, guest) = pair(SessionId::from(1));
        drop(guest);
        assert_eq!(
            host.get(slot(Channel::PublicKey, 0)).await,
            Err(TransferError::Closed)
        );
        assert_eq!(
            host.remote(vec![], Role::Guest, slot(Channel::HostPrediction, 0))
                .await,
            Err(TransferError::Closed)
        );
    }

    #[tokio::test]
    async fn test_rejects_misaddressed_messages() {
        let (mut host, _guest) = pair(SessionId::from(1));
        assert_eq!(
            host.remote(vec![], Role::Host, slot(Channel::HostPrediction, 0))
                .await,
            Err(TransferError::UnknownRole(Role::Host))
        );

        let mut foreign = slot(Channel::HostPrediction, 0);
        foreign.session = SessionId::from(2);
        assert_eq!(
            host.remote(vec![], Role::Guest, foreign).await,
            Err(TransferError::ForeignSession(foreign))
        );
    }

    #[tokio::test]
    async fn test_next_envelope_drains_stash_first() {
        let (mut host, mut guest) = pair(SessionId::from(1));
        host.remote(vec![1], Role::Guest, slot(Channel::HostPrediction, 0))
            .await
            .unwrap();
        host.remote(vec![2], Role::Guest, slot(Channel::HostPrediction, 1))
            .await
            .unwrap();
        assert_eq!(
            guest.get(slot(Channel::HostPrediction, 1)).await.unwrap(),
            vec![2]
        );
        drop(host);

        assert_eq!(
            guest.next_envelope().await,
            Some((slot(Channel::HostPrediction, 0), vec![1]))
        );
        assert_eq!(guest.next_envelope().await, None);
    }
}
