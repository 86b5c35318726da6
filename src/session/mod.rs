//! Message addressing between the host and the guest.
//!
//! Every message of a fit is addressed by a [`Slot`]: the session it belongs to, the logical
//! channel, and the epoch and sample it is about. Parallel fits use distinct [`SessionId`]s, so
//! their messages never collide on a shared transport.
//!
//! The transport itself is abstracted by the [`Transfer`] trait. [`memory::pair()`] provides an
//! in-process implementation and [`LocalGuest`] a guest that answers over it.

pub mod guest;
pub mod memory;

use async_trait::async_trait;
use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};

pub use self::{
    guest::{GuestError, LocalGuest},
    memory::{pair, MemoryTransfer, TransferError},
};

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
/// A party of the protocol.
pub enum Role {
    #[display(fmt = "host")]
    Host,
    #[display(fmt = "guest")]
    Guest,
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
/// The logical channels of the secure update exchange.
pub enum Channel {
    /// The public part of the encryption context, published by the host once per fit.
    #[display(fmt = "public_key")]
    PublicKey,
    /// The partial prediction of the host for one sample.
    #[display(fmt = "host_prediction")]
    HostPrediction,
    /// The encrypted residual of one sample, answered by the guest.
    #[display(fmt = "cipher_residual")]
    CipherResidual,
}

#[derive(
    Debug,
    Display,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    From,
    Into,
    Serialize,
    Deserialize,
)]
/// The namespace of one fit.
pub struct SessionId(u32);

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[display(fmt = "{}/{}/{}/{}", session, channel, epoch, sample)]
/// The address of a single message.
pub struct Slot {
    pub session: SessionId,
    pub channel: Channel,
    pub epoch: u32,
    pub sample: u64,
}

impl Slot {
    /// Gets the slot of the same sample on another channel.
    pub fn on(self, channel: Channel) -> Self {
        Self { channel, ..self }
    }
}

/// A transport for slot addressed messages.
#[cfg_attr(test, mockall::automock(type Error = TransferError;))]
#[async_trait]
pub trait Transfer: Send {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Sends `value` to the party with the given `role`.
    async fn remote(&mut self, value: Vec<u8>, role: Role, slot: Slot) -> Result<(), Self::Error>;

    /// Waits for the message addressed by `slot`.
    async fn get(&mut self, slot: Slot) -> Result<Vec<u8>, Self::Error>;

    /// Gives up on the message addressed by `slot`. If it arrives later, it is dropped.
    fn discard(&mut self, slot: Slot);
}

#[derive(Debug)]
/// A transport bound to the namespace of one fit.
pub struct Session<T> {
    id: SessionId,
    transfer: T,
}

impl<T> Session<T>
where
    T: Transfer,
{
    pub fn new(id: SessionId, transfer: T) -> Self {
        Self { id, transfer }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Gets the address of a message of this session.
    pub fn slot(&self, channel: Channel, epoch: u32, sample: u64) -> Slot {
        Slot {
            session: self.id,
            channel,
            epoch,
            sample,
        }
    }

    pub fn transfer_mut(&mut self) -> &mut T {
        &mut self.transfer
    }
}
