//! A guest simulator for local runs and tests.
//!
//! The guest waits for the public key of the host, then answers every host prediction with the
//! residual of that sample, encrypted under that key, until the host hangs up.

use thiserror::Error;
use tracing::{debug, warn};

use super::{Channel, MemoryTransfer, Role, Slot, Transfer, TransferError};
use crate::{
    crypto::{CipherSuite, CryptoError},
    loss::LossKind,
};

#[derive(Debug, Error)]
/// Errors of the guest simulator.
pub enum GuestError {
    #[error("transfer failed: {0}")]
    Transfer(#[from] TransferError),
    #[error("encryption failed: {0}")]
    Crypto(#[from] CryptoError),
    #[error("invalid host prediction: {0}")]
    Payload(#[from] bincode::Error),
}

/// Computes the residual of the sample addressed by the slot from the host prediction.
pub type ResidualFn = Box<dyn FnMut(Slot, f64) -> f64 + Send>;

/// A guest holding no features of its own.
pub struct LocalGuest<C> {
    suite: C,
    residual: ResidualFn,
}

impl<C> LocalGuest<C>
where
    C: CipherSuite,
{
    /// Creates a guest that answers with `residual`.
    pub fn new(suite: C, residual: ResidualFn) -> Self {
        Self { suite, residual }
    }

    /// Creates a guest owning the labels, which answers with the loss derivative at the host
    /// prediction. Predictions for samples without a label are answered with `0`.
    pub fn with_labels(suite: C, loss: LossKind, labels: Vec<f64>) -> Self {
        let residual = move |slot: Slot, p: f64| match labels.get(slot.sample as usize) {
            Some(y) => loss.dloss(p, *y),
            None => 0.0,
        };
        Self::new(suite, Box::new(residual))
    }

    /// Serves the host until it hangs up and returns the number of answered predictions.
    ///
    /// # Errors
    /// Fails if the public key is invalid, a prediction can't be decoded or the transport fails.
    pub async fn serve(mut self, mut transfer: MemoryTransfer) -> Result<u64, GuestError> {
        let key_slot = Slot {
            session: transfer.session(),
            channel: Channel::PublicKey,
            epoch: 0,
            sample: 0,
        };
        let context = match transfer.get(key_slot).await {
            Ok(bytes) => self.suite.context_from(&bytes)?,
            // the host gave up before publishing its key
            Err(TransferError::Closed) => return Ok(0),
            Err(err) => return Err(err.into()),
        };

        let mut answered = 0;
        while let Some((slot, value)) = transfer.next_envelope().await {
            if slot.channel != Channel::HostPrediction {
                warn!("guest ignores message on {}", slot);
                continue;
            }
            let prediction: f64 = bincode::deserialize(&value)?;
            let residual = (self.residual)(slot, prediction);
            let cipher = self.suite.encrypt(residual, &context)?;
            let answer = transfer
                .remote(
                    self.suite.serialize(&cipher)?,
                    Role::Host,
                    slot.on(Channel::CipherResidual),
                )
                .await;
            match answer {
                Ok(()) => answered += 1,
                // the host stops listening once the fit is done
                Err(TransferError::Closed) => break,
                Err(err) => return Err(err.into()),
            }
        }
        debug!("guest answered {} predictions", answered);
        Ok(answered)
    }
}
