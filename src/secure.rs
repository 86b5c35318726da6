//! The per-sample secure update exchange of the host.
//!
//! The host owns the key pair of a fit and publishes its public part once. For every training
//! sample the host then sends its partial prediction to the guest and waits for the encrypted
//! residual of that sample, which it decrypts into the scalar driving the update:
//!
//! ```text
//! host                                   guest
//!  |  public key ->         (PublicKey)     |   once per fit
//!  |  p_host -> (HostPrediction, e, i)      |
//!  |  <- Enc(r) (CipherResidual, e, i)      |   per sample
//! ```
//!
//! Failures to read a residual are handled according to the [`ExchangeFailurePolicy`]. These are
//! malformed or undecryptable ciphertexts, residuals that aren't finite and timeouts. Transport
//! failures always abort.

use std::{error::Error, sync::Arc, time::Duration};

use derive_more::Display;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    crypto::{CipherSuite, CryptoError},
    session::{Channel, Role, Session, Slot, Transfer},
};

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// What to do when the residual of a sample can't be obtained.
pub enum ExchangeFailurePolicy {
    /// Fail the fit.
    #[display(fmt = "abort")]
    Abort,
    /// Skip the update of that sample and continue.
    #[display(fmt = "skip")]
    Skip,
}

impl Default for ExchangeFailurePolicy {
    fn default() -> Self {
        ExchangeFailurePolicy::Abort
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
/// Settings of the exchange.
pub struct ExchangeSettings {
    pub policy: ExchangeFailurePolicy,
    /// How long to wait for each guest message. Waits forever if `None`.
    pub timeout: Option<Duration>,
}

#[derive(Debug, Error)]
/// Errors of the secure update exchange.
pub enum SecureUpdateError {
    #[error("transfer on {slot} failed: {source}")]
    Transfer {
        slot: Slot,
        source: Box<dyn Error + Send + Sync>,
    },
    #[error("crypto failure on {slot}: {source}")]
    Crypto { slot: Slot, source: CryptoError },
    #[error("no message on {slot} within {timeout:?}")]
    Timeout { slot: Slot, timeout: Duration },
    #[error("failed to encode prediction: {0}")]
    Encoding(#[from] bincode::Error),
}

impl SecureUpdateError {
    /// Checks whether the error may be skipped under [`ExchangeFailurePolicy::Skip`].
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            SecureUpdateError::Crypto { .. } | SecureUpdateError::Timeout { .. }
        )
    }
}

/// The host end of the exchange for one fit.
pub struct SecureUpdate<C, T>
where
    C: CipherSuite,
{
    suite: C,
    session: Session<T>,
    context: Arc<C::Context>,
    settings: ExchangeSettings,
    skipped: u64,
}

impl<C, T> SecureUpdate<C, T>
where
    C: CipherSuite,
    T: Transfer,
{
    /// Prepares the exchange and publishes the public key to the guest.
    ///
    /// Uses the given key pair if there is one, otherwise generates a fresh one.
    ///
    /// # Errors
    /// Fails if no key pair can be generated or the public key can't be sent.
    pub async fn connect(
        suite: C,
        mut session: Session<T>,
        settings: ExchangeSettings,
        context: Option<Arc<C::Context>>,
    ) -> Result<Self, SecureUpdateError> {
        let slot = session.slot(Channel::PublicKey, 0, 0);
        let context = match context {
            Some(context) => context,
            None => Arc::new(
                suite
                    .keygen()
                    .map_err(|source| SecureUpdateError::Crypto { slot, source })?,
            ),
        };
        session
            .transfer_mut()
            .remote(suite.public_bytes(&context), Role::Guest, slot)
            .await
            .map_err(|err| SecureUpdateError::Transfer {
                slot,
                source: Box::new(err),
            })?;
        debug!("published public key on {}", slot);

        Ok(Self {
            suite,
            session,
            context,
            settings,
            skipped: 0,
        })
    }

    /// Exchanges the partial prediction of a sample for its decrypted residual.
    ///
    /// Returns `None` if the residual couldn't be obtained and the failure was skipped.
    ///
    /// # Errors
    /// Fails on transport errors, or on any error under [`ExchangeFailurePolicy::Abort`].
    pub async fn exchange(
        &mut self,
        epoch: u32,
        sample: u64,
        p_host: f64,
    ) -> Result<Option<f64>, SecureUpdateError> {
        let slot = self.session.slot(Channel::HostPrediction, epoch, sample);
        let payload = bincode::serialize(&p_host)?;
        self.session
            .transfer_mut()
            .remote(payload, Role::Guest, slot)
            .await
            .map_err(|err| SecureUpdateError::Transfer {
                slot,
                source: Box::new(err),
            })?;

        let slot = slot.on(Channel::CipherResidual);
        match self.residual(slot).await {
            Ok(residual) => Ok(Some(residual)),
            Err(err)
                if err.is_skippable() && self.settings.policy == ExchangeFailurePolicy::Skip =>
            {
                warn!("skipping sample: {}", err);
                if let SecureUpdateError::Timeout { .. } = err {
                    self.session.transfer_mut().discard(slot);
                }
                self.skipped += 1;
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    async fn residual(&mut self, slot: Slot) -> Result<f64, SecureUpdateError> {
        let bytes = receive(&mut self.session, slot, self.settings.timeout).await?;
        let crypto = |source| SecureUpdateError::Crypto { slot, source };
        let ciphertext = self
            .suite
            .deserialize(&bytes, &self.context)
            .map_err(crypto)?;
        let residual = self
            .suite
            .decrypt(&ciphertext, &self.context)
            .map_err(crypto)?;
        if residual.is_finite() {
            Ok(residual)
        } else {
            Err(crypto(CryptoError::Malformed(format!(
                "residual {} is not finite",
                residual
            ))))
        }
    }

    /// Gets the number of samples skipped so far.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

async fn receive<T>(
    session: &mut Session<T>,
    slot: Slot,
    timeout: Option<Duration>,
) -> Result<Vec<u8>, SecureUpdateError>
where
    T: Transfer,
{
    let transfer_error = |err: T::Error| SecureUpdateError::Transfer {
        slot,
        source: Box::new(err),
    };
    let get = session.transfer_mut().get(slot);
    match timeout {
        Some(timeout) => tokio::time::timeout(timeout, get)
            .await
            .map_err(|_| SecureUpdateError::Timeout { slot, timeout })?
            .map_err(transfer_error),
        None => get.await.map_err(transfer_error),
    }
}
