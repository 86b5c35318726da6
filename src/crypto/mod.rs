//! Scalar encryption used by the secure update exchange.
//!
//! The host owns the key pair and is the only party that decrypts. It publishes the public part of
//! its context once per fit, the guest encrypts the residual of each sample under it and the host
//! opens it. A [`CipherSuite`] bundles the operations both roles need, so the same suite drives
//! the trainer and the guest simulators in [`crate::session`].
//!
//! Two suites are provided:
//! - [`Plaintext`]: a pass-through suite, the ciphertext is the encoded value itself.
//! - [`SealedScalar`]: `C25519` sealed boxes from [sodiumoxide].
//!
//! # Examples
//! ```
//! # use xaynet_vfl::crypto::{CipherSuite, SealedScalar};
//! let suite = SealedScalar::new().unwrap();
//! // the host generates the key pair and publishes the public key
//! let host = suite.keygen().unwrap();
//! let published = suite.public_bytes(&host);
//!
//! // the guest can encrypt, but not decrypt
//! let guest = suite.context_from(&published).unwrap();
//! let cipher = suite.encrypt(-0.25, &guest).unwrap();
//! let bytes = suite.serialize(&cipher).unwrap();
//!
//! let cipher = suite.deserialize(&bytes, &host).unwrap();
//! assert_eq!(suite.decrypt(&cipher, &host).unwrap(), -0.25);
//! assert!(suite.decrypt(&cipher, &guest).is_err());
//! ```
//!
//! [sodiumoxide]: https://docs.rs/sodiumoxide/

mod plain;
mod sealed;

use bincode::Options;
use thiserror::Error;

pub use self::{
    plain::Plaintext,
    sealed::{EncryptKeySeed, SealedContext, SealedScalar, SEALBYTES},
};

#[derive(Debug, Error, PartialEq, Eq)]
/// Errors of a cipher suite.
pub enum CryptoError {
    #[error("failed to initialize the crypto library")]
    Init,
    #[error("invalid encryption context: {0}")]
    InvalidContext(String),
    #[error("the context holds no secret key")]
    NoSecretKey,
    #[error("malformed ciphertext: {0}")]
    Malformed(String),
    #[error("decryption of a ciphertext failed")]
    DecryptionFailed,
}

/// A scheme encrypting single `f64` values under the key of the host.
pub trait CipherSuite: Send + Sync {
    /// The key material, acquired once per fit and shared read-only.
    type Context: Send + Sync;
    /// A decoded ciphertext.
    type Ciphertext: Send;

    /// Generates the context of the key owner, including its secret key.
    ///
    /// # Errors
    /// Fails if no key can be generated.
    fn keygen(&self) -> Result<Self::Context, CryptoError>;

    /// Encodes the public part of a context, the only part that is ever sent to the guest.
    fn public_bytes(&self, context: &Self::Context) -> Vec<u8>;

    /// Parses a context published by the key owner. The result can only encrypt.
    ///
    /// # Errors
    /// Fails if the bytes don't describe a valid context.
    fn context_from(&self, bytes: &[u8]) -> Result<Self::Context, CryptoError>;

    /// Decodes a ciphertext received over the wire.
    ///
    /// # Errors
    /// Fails if the bytes can't be a ciphertext of this suite.
    fn deserialize(
        &self,
        bytes: &[u8],
        context: &Self::Context,
    ) -> Result<Self::Ciphertext, CryptoError>;

    /// Decrypts a ciphertext into the scalar it carries.
    ///
    /// # Errors
    /// Fails if the ciphertext can't be opened under the context.
    fn decrypt(
        &self,
        ciphertext: &Self::Ciphertext,
        context: &Self::Context,
    ) -> Result<f64, CryptoError>;

    /// Encrypts a scalar.
    ///
    /// # Errors
    /// Fails if the context doesn't allow encryption.
    fn encrypt(&self, value: f64, context: &Self::Context)
        -> Result<Self::Ciphertext, CryptoError>;

    /// Encodes a ciphertext for the wire.
    ///
    /// # Errors
    /// Fails if the ciphertext can't be encoded.
    fn serialize(&self, ciphertext: &Self::Ciphertext) -> Result<Vec<u8>, CryptoError>;
}

/// The fixed width little-endian encoding of wire scalars, rejecting trailing bytes.
fn scalar_codec() -> impl Options {
    bincode::DefaultOptions::new().with_fixint_encoding()
}

pub(crate) fn encode_scalar(value: f64) -> Result<Vec<u8>, CryptoError> {
    scalar_codec()
        .serialize(&value)
        .map_err(|err| CryptoError::Malformed(err.to_string()))
}

pub(crate) fn decode_scalar(bytes: &[u8]) -> Result<f64, CryptoError> {
    scalar_codec()
        .deserialize(bytes)
        .map_err(|err| CryptoError::Malformed(err.to_string()))
}
