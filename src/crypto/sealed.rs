use std::fmt;

use derive_more::From;
use sodiumoxide::{
    crypto::{box_, sealedbox},
    randombytes::randombytes,
};

use super::{decode_scalar, encode_scalar, CipherSuite, CryptoError};

/// Number of additional bytes in a ciphertext compared to the encoded scalar.
pub const SEALBYTES: usize = sealedbox::SEALBYTES;

/// Length of a ciphertext of a single scalar.
const CIPHERTEXT_LENGTH: usize = SEALBYTES + 8;

#[derive(From, Eq, PartialEq, Clone)]
/// A seed from which the host deterministically derives its `C25519` key pair.
///
/// The seed is as secret as the key pair itself and never leaves the host.
pub struct EncryptKeySeed(box_::Seed);

impl EncryptKeySeed {
    /// Length in bytes of a seed.
    pub const LENGTH: usize = box_::SEEDBYTES;

    /// Generates a random seed.
    pub fn generate() -> Self {
        let mut seed = box_::Seed([0_u8; box_::SEEDBYTES]);
        seed.0.copy_from_slice(&randombytes(Self::LENGTH));
        Self(seed)
    }

    /// Creates a seed from the given buffer.
    ///
    /// # Errors
    /// Returns `None` if the length of the byte-slice isn't equal to the length of a seed.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        box_::Seed::from_slice(bytes).map(Self)
    }

    /// Derives the key pair of this seed.
    pub fn derive_context(&self) -> SealedContext {
        let (public, secret) = box_::keypair_from_seed(&self.0);
        SealedContext {
            public,
            secret: Some(secret),
        }
    }
}

impl fmt::Debug for EncryptKeySeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptKeySeed(****)")
    }
}

#[derive(Clone)]
/// The key material of the sealed suite.
///
/// The host holds the full key pair. The guest only learns the public key, which suffices to seal
/// values for the host.
pub struct SealedContext {
    public: box_::PublicKey,
    secret: Option<box_::SecretKey>,
}

impl SealedContext {
    /// Checks whether the context can decrypt.
    pub fn has_secret(&self) -> bool {
        self.secret.is_some()
    }
}

impl fmt::Debug for SealedContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SealedContext")
            .field("public", &self.public)
            .field("secret", &self.secret.as_ref().map(|_| "****"))
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
/// Scalars sealed into anonymous `C25519` boxes.
///
/// Each ciphertext carries an ephemeral public key, hence it is [`SEALBYTES`] longer than the
/// eight bytes of the encoded scalar.
pub struct SealedScalar {
    _initialized: (),
}

impl SealedScalar {
    /// Creates the suite, initializing sodiumoxide if necessary.
    ///
    /// # Errors
    /// Fails if sodiumoxide can't be initialized.
    pub fn new() -> Result<Self, CryptoError> {
        sodiumoxide::init().map_err(|_| CryptoError::Init)?;
        Ok(Self { _initialized: () })
    }
}

impl CipherSuite for SealedScalar {
    type Context = SealedContext;
    type Ciphertext = Vec<u8>;

    fn keygen(&self) -> Result<SealedContext, CryptoError> {
        Ok(EncryptKeySeed::generate().derive_context())
    }

    fn public_bytes(&self, context: &SealedContext) -> Vec<u8> {
        context.public.as_ref().to_vec()
    }

    fn context_from(&self, bytes: &[u8]) -> Result<SealedContext, CryptoError> {
        let public = box_::PublicKey::from_slice(bytes).ok_or_else(|| {
            CryptoError::InvalidContext(format!(
                "expected a public key of {} bytes, got {}",
                box_::PUBLICKEYBYTES,
                bytes.len()
            ))
        })?;
        Ok(SealedContext {
            public,
            secret: None,
        })
    }

    fn deserialize(&self, bytes: &[u8], _context: &SealedContext) -> Result<Vec<u8>, CryptoError> {
        if bytes.len() != CIPHERTEXT_LENGTH {
            return Err(CryptoError::Malformed(format!(
                "expected {} bytes, got {}",
                CIPHERTEXT_LENGTH,
                bytes.len()
            )));
        }
        Ok(bytes.to_vec())
    }

    fn decrypt(&self, ciphertext: &Vec<u8>, context: &SealedContext) -> Result<f64, CryptoError> {
        let secret = context.secret.as_ref().ok_or(CryptoError::NoSecretKey)?;
        let plain = sealedbox::open(ciphertext, &context.public, secret)
            .map_err(|_| CryptoError::DecryptionFailed)?;
        decode_scalar(&plain)
    }

    fn encrypt(&self, value: f64, context: &SealedContext) -> Result<Vec<u8>, CryptoError> {
        Ok(sealedbox::seal(&encode_scalar(value)?, &context.public))
    }

    fn serialize(&self, ciphertext: &Vec<u8>) -> Result<Vec<u8>, CryptoError> {
        Ok(ciphertext.clone())
    }
}
