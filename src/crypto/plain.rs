use super::{decode_scalar, encode_scalar, CipherSuite, CryptoError};

#[derive(Debug, Clone, Copy, Default)]
/// The identity cipher suite.
///
/// Useful for tests and for deployments where the exchange runs over an otherwise secured
/// channel. The context is empty and any bytes are accepted as one.
pub struct Plaintext;

impl CipherSuite for Plaintext {
    type Context = ();
    type Ciphertext = f64;

    fn keygen(&self) -> Result<(), CryptoError> {
        Ok(())
    }

    fn public_bytes(&self, _context: &()) -> Vec<u8> {
        Vec::new()
    }

    fn context_from(&self, _bytes: &[u8]) -> Result<(), CryptoError> {
        Ok(())
    }

    fn deserialize(&self, bytes: &[u8], _context: &()) -> Result<f64, CryptoError> {
        decode_scalar(bytes)
    }

    fn decrypt(&self, ciphertext: &f64, _context: &()) -> Result<f64, CryptoError> {
        Ok(*ciphertext)
    }

    fn encrypt(&self, value: f64, _context: &()) -> Result<f64, CryptoError> {
        Ok(value)
    }

    fn serialize(&self, ciphertext: &f64) -> Result<Vec<u8>, CryptoError> {
        encode_scalar(*ciphertext)
    }
}
