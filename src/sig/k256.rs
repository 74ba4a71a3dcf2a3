//! Signer using the k256 Rust crate (implementation of ecdsa in Rust).

use crate::canonical::types::{Address, Hash, Signature};
use k256::{
    ecdsa::{
        recoverable,
        signature::{hazmat::PrehashSigner, Signature as k256Signature},
        SigningKey, VerifyingKey,
    },
    elliptic_curve::sec1::ToEncodedPoint,
};
use sha3::{Digest, Keccak256};

use super::hash_to_eth_signed_msg_hash;

pub use k256::ecdsa::Error;

#[derive(Debug, Clone)]
pub struct Signer {
    key: SigningKey,
    addr: Address,
}

impl From<VerifyingKey> for Address {
    fn from(key: VerifyingKey) -> Self {
        let point = key.to_encoded_point(false);
        // Uncompressed SEC1 point: a 0x04 tag followed by x and y. The tag is
        // not part of the public key.
        let hash: [u8; 32] = Keccak256::digest(&point.as_bytes()[1..]).into();

        let mut addr = Address([0; 20]);
        addr.0.copy_from_slice(&hash[32 - 20..]);
        addr
    }
}

impl Signer {
    /// Draws 32 byte candidates from `rng` until one is a valid secret key.
    pub fn new<R: rand::Rng + rand::CryptoRng>(rng: &mut R) -> Self {
        loop {
            let bytes: [u8; 32] = rng.gen();
            if let Ok(signer) = Self::from_secret(&bytes) {
                return signer;
            }
        }
    }

    pub fn from_secret(bytes: &[u8; 32]) -> Result<Self, Error> {
        let key = SigningKey::from_bytes(bytes)?;
        let addr = key.verifying_key().into();
        Ok(Self { key, addr })
    }

    pub fn address(&self) -> Address {
        self.addr
    }

    pub fn sign_eth(&self, msg: Hash) -> Result<Signature, Error> {
        // "\x19Ethereum Signed Message:\n32" format
        let hash = hash_to_eth_signed_msg_hash(msg);

        let sig: recoverable::Signature = self.key.sign_prehash(&hash.0)?;

        // Already r, s and v in this order, but v has to be offset by 27 for
        // the EVM.
        let mut sig_bytes: [u8; 65] = sig.as_bytes().try_into().map_err(|_| Error::new())?;
        debug_assert!(sig_bytes[32] & 0x80 == 0);
        sig_bytes[64] += 27;

        Ok(Signature(sig_bytes))
    }

    pub fn recover_signer(&self, msg: Hash, eth_sig: Signature) -> Result<Address, Error> {
        // "\x19Ethereum Signed Message:\n32" format
        let hash = hash_to_eth_signed_msg_hash(msg);

        // Undo adding the 27, to go back to the format expected below
        let mut sig_bytes: [u8; 65] = eth_sig.0;
        sig_bytes[64] = sig_bytes[64].checked_sub(27).ok_or_else(Error::new)?;

        let sig = recoverable::Signature::from_bytes(&sig_bytes)?;
        let verifying_key = sig.recover_verifying_key_from_digest_bytes(&hash.0.into())?;
        Ok(verifying_key.into())
    }
}
