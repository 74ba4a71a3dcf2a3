//! Handles the creation and verification of (Ethereum) Signatures.
//!
//! Both backends produce the same 65-byte `r || s || v` format with `v` in
//! `{27, 28}`, so a signature made by one can be recovered by the other.

use crate::canonical::types::Hash;
use sha3::{Digest, Keccak256};

#[cfg(feature = "k256")]
pub mod k256;
#[cfg(feature = "secp256k1")]
pub mod secp256k1;

#[cfg(feature = "k256")]
pub use self::k256::{Error, Signer};
#[cfg(all(feature = "secp256k1", not(feature = "k256")))]
pub use self::secp256k1::{Error, Signer};


/// Add the `\x19Ethereum Signed Message\n<length>` prefix to hash.
///
/// This is the format expected by the Solidity contracts.
fn hash_to_eth_signed_msg_hash(hash: Hash) -> Hash {
    // Packed encoding => We can't use the serializer
    let mut hasher = Keccak256::new();
    hasher.update(b"\x19Ethereum Signed Message:\n32");
    hasher.update(hash.0);
    Hash(hasher.finalize().into())
}
