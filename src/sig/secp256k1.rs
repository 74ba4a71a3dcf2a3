//! Signer using libsecp256k1 through the `secp256k1` crate.

use crate::canonical::types::{Address, Hash, Signature};
use secp256k1::{
    ecdsa::{RecoverableSignature, RecoveryId},
    All, Message, PublicKey, Secp256k1, SecretKey,
};

use super::hash_to_eth_signed_msg_hash;

pub use secp256k1::Error;

#[derive(Debug, Clone)]
pub struct Signer {
    secp: Secp256k1<All>,
    sk: SecretKey,
    addr: Address,
}

impl Signer {
    pub fn new<R: rand::Rng + rand::CryptoRng>(rng: &mut R) -> Self {
        let secp = Secp256k1::new();
        let sk = SecretKey::new(rng);
        let addr = PublicKey::from_secret_key(&secp, &sk).into();
        Self { secp, sk, addr }
    }

    pub fn from_secret(bytes: &[u8; 32]) -> Result<Self, Error> {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(bytes)?;
        let addr = PublicKey::from_secret_key(&secp, &sk).into();
        Ok(Self { secp, sk, addr })
    }

    pub fn address(&self) -> Address {
        self.addr
    }

    /// Sign a hash using a Ethereum 65-byte recoverable signature.
    pub fn sign_eth(&self, msg: Hash) -> Result<Signature, Error> {
        let hash = hash_to_eth_signed_msg_hash(msg);

        // Recoverable, so the contracts can derive the address from it.
        let sig = self
            .secp
            .sign_ecdsa_recoverable(&Message::from(hash), &self.sk);
        let (v, rs) = sig.serialize_compact();

        // EIP-2: s must be in the lower half of the curve order.
        debug_assert!(rs[32] & 0x80 == 0);

        // v is offset by 27, see EIP-2098.
        let v: u8 = 27 + v.to_i32() as u8;

        Ok(Signature::new(&rs, v))
    }

    pub fn recover_signer(&self, msg: Hash, eth_sig: Signature) -> Result<Address, Error> {
        let hash = hash_to_eth_signed_msg_hash(msg);

        let rs = &eth_sig.0[..64];
        let v = eth_sig.0[64]
            .checked_sub(27)
            .ok_or(Error::InvalidRecoveryId)?;

        let recid = RecoveryId::from_i32(v.into())?;
        let sig = RecoverableSignature::from_compact(rs, recid)?;

        let pk = self.secp.recover_ecdsa(&Message::from(hash), &sig)?;
        Ok(pk.into())
    }
}
