#![cfg_attr(not(feature = "std"), no_std)]

//! Off-chain consensus and funding protocols for state channels.
//!
//! A [Wallet] keeps every channel its participant is part of, decides which
//! of the signed states it knows is *supported* and runs the protocols that
//! fund channels directly on chain, out of a ledger channel or virtually
//! through a hub, and return the funds once a channel is closed.

extern crate alloc;

#[cfg(not(any(feature = "k256", feature = "secp256k1")))]
compile_error!("enable at least one signer backend: `k256` or `secp256k1`");

mod canonical {
    mod error;
    mod hashing;
    mod ser;

    pub mod as_bytes;
    pub mod types;

    pub use error::Error;
    pub use hashing::to_hash;
    #[cfg(test)]
    pub use ser::{to_writer, Writer};

    #[cfg(test)]
    mod tests;
}
pub mod sig;

pub mod chain;
pub mod channel;
mod client;
pub mod config;
pub mod messages;
pub mod nitrowire;
pub mod protocols;
pub mod store;
pub mod wire;

pub use canonical::types::{Address, Destination, Hash, Signature, U256};
pub use canonical::Error as EncodingError;
pub use client::{FundingStrategy, Wallet, WalletError};
pub use config::Config;
