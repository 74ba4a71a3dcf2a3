//! What wallets send each other: signed states and objective announcements.

mod conversion;

use crate::{channel::SignedState, store::Objective};
use alloc::vec::Vec;
use core::fmt::Display;

#[derive(Debug)]
pub enum ConversionError {
    ByteLengthMissmatch,
    ExptectedSome,
    /// The length prefix does not match the payload.
    InvalidFrame,
    Decode(prost::DecodeError),
    Encode(prost::EncodeError),
    /// The message is too large for the u16 length prefix.
    TooLarge(usize),
}

impl From<prost::DecodeError> for ConversionError {
    fn from(e: prost::DecodeError) -> Self {
        Self::Decode(e)
    }
}

impl From<prost::EncodeError> for ConversionError {
    fn from(e: prost::EncodeError) -> Self {
        Self::Encode(e)
    }
}

impl Display for ConversionError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ConversionError::ByteLengthMissmatch => f.write_str("field has the wrong length"),
            ConversionError::ExptectedSome => f.write_str("required field missing"),
            ConversionError::InvalidFrame => f.write_str("length prefix does not match"),
            ConversionError::Decode(e) => write!(f, "{}", e),
            ConversionError::Encode(e) => write!(f, "{}", e),
            ConversionError::TooLarge(len) => write!(f, "message of {} bytes is too large", len),
        }
    }
}

/// A batch of states and objectives for one recipient.
///
/// Delivery is at least once and unordered, receiving the same message twice
/// has no effect.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    pub signed_states: Vec<SignedState>,
    pub objectives: Vec<Objective>,
}

impl Message {
    pub fn from_states(signed_states: Vec<SignedState>) -> Self {
        Self {
            signed_states,
            objectives: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.signed_states.is_empty() && self.objectives.is_empty()
    }
}
