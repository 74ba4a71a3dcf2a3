use crate::canonical::{
    self, as_bytes,
    types::{Address, Destination, Hash, Signature, U256},
};
use alloc::{string::String, vec::Vec};
use serde::Serialize;

use super::Outcome;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    /// Used by the transport to route messages, not part of any hash.
    pub participant_id: String,
    pub signing_address: Address,
    pub destination: Destination,
}

/// Fields fixed for the lifetime of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConstants {
    pub chain_id: U256,
    pub participants: Vec<Participant>,
    pub app_definition: Address,
    pub challenge_duration: u64,
    pub channel_nonce: U256,
}

impl ChannelConstants {
    /// Keccak256 of `(chain_id, signing addresses, channel_nonce)`.
    pub fn channel_id(&self) -> Result<Hash, canonical::Error> {
        let addresses: Vec<Address> = self.signing_addresses();
        canonical::to_hash(&(self.chain_id, addresses, self.channel_nonce))
    }

    pub fn signing_addresses(&self) -> Vec<Address> {
        self.participants.iter().map(|p| p.signing_address).collect()
    }

    pub fn index_of(&self, address: &Address) -> Option<usize> {
        self.participants
            .iter()
            .position(|p| &p.signing_address == address)
    }

    /// Index of the participant whose turn it is at `turn_num`.
    pub fn mover_index(&self, turn_num: u64) -> usize {
        (turn_num % self.participants.len() as u64) as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateVariables {
    pub turn_num: u64,
    pub is_final: bool,
    pub app_data: Vec<u8>,
    pub outcome: Outcome,
}

impl StateVariables {
    pub fn new(turn_num: u64, outcome: Outcome) -> Self {
        Self {
            turn_num,
            is_final: false,
            app_data: Vec::new(),
            outcome,
        }
    }

    /// Same application data and outcome, one turn later.
    pub fn next(&self) -> Self {
        Self {
            turn_num: self.turn_num + 1,
            ..self.clone()
        }
    }
}

#[derive(Serialize)]
struct HashedState<'a> {
    channel_id: Hash,
    app_definition: Address,
    challenge_duration: u64,
    turn_num: u64,
    is_final: bool,
    #[serde(with = "as_bytes")]
    app_data: &'a [u8],
    outcome: &'a Outcome,
}

/// Hash of the state built from `constants` and `variables`, this is what
/// participants sign.
pub fn hash_state(
    constants: &ChannelConstants,
    variables: &StateVariables,
) -> Result<Hash, canonical::Error> {
    hash_state_with_id(constants.channel_id()?, constants, variables)
}

pub(crate) fn hash_state_with_id(
    channel_id: Hash,
    constants: &ChannelConstants,
    variables: &StateVariables,
) -> Result<Hash, canonical::Error> {
    canonical::to_hash(&HashedState {
        channel_id,
        app_definition: constants.app_definition,
        challenge_duration: constants.challenge_duration,
        turn_num: variables.turn_num,
        is_final: variables.is_final,
        app_data: &variables.app_data,
        outcome: &variables.outcome,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct State {
    pub constants: ChannelConstants,
    pub variables: StateVariables,
}

impl State {
    pub fn channel_id(&self) -> Result<Hash, canonical::Error> {
        self.constants.channel_id()
    }

    pub fn hash(&self) -> Result<Hash, canonical::Error> {
        hash_state(&self.constants, &self.variables)
    }

    pub fn turn_num(&self) -> u64 {
        self.variables.turn_num
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureEntry {
    pub signer: Address,
    pub signature: Signature,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedState {
    pub state: State,
    pub signatures: Vec<SignatureEntry>,
}

impl SignedState {
    pub fn is_signed_by(&self, address: &Address) -> bool {
        self.signatures.iter().any(|s| &s.signer == address)
    }
}
