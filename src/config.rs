use crate::{
    canonical::types::{Address, U256},
    channel::{ChannelConstants, Participant},
};
use alloc::vec::Vec;

/// Values the [Wallet][crate::Wallet] fills into the constants of every
/// channel it creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub chain_id: U256,
    pub challenge_duration: u64,
    pub app_definition: Address,
    /// Default hub for virtual funding.
    pub hub: Option<Participant>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chain_id: U256::one(),
            challenge_duration: 10,
            app_definition: Address::default(),
            hub: None,
        }
    }
}

impl Config {
    pub fn with_chain_id(mut self, chain_id: U256) -> Self {
        self.chain_id = chain_id;
        self
    }

    pub fn with_challenge_duration(mut self, challenge_duration: u64) -> Self {
        self.challenge_duration = challenge_duration;
        self
    }

    pub fn with_app_definition(mut self, app_definition: Address) -> Self {
        self.app_definition = app_definition;
        self
    }

    pub fn with_hub(mut self, hub: Participant) -> Self {
        self.hub = Some(hub);
        self
    }

    /// Constants for a new channel between `participants`. The nonce is
    /// assigned by the store when the channel is created.
    pub fn constants(&self, participants: Vec<Participant>) -> ChannelConstants {
        ChannelConstants {
            chain_id: self.chain_id,
            participants,
            app_definition: self.app_definition,
            challenge_duration: self.challenge_duration,
            channel_nonce: U256::zero(),
        }
    }
}
