//! Protobuf messages exchanged between wallets.
//!
//! Fixed size values (addresses, hashes, destinations, signatures) are raw
//! bytes, amounts and other 256 bit integers are 32 bytes big-endian.

use alloc::{string::String, vec::Vec};

#[derive(Clone, PartialEq, prost::Message)]
pub struct Envelope {
    #[prost(message, repeated, tag = "1")]
    pub signed_states: Vec<SignedState>,
    #[prost(message, repeated, tag = "2")]
    pub objectives: Vec<Objective>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Participant {
    #[prost(string, tag = "1")]
    pub participant_id: String,
    #[prost(bytes = "vec", tag = "2")]
    pub signing_address: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub destination: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct AllocationItem {
    #[prost(bytes = "vec", tag = "1")]
    pub destination: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub amount: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Allocation {
    #[prost(message, repeated, tag = "1")]
    pub items: Vec<AllocationItem>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Guarantee {
    #[prost(bytes = "vec", tag = "1")]
    pub target_channel_id: Vec<u8>,
    #[prost(bytes = "vec", repeated, tag = "2")]
    pub destinations: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Outcome {
    #[prost(oneof = "outcome::Kind", tags = "1, 2")]
    pub kind: Option<outcome::Kind>,
}

pub mod outcome {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Kind {
        #[prost(message, tag = "1")]
        Allocation(super::Allocation),
        #[prost(message, tag = "2")]
        Guarantee(super::Guarantee),
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct State {
    #[prost(bytes = "vec", tag = "1")]
    pub chain_id: Vec<u8>,
    #[prost(message, repeated, tag = "2")]
    pub participants: Vec<Participant>,
    #[prost(bytes = "vec", tag = "3")]
    pub app_definition: Vec<u8>,
    #[prost(uint64, tag = "4")]
    pub challenge_duration: u64,
    #[prost(bytes = "vec", tag = "5")]
    pub channel_nonce: Vec<u8>,
    #[prost(uint64, tag = "6")]
    pub turn_num: u64,
    #[prost(bool, tag = "7")]
    pub is_final: bool,
    #[prost(bytes = "vec", tag = "8")]
    pub app_data: Vec<u8>,
    #[prost(message, optional, tag = "9")]
    pub outcome: Option<Outcome>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SignatureEntry {
    #[prost(bytes = "vec", tag = "1")]
    pub signer: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub signature: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SignedState {
    #[prost(message, optional, tag = "1")]
    pub state: Option<State>,
    #[prost(message, repeated, tag = "2")]
    pub signatures: Vec<SignatureEntry>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct FundLedger {
    #[prost(bytes = "vec", tag = "1")]
    pub ledger_channel_id: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct VirtualFund {
    #[prost(bytes = "vec", tag = "1")]
    pub target_channel_id: Vec<u8>,
    #[prost(message, repeated, tag = "2")]
    pub balances: Vec<AllocationItem>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct FundGuarantor {
    #[prost(bytes = "vec", tag = "1")]
    pub target_channel_id: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub joint_channel_id: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub guarantor_channel_id: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub ledger_channel_id: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct DefundVirtual {
    #[prost(bytes = "vec", tag = "1")]
    pub target_channel_id: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub joint_channel_id: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Objective {
    #[prost(message, repeated, tag = "1")]
    pub participants: Vec<Participant>,
    #[prost(oneof = "objective::Kind", tags = "2, 3, 4, 5")]
    pub kind: Option<objective::Kind>,
}

pub mod objective {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Kind {
        #[prost(message, tag = "2")]
        FundLedger(super::FundLedger),
        #[prost(message, tag = "3")]
        VirtualFund(super::VirtualFund),
        #[prost(message, tag = "4")]
        FundGuarantor(super::FundGuarantor),
        #[prost(message, tag = "5")]
        DefundVirtual(super::DefundVirtual),
    }
}
