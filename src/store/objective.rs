use crate::{
    canonical::types::Hash,
    channel::{AllocationItem, Participant},
};
use alloc::vec::Vec;

/// A task that needs the cooperation of `participants`.
///
/// Objectives are announced to peers and deduplicated by equality, so two
/// leaves announcing the same virtual channel produce one objective.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Objective {
    pub participants: Vec<Participant>,
    pub kind: ObjectiveKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectiveKind {
    /// The two-party channel `ledger_channel_id` becomes the ledger between
    /// its participants and is funded on chain.
    FundLedger { ledger_channel_id: Hash },
    /// The leaves of `target_channel_id` ask the hub to fund it, `balances`
    /// is the target's allocation.
    VirtualFund {
        target_channel_id: Hash,
        balances: Vec<AllocationItem>,
    },
    /// Sent by the hub: the joint and guarantor channels backing the target,
    /// and the ledger the guarantor is carved out of.
    FundGuarantor {
        target_channel_id: Hash,
        joint_channel_id: Hash,
        guarantor_channel_id: Hash,
        ledger_channel_id: Hash,
    },
    /// A leaf asks the hub to unwind the virtual funding of a closed target.
    DefundVirtual {
        target_channel_id: Hash,
        joint_channel_id: Hash,
    },
}

impl Objective {
    pub fn new(participants: Vec<Participant>, kind: ObjectiveKind) -> Self {
        Self { participants, kind }
    }

    /// The channel the objective is about.
    pub fn channel_id(&self) -> Hash {
        match &self.kind {
            ObjectiveKind::FundLedger { ledger_channel_id } => *ledger_channel_id,
            ObjectiveKind::VirtualFund {
                target_channel_id, ..
            }
            | ObjectiveKind::FundGuarantor {
                target_channel_id, ..
            }
            | ObjectiveKind::DefundVirtual {
                target_channel_id, ..
            } => *target_channel_id,
        }
    }
}
