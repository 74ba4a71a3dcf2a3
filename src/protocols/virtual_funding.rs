//! Funding a two-party channel through a hub both parties have a ledger
//! channel with.
//!
//! The hub opens a joint channel `[A, Hub, B]` allocating `[(A, a), (Hub, a +
//! b), (B, b)]` and one guarantor channel per leaf, which guarantees the
//! joint channel and is carved out of that leaf's ledger with the hub. Once
//! both guarantors are funded the joint channel moves to `[(target, a + b),
//! (Hub, a + b)]`, backing the target.

use super::{
    Child, Context, Event, FailureReason, LedgerFunding, Machine, Status, SupportState,
};
use crate::{
    canonical::types::{Destination, Hash, U256},
    chain::Chain,
    channel::{
        amount_of, AllocationItem, Funding, Guarantee, Outcome, Participant, StateVariables,
    },
    messages::Message,
    store::{Objective, ObjectiveKind},
    wire::MessageBus,
};
use alloc::{boxed::Box, vec, vec::Vec};

/// Index of the hub in the joint channel.
const HUB: usize = 1;

/// What the two leaves bring into the joint channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LeafAmounts {
    a: U256,
    b: U256,
    total: U256,
}

impl LeafAmounts {
    fn new(
        participants: &[Participant],
        balances: &[AllocationItem],
    ) -> Result<Self, FailureReason> {
        let a = amount_of(balances, &participants[0].destination)
            .ok_or(FailureReason::DestinationMissing)?;
        let b = amount_of(balances, &participants[2].destination)
            .ok_or(FailureReason::DestinationMissing)?;
        let total = a.checked_add(b).ok_or(FailureReason::InvalidOutcome)?;
        Ok(Self { a, b, total })
    }

    /// `(own, other)` from the point of view of the leaf at `joint_index`.
    fn split(&self, joint_index: usize) -> (U256, U256) {
        if joint_index == 0 {
            (self.a, self.b)
        } else {
            (self.b, self.a)
        }
    }
}

/// First state of the joint channel between `participants`.
fn joint_first_state(participants: &[Participant], amounts: &LeafAmounts) -> StateVariables {
    StateVariables::new(
        0,
        Outcome::Allocation(vec![
            AllocationItem::new(participants[0].destination, amounts.a),
            AllocationItem::new(participants[HUB].destination, amounts.total),
            AllocationItem::new(participants[2].destination, amounts.b),
        ]),
    )
}

/// The joint channel update handing the leaves' funds to `target`.
fn joint_update(
    first: &StateVariables,
    target: Hash,
    hub: Destination,
    total: U256,
) -> StateVariables {
    let mut next = first.next();
    next.outcome = Outcome::Allocation(vec![
        AllocationItem::new(target, total),
        AllocationItem::new(hub, total),
    ]);
    next
}

fn guarantor_first_state(
    joint: Hash,
    target: Hash,
    leaf: &Participant,
    hub: &Participant,
) -> StateVariables {
    StateVariables::new(
        0,
        Outcome::Guarantee(Guarantee {
            target_channel_id: joint,
            destinations: vec![target.into(), leaf.destination, hub.destination],
        }),
    )
}

/// What `leaf` moves out of its ledger with the hub into its guarantor: the
/// hub's share matching the other leaf and the leaf's own amount.
fn guarantor_deductions(
    hub: &Participant,
    leaf: &Participant,
    own: U256,
    other: U256,
) -> Vec<AllocationItem> {
    vec![
        AllocationItem::new(hub.destination, other),
        AllocationItem::new(leaf.destination, own),
    ]
}

#[derive(Debug, Clone)]
struct LeafFunding {
    joint: Hash,
    guarantor: Hash,
    joint_setup: Child<SupportState>,
    guarantor_setup: Child<SupportState>,
    ledger_funding: Child<LedgerFunding>,
    joint_update: Child<SupportState>,
}

#[derive(Debug, Clone)]
enum LeafPhase {
    Announce,
    WaitForGuarantor { participants: Vec<Participant>, balances: Vec<AllocationItem> },
    Funding(Box<LeafFunding>),
}

/// Virtual funding as one of the two participants of the target channel.
#[derive(Debug, Clone)]
pub struct VirtualFundingAsLeaf {
    target: Hash,
    hub: Participant,
    phase: LeafPhase,
}

impl VirtualFundingAsLeaf {
    pub fn new(target: Hash, hub: Participant) -> Self {
        Self {
            target,
            hub,
            phase: LeafPhase::Announce,
        }
    }

    pub fn target(&self) -> Hash {
        self.target
    }

    /// Asks the hub to fund the target once it is supported.
    fn announce<B: MessageBus, C: Chain>(
        &mut self,
        ctx: &mut Context<'_, B, C>,
    ) -> Result<bool, FailureReason> {
        let entry = ctx.entry(self.target)?;
        if entry.participants().len() != 2 {
            return Err(FailureReason::InvalidParticipants);
        }
        let balances = match entry.supported() {
            Some(s) => s.outcome.allocation()?.to_vec(),
            None => return Ok(false),
        };
        let participants = vec![
            entry.participants()[0].clone(),
            self.hub.clone(),
            entry.participants()[1].clone(),
        ];

        let objective = Objective::new(
            participants.clone(),
            ObjectiveKind::VirtualFund {
                target_channel_id: self.target,
                balances: balances.clone(),
            },
        );
        tracing::info!(
            channel = ?self.target,
            hub = %self.hub.participant_id,
            "requesting virtual funding"
        );
        ctx.send(
            &self.hub.participant_id,
            Message {
                signed_states: Vec::new(),
                objectives: vec![objective],
            },
        );
        self.phase = LeafPhase::WaitForGuarantor {
            participants,
            balances,
        };
        Ok(true)
    }

    /// Checks the channels the hub proposed in its FundGuarantor objective
    /// and sets up the machines supporting and funding them.
    fn accept_guarantor<B: MessageBus, C: Chain>(
        &self,
        ctx: &Context<'_, B, C>,
        participants: &[Participant],
        balances: &[AllocationItem],
    ) -> Result<Option<LeafFunding>, FailureReason> {
        let found = ctx.store.objectives().iter().find_map(|o| match o.kind {
            ObjectiveKind::FundGuarantor {
                target_channel_id,
                joint_channel_id,
                guarantor_channel_id,
                ledger_channel_id,
            } if target_channel_id == self.target => {
                Some((joint_channel_id, guarantor_channel_id, ledger_channel_id))
            }
            _ => None,
        });
        let (joint, guarantor, ledger) = match found {
            Some(ids) => ids,
            None => return Ok(None),
        };
        if ctx.store.ledger_with(&self.hub.participant_id)? != ledger {
            return Err(FailureReason::LedgerNotFound);
        }

        let amounts = LeafAmounts::new(participants, balances)?;
        let my_joint_index = if ctx.entry(self.target)?.my_index() == 0 { 0 } else { 2 };
        let me = &participants[my_joint_index];
        let (own, other) = amounts.split(my_joint_index);

        let joint_first = joint_first_state(participants, &amounts);
        let joint_entry = ctx.entry(joint)?;
        if joint_entry.participants() != participants
            || !joint_entry
                .states_at(0)
                .iter()
                .any(|s| s.state.variables == joint_first)
        {
            tracing::warn!(
                channel = ?self.target,
                ?joint,
                "joint channel does not match the target"
            );
            return Err(FailureReason::InvalidFirstState);
        }

        let guarantor_first = guarantor_first_state(joint, self.target, me, &self.hub);
        let guarantor_entry = ctx.entry(guarantor)?;
        if guarantor_entry.participants() != [me.clone(), self.hub.clone()]
            || !guarantor_entry
                .states_at(0)
                .iter()
                .any(|s| s.state.variables == guarantor_first)
        {
            tracing::warn!(
                channel = ?self.target,
                ?guarantor,
                "guarantor channel does not match the target"
            );
            return Err(FailureReason::InvalidFirstState);
        }

        let update = joint_update(&joint_first, self.target, self.hub.destination, amounts.total);
        Ok(Some(LeafFunding {
            joint,
            guarantor,
            joint_setup: Child::new(SupportState::new(joint, joint_first)),
            guarantor_setup: Child::new(SupportState::new(guarantor, guarantor_first)),
            ledger_funding: Child::new(LedgerFunding::with_ledger(
                guarantor,
                ledger,
                guarantor_deductions(&self.hub, me, own, other),
            )),
            joint_update: Child::new(SupportState::new(joint, update)),
        }))
    }
}

impl Machine for VirtualFundingAsLeaf {
    fn advance<B: MessageBus, C: Chain>(
        &mut self,
        ctx: &mut Context<'_, B, C>,
        event: &Event,
    ) -> Result<Status, FailureReason> {
        loop {
            match &mut self.phase {
                LeafPhase::Announce => {
                    if !self.announce(ctx)? {
                        return Ok(Status::InProgress);
                    }
                }
                LeafPhase::WaitForGuarantor {
                    participants,
                    balances,
                } => {
                    let (participants, balances) = (participants.clone(), balances.clone());
                    match self.accept_guarantor(ctx, &participants, &balances)? {
                        Some(funding) => self.phase = LeafPhase::Funding(Box::new(funding)),
                        None => return Ok(Status::InProgress),
                    }
                }
                LeafPhase::Funding(f) => {
                    let joint_ready = f.joint_setup.run(ctx, event)?;
                    let funded =
                        f.guarantor_setup.run(ctx, event)? && f.ledger_funding.run(ctx, event)?;
                    if !(joint_ready && funded && f.joint_update.run(ctx, event)?) {
                        return Ok(Status::InProgress);
                    }

                    ctx.store.set_funding(
                        f.joint,
                        Funding::Guarantee {
                            guarantor_channel_id: f.guarantor,
                        },
                    )?;
                    ctx.store.set_funding(
                        self.target,
                        Funding::Virtual {
                            joint_channel_id: f.joint,
                        },
                    )?;
                    tracing::info!(channel = ?self.target, joint = ?f.joint, "funded virtually");
                    return Ok(Status::Success);
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
struct HubFunding {
    joint: Hash,
    guarantors: [Hash; 2],
    joint_setup: Child<SupportState>,
    guarantor_setup: [Child<SupportState>; 2],
    ledger_funding: [Child<LedgerFunding>; 2],
    joint_update: Child<SupportState>,
}

/// Virtual funding as the hub, started by the leaves' VirtualFund objective.
#[derive(Debug, Clone)]
pub struct VirtualFundingAsHub {
    target: Hash,
    participants: Vec<Participant>,
    balances: Vec<AllocationItem>,
    funding: Option<Box<HubFunding>>,
}

impl VirtualFundingAsHub {
    /// `participants` are `[A, Hub, B]`, `balances` the target's allocation.
    pub fn new(
        target: Hash,
        participants: Vec<Participant>,
        balances: Vec<AllocationItem>,
    ) -> Self {
        Self {
            target,
            participants,
            balances,
            funding: None,
        }
    }

    pub fn target(&self) -> Hash {
        self.target
    }

    /// Creates the joint and both guarantor channels and sends each leaf
    /// its share.
    fn setup<B: MessageBus, C: Chain>(
        &self,
        ctx: &mut Context<'_, B, C>,
    ) -> Result<HubFunding, FailureReason> {
        let participants = &self.participants;
        if participants.len() != 3 {
            return Err(FailureReason::InvalidParticipants);
        }
        let hub = &participants[HUB];
        if !ctx.is_me(hub) {
            return Err(FailureReason::NotAParticipant);
        }
        let leaves = [&participants[0], &participants[2]];
        let ledgers = [
            ctx.store.ledger_with(&leaves[0].participant_id)?,
            ctx.store.ledger_with(&leaves[1].participant_id)?,
        ];
        let amounts = LeafAmounts::new(participants, &self.balances)?;

        let joint_first = joint_first_state(participants, &amounts);
        let (joint, joint_signed) = ctx
            .store
            .create_channel(ctx.config.constants(participants.clone()), joint_first.clone())?;
        tracing::info!(channel = ?self.target, ?joint, "created joint channel");

        let mut guarantors = [Hash::default(); 2];
        let mut guarantor_setup = Vec::with_capacity(2);
        let mut ledger_funding = Vec::with_capacity(2);
        for (i, leaf) in leaves.iter().enumerate() {
            let first = guarantor_first_state(joint, self.target, leaf, hub);
            let constants = ctx.config.constants(vec![(*leaf).clone(), hub.clone()]);
            let (guarantor, signed) = ctx.store.create_channel(constants, first.clone())?;
            guarantors[i] = guarantor;

            let objective = Objective::new(
                vec![(*leaf).clone(), hub.clone()],
                ObjectiveKind::FundGuarantor {
                    target_channel_id: self.target,
                    joint_channel_id: joint,
                    guarantor_channel_id: guarantor,
                    ledger_channel_id: ledgers[i],
                },
            );
            ctx.send(
                &leaf.participant_id,
                Message {
                    signed_states: vec![joint_signed.clone(), signed],
                    objectives: vec![objective],
                },
            );

            let (own, other) = amounts.split(2 * i);
            guarantor_setup.push(Child::new(SupportState::new(guarantor, first)));
            ledger_funding.push(Child::new(LedgerFunding::with_ledger(
                guarantor,
                ledgers[i],
                guarantor_deductions(hub, leaf, own, other),
            )));
        }

        let update = joint_update(&joint_first, self.target, hub.destination, amounts.total);
        Ok(HubFunding {
            joint,
            guarantors,
            joint_setup: Child::new(SupportState::new(joint, joint_first)),
            guarantor_setup: guarantor_setup
                .try_into()
                .map_err(|_| FailureReason::Internal)?,
            ledger_funding: ledger_funding
                .try_into()
                .map_err(|_| FailureReason::Internal)?,
            joint_update: Child::new(SupportState::new(joint, update)),
        })
    }
}

impl Machine for VirtualFundingAsHub {
    fn advance<B: MessageBus, C: Chain>(
        &mut self,
        ctx: &mut Context<'_, B, C>,
        event: &Event,
    ) -> Result<Status, FailureReason> {
        if self.funding.is_none() {
            self.funding = Some(Box::new(self.setup(ctx)?));
        }
        let f = match self.funding.as_mut() {
            Some(f) => f,
            None => return Err(FailureReason::Internal),
        };

        let joint_ready = f.joint_setup.run(ctx, event)?;
        let mut funded = true;
        for i in 0..2 {
            let ready =
                f.guarantor_setup[i].run(ctx, event)? && f.ledger_funding[i].run(ctx, event)?;
            funded &= ready;
        }
        if !(joint_ready && funded && f.joint_update.run(ctx, event)?) {
            return Ok(Status::InProgress);
        }

        ctx.store.set_funding(
            f.joint,
            Funding::Guarantee {
                guarantor_channel_id: f.guarantors[0],
            },
        )?;
        tracing::info!(
            channel = ?self.target,
            joint = ?f.joint,
            "virtual channel funded through us"
        );
        Ok(Status::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::types::Address;
    use alloc::string::ToString;

    fn participants() -> Vec<Participant> {
        (1..=3u8)
            .map(|b| Participant {
                participant_id: b.to_string(),
                signing_address: Address([b; 20]),
                destination: Address([b; 20]).into(),
            })
            .collect()
    }

    #[test]
    fn leaf_amounts_follow_the_target_allocation() {
        let p = participants();
        let balances = vec![
            AllocationItem::new(p[0].destination, 3u64),
            AllocationItem::new(p[2].destination, 4u64),
        ];
        let amounts = LeafAmounts::new(&p, &balances).unwrap();
        assert_eq!(amounts.total, U256::from(7));
        assert_eq!(amounts.split(0), (U256::from(3), U256::from(4)));
        assert_eq!(amounts.split(2), (U256::from(4), U256::from(3)));

        let first = joint_first_state(&p, &amounts);
        assert_eq!(
            amount_of(first.outcome.allocation().unwrap(), &p[HUB].destination),
            Some(U256::from(7))
        );
    }

    #[test]
    fn leaf_amounts_reject_overflow() {
        let p = participants();
        let balances = vec![
            AllocationItem::new(p[0].destination, U256::MAX),
            AllocationItem::new(p[2].destination, 1u64),
        ];
        assert_eq!(
            LeafAmounts::new(&p, &balances),
            Err(FailureReason::InvalidOutcome)
        );
    }

    #[test]
    fn leaf_amounts_need_both_leaves() {
        let p = participants();
        let balances = vec![AllocationItem::new(p[0].destination, 3u64)];
        assert_eq!(
            LeafAmounts::new(&p, &balances),
            Err(FailureReason::DestinationMissing)
        );
    }
}
