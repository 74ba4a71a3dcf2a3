//! Returning the funds of a closed channel to the ledgers it was carved out
//! of.

use super::{
    Change, Child, Context, Event, FailureReason, Machine, Reallocation, Status, SupportState,
};
use crate::{
    canonical::types::{Destination, Hash, U256},
    chain::Chain,
    channel::{amount_of, AllocationItem, Funding, Outcome, Participant, StateVariables},
    messages::Message,
    store::{Objective, ObjectiveKind},
    wire::MessageBus,
};
use alloc::{boxed::Box, vec, vec::Vec};

const HUB: usize = 1;

/// The final allocation of `target`, failing unless it is supported.
fn final_allocation<B: MessageBus, C: Chain>(
    ctx: &Context<'_, B, C>,
    target: Hash,
) -> Result<Vec<AllocationItem>, FailureReason> {
    let entry = ctx.entry(target)?;
    match entry.supported() {
        Some(s) if s.is_final => Ok(s.outcome.allocation()?.to_vec()),
        _ => Err(FailureReason::ChannelNotClosed),
    }
}

/// Fails once `channel` has been finalized on chain.
fn still_off_chain<B: MessageBus, C: Chain>(
    ctx: &Context<'_, B, C>,
    channel: Hash,
) -> Result<(), FailureReason> {
    match ctx.entry(channel)?.finalized_on_chain() {
        Some(turn_num_record) => {
            tracing::warn!(channel = ?channel, turn_num_record, "finalized on chain");
            Err(FailureReason::FinalizedOnChain)
        }
        None => Ok(()),
    }
}

fn ledger_of<B: MessageBus, C: Chain>(
    ctx: &Context<'_, B, C>,
    channel: Hash,
) -> Result<Hash, FailureReason> {
    match ctx.entry(channel)?.funding() {
        Some(Funding::Indirect { ledger_id }) => Ok(ledger_id),
        _ => Err(FailureReason::NotFunded),
    }
}

/// Removes a ledger funded channel's item from the ledger, crediting its final
/// allocation back.
#[derive(Debug, Clone)]
pub struct LedgerDefunding {
    target: Hash,
    reallocation: Option<Child<Reallocation>>,
}

impl LedgerDefunding {
    pub fn new(target: Hash) -> Self {
        Self {
            target,
            reallocation: None,
        }
    }

    pub fn target(&self) -> Hash {
        self.target
    }
}

impl Machine for LedgerDefunding {
    fn advance<B: MessageBus, C: Chain>(
        &mut self,
        ctx: &mut Context<'_, B, C>,
        event: &Event,
    ) -> Result<Status, FailureReason> {
        still_off_chain(ctx, self.target)?;
        let reallocation = match &mut self.reallocation {
            Some(r) => r,
            None => {
                let ledger = ledger_of(ctx, self.target)?;
                let payouts = final_allocation(ctx, self.target)?;
                tracing::info!(channel = ?self.target, ?ledger, "defunding from ledger");
                let change = Change::Defund {
                    target: self.target.into(),
                    payouts,
                };
                self.reallocation
                    .insert(Child::new(Reallocation::new(ledger, change)))
            }
        };
        if reallocation.run(ctx, event)? {
            tracing::info!(channel = ?self.target, "defunded");
            Ok(Status::Success)
        } else {
            Ok(Status::InProgress)
        }
    }
}

/// The joint channel update paying the leaves their final amounts, given the
/// supported joint state backing `target`. Returns the state itself if it
/// already pays the leaves.
fn joint_unwind(
    joint: &StateVariables,
    participants: &[Participant],
    target: Hash,
    leaf_amounts: (U256, U256),
) -> Result<StateVariables, FailureReason> {
    let items = joint.outcome.allocation()?;
    let target_amount = match amount_of(items, &Destination::from(target)) {
        Some(amount) => amount,
        None => return Ok(joint.clone()),
    };
    let (x, y) = leaf_amounts;
    if x.checked_add(y) != Some(target_amount) {
        return Err(FailureReason::InvalidOutcome);
    }
    let hub_amount = amount_of(items, &participants[HUB].destination)
        .ok_or(FailureReason::DestinationMissing)?;

    let mut next = joint.next();
    next.outcome = Outcome::Allocation(vec![
        AllocationItem::new(participants[0].destination, x),
        AllocationItem::new(participants[HUB].destination, hub_amount),
        AllocationItem::new(participants[2].destination, y),
    ]);
    Ok(next)
}

/// Payouts closing `leaf`'s guarantor: the leaf gets what it ends up with in
/// the joint channel, the hub the rest of the guarantor's item.
fn guarantor_payouts(
    joint: &StateVariables,
    leaf: &Participant,
    hub: &Participant,
) -> Result<Vec<AllocationItem>, FailureReason> {
    let items = joint.outcome.allocation()?;
    let own = amount_of(items, &leaf.destination).unwrap_or_default();
    let hub_amount = amount_of(items, &hub.destination).ok_or(FailureReason::DestinationMissing)?;
    let rest = hub_amount
        .checked_sub(own)
        .ok_or(FailureReason::InvalidOutcome)?;
    Ok(vec![
        AllocationItem::new(leaf.destination, own),
        AllocationItem::new(hub.destination, rest),
    ])
}

#[derive(Debug, Clone)]
struct LeafDefunding {
    joint: Hash,
    ledger: Hash,
    guarantor: Hash,
    unwind: Child<SupportState>,
    reallocation: Option<Child<Reallocation>>,
}

/// Virtual defunding as a leaf: pays the target's final allocation out of
/// the joint channel, then closes our guarantor in the ledger with the hub.
#[derive(Debug, Clone)]
pub struct VirtualDefundingAsLeaf {
    target: Hash,
    state: Option<Box<LeafDefunding>>,
}

impl VirtualDefundingAsLeaf {
    pub fn new(target: Hash) -> Self {
        Self {
            target,
            state: None,
        }
    }

    pub fn target(&self) -> Hash {
        self.target
    }

    fn start<B: MessageBus, C: Chain>(
        &self,
        ctx: &Context<'_, B, C>,
    ) -> Result<LeafDefunding, FailureReason> {
        let joint = match ctx.entry(self.target)?.funding() {
            Some(Funding::Virtual { joint_channel_id }) => joint_channel_id,
            _ => return Err(FailureReason::NotFunded),
        };
        let target_final = final_allocation(ctx, self.target)?;
        let guarantor = match ctx.entry(joint)?.funding() {
            Some(Funding::Guarantee {
                guarantor_channel_id,
            }) => guarantor_channel_id,
            _ => return Err(FailureReason::NotFunded),
        };
        let ledger = ledger_of(ctx, guarantor)?;

        let joint_entry = ctx.entry(joint)?;
        let participants = joint_entry.participants().to_vec();
        if participants.len() != 3 {
            return Err(FailureReason::InvalidParticipants);
        }
        let supported = joint_entry
            .supported()
            .cloned()
            .ok_or(FailureReason::NotFunded)?;
        let leaf_amounts = (
            amount_of(&target_final, &participants[0].destination).unwrap_or_default(),
            amount_of(&target_final, &participants[2].destination).unwrap_or_default(),
        );
        let unwind = joint_unwind(&supported, &participants, self.target, leaf_amounts)?;

        tracing::info!(channel = ?self.target, ?joint, "defunding virtual channel");
        let objective = Objective::new(
            participants.clone(),
            ObjectiveKind::DefundVirtual {
                target_channel_id: self.target,
                joint_channel_id: joint,
            },
        );
        ctx.send(
            &participants[HUB].participant_id,
            Message {
                signed_states: Vec::new(),
                objectives: vec![objective],
            },
        );

        Ok(LeafDefunding {
            joint,
            ledger,
            guarantor,
            unwind: Child::new(SupportState::new(joint, unwind)),
            reallocation: None,
        })
    }
}

impl Machine for VirtualDefundingAsLeaf {
    fn advance<B: MessageBus, C: Chain>(
        &mut self,
        ctx: &mut Context<'_, B, C>,
        event: &Event,
    ) -> Result<Status, FailureReason> {
        still_off_chain(ctx, self.target)?;
        if self.state.is_none() {
            self.state = Some(Box::new(self.start(ctx)?));
        }
        let d = match self.state.as_mut() {
            Some(d) => d,
            None => return Err(FailureReason::Internal),
        };
        if !d.unwind.run(ctx, event)? {
            return Ok(Status::InProgress);
        }

        let reallocation = match &mut d.reallocation {
            Some(r) => r,
            None => {
                let joint_entry = ctx.entry(d.joint)?;
                let participants = joint_entry.participants();
                let me = &participants[joint_entry.my_index()];
                let unwound = joint_entry.supported().ok_or(FailureReason::NotFunded)?;
                let change = Change::Defund {
                    target: d.guarantor.into(),
                    payouts: guarantor_payouts(unwound, me, &participants[HUB])?,
                };
                d.reallocation
                    .insert(Child::new(Reallocation::new(d.ledger, change)))
            }
        };
        if reallocation.run(ctx, event)? {
            tracing::info!(channel = ?self.target, "virtual channel defunded");
            Ok(Status::Success)
        } else {
            Ok(Status::InProgress)
        }
    }
}

#[derive(Debug, Clone)]
enum HubPhase {
    WaitForProposal,
    Countersign(Child<SupportState>),
    Reallocate([Child<Reallocation>; 2]),
}

/// Virtual defunding as the hub: countersigns the leaves' joint update if
/// it keeps our share, then closes both guarantors.
#[derive(Debug, Clone)]
pub struct VirtualDefundingAsHub {
    target: Hash,
    joint: Hash,
    phase: HubPhase,
}

impl VirtualDefundingAsHub {
    pub fn new(target: Hash, joint: Hash) -> Self {
        Self {
            target,
            joint,
            phase: HubPhase::WaitForProposal,
        }
    }

    pub fn target(&self) -> Hash {
        self.target
    }

    /// The joint update proposed by one of the leaves, if it is acceptable.
    fn proposal<B: MessageBus, C: Chain>(
        &self,
        ctx: &Context<'_, B, C>,
    ) -> Result<Option<StateVariables>, FailureReason> {
        let entry = ctx.entry(self.joint)?;
        let participants = entry.participants();
        if participants.len() != 3 || !ctx.is_me(&participants[HUB]) {
            return Err(FailureReason::InvalidParticipants);
        }
        let supported = match entry.supported() {
            Some(s) => s,
            None => return Ok(None),
        };
        let items = supported.outcome.allocation()?;
        if amount_of(items, &Destination::from(self.target)).is_none() {
            // Already unwound.
            return Ok(Some(supported.clone()));
        }

        let leaves = [participants[0].signing_address, participants[2].signing_address];
        let proposed = match entry
            .states_at(supported.turn_num + 1)
            .into_iter()
            .find(|s| leaves.iter().any(|l| s.is_signed_by(l)))
        {
            Some(s) => s.state.variables,
            None => return Ok(None),
        };
        let proposed_items = proposed.outcome.allocation()?;
        let leaf_amounts = (
            amount_of(proposed_items, &participants[0].destination).unwrap_or_default(),
            amount_of(proposed_items, &participants[2].destination).unwrap_or_default(),
        );
        let expected = joint_unwind(supported, participants, self.target, leaf_amounts)?;
        if expected != proposed {
            tracing::warn!(joint = ?self.joint, turn = proposed.turn_num, "rejected joint update");
            return Err(FailureReason::InvalidOutcome);
        }
        Ok(Some(expected))
    }

    /// Finds the guarantor of `joint` shared with `leaf` among our channels.
    fn guarantor_with<B: MessageBus, C: Chain>(
        &self,
        ctx: &Context<'_, B, C>,
        leaf: &Participant,
    ) -> Result<Hash, FailureReason> {
        ctx.store
            .channel_ids()
            .copied()
            .find(|id| {
                ctx.store.get_entry(*id).map_or(false, |e| {
                    e.participants().contains(leaf)
                        && e.all_signed_states().iter().any(|s| {
                            matches!(&s.state.variables.outcome,
                                Outcome::Guarantee(g) if g.target_channel_id == self.joint)
                        })
                })
            })
            .ok_or(FailureReason::ChannelNotFound)
    }

    fn reallocations<B: MessageBus, C: Chain>(
        &self,
        ctx: &Context<'_, B, C>,
    ) -> Result<[Child<Reallocation>; 2], FailureReason> {
        let entry = ctx.entry(self.joint)?;
        let participants = entry.participants();
        let unwound = entry.supported().ok_or(FailureReason::NotFunded)?;
        let hub = &participants[HUB];

        let reallocate = |leaf: &Participant| -> Result<Child<Reallocation>, FailureReason> {
            let guarantor = self.guarantor_with(ctx, leaf)?;
            let ledger = ledger_of(ctx, guarantor)?;
            let change = Change::Defund {
                target: guarantor.into(),
                payouts: guarantor_payouts(unwound, leaf, hub)?,
            };
            Ok(Child::new(Reallocation::new(ledger, change)))
        };
        Ok([reallocate(&participants[0])?, reallocate(&participants[2])?])
    }
}

impl Machine for VirtualDefundingAsHub {
    fn advance<B: MessageBus, C: Chain>(
        &mut self,
        ctx: &mut Context<'_, B, C>,
        event: &Event,
    ) -> Result<Status, FailureReason> {
        still_off_chain(ctx, self.joint)?;
        loop {
            match &mut self.phase {
                HubPhase::WaitForProposal => match self.proposal(ctx)? {
                    Some(vars) => {
                        tracing::info!(
                            joint = ?self.joint,
                            turn = vars.turn_num,
                            "countersigning joint update"
                        );
                        self.phase =
                            HubPhase::Countersign(Child::new(SupportState::new(self.joint, vars)));
                    }
                    None => return Ok(Status::InProgress),
                },
                HubPhase::Countersign(support) => {
                    if !support.run(ctx, event)? {
                        return Ok(Status::InProgress);
                    }
                    self.phase = HubPhase::Reallocate(self.reallocations(ctx)?);
                }
                HubPhase::Reallocate(children) => {
                    let mut done = true;
                    for child in children.iter_mut() {
                        done &= child.run(ctx, event)?;
                    }
                    if !done {
                        return Ok(Status::InProgress);
                    }
                    tracing::info!(
                        channel = ?self.target,
                        joint = ?self.joint,
                        "virtual channel defunded"
                    );
                    return Ok(Status::Success);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::types::Address;
    use alloc::string::ToString;

    fn participant(b: u8) -> Participant {
        Participant {
            participant_id: b.to_string(),
            signing_address: Address([b; 20]),
            destination: Address([b; 20]).into(),
        }
    }

    fn joint(target: Hash, participants: &[Participant]) -> StateVariables {
        let mut joint = StateVariables::new(0, Outcome::Allocation(vec![])).next();
        joint.outcome = Outcome::Allocation(vec![
            AllocationItem::new(target, 7u64),
            AllocationItem::new(participants[HUB].destination, 7u64),
        ]);
        joint
    }

    #[test]
    fn unwinding_splits_target_between_leaves() {
        let participants = [participant(1), participant(2), participant(3)];
        let target = Hash([9; 32]);
        let joint = joint(target, &participants);

        let split = (U256::from(5), U256::from(2));
        let unwound = joint_unwind(&joint, &participants, target, split).unwrap();
        assert_eq!(unwound.turn_num, 2);
        assert_eq!(
            unwound.outcome,
            Outcome::Allocation(vec![
                AllocationItem::new(participants[0].destination, 5u64),
                AllocationItem::new(participants[1].destination, 7u64),
                AllocationItem::new(participants[2].destination, 2u64),
            ])
        );

        // Unwinding twice is a no-op.
        assert_eq!(
            joint_unwind(&unwound, &participants, target, split).unwrap(),
            unwound
        );

        assert_eq!(
            guarantor_payouts(&unwound, &participants[0], &participants[1]).unwrap(),
            vec![
                AllocationItem::new(participants[0].destination, 5u64),
                AllocationItem::new(participants[1].destination, 2u64),
            ]
        );
        assert_eq!(
            guarantor_payouts(&unwound, &participants[2], &participants[1]).unwrap(),
            vec![
                AllocationItem::new(participants[2].destination, 2u64),
                AllocationItem::new(participants[1].destination, 5u64),
            ]
        );
    }

    #[test]
    fn unwinding_rejects_wrong_total() {
        let participants = [participant(1), participant(2), participant(3)];
        let target = Hash([9; 32]);
        assert_eq!(
            joint_unwind(
                &joint(target, &participants),
                &participants,
                target,
                (U256::from(5), U256::from(3))
            ),
            Err(FailureReason::InvalidOutcome)
        );
    }
}
