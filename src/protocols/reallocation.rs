//! Agreeing on a new allocation of a two-party ledger channel.
//!
//! Only the ledger's participant 0 proposes, guarded by the ledger lock for
//! its peer. The other participant countersigns a proposal for the next turn
//! iff it carries exactly the outcome it computes itself from the same
//! supported ledger state. Both sides therefore run into the same errors.

use super::{Context, Event, FailureReason, Machine, Status};
use crate::{
    canonical::types::{Destination, Hash},
    chain::Chain,
    channel::{
        allocate_to_target, return_to_ledger, AllocationItem, Outcome, OutcomeError,
        StateVariables,
    },
    store::{LockStatus, LockToken},
    wire::MessageBus,
};
use alloc::{string::String, vec, vec::Vec};

/// How the ledger allocation changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// Move `deductions` into a new item paying `target`.
    Fund {
        target: Destination,
        deductions: Vec<AllocationItem>,
    },
    /// Remove the item paying `target` and pay its amount out to `payouts`.
    Defund {
        target: Destination,
        payouts: Vec<AllocationItem>,
    },
}

impl Change {
    pub fn apply(&self, ledger: &[AllocationItem]) -> Result<Vec<AllocationItem>, OutcomeError> {
        match self {
            Change::Fund { target, deductions } => allocate_to_target(deductions, ledger, *target),
            Change::Defund { target, payouts } => return_to_ledger(ledger, *target, payouts),
        }
    }

    fn target(&self) -> Destination {
        match self {
            Change::Fund { target, .. } | Change::Defund { target, .. } => *target,
        }
    }

    /// Whether `ledger` already reflects this change.
    fn is_applied(&self, ledger: &[AllocationItem]) -> bool {
        let present = ledger.iter().any(|i| i.destination == self.target());
        match self {
            Change::Fund { .. } => present,
            Change::Defund { .. } => !present,
        }
    }
}

#[derive(Debug, Clone)]
enum Phase {
    Start,
    WaitForLock,
    WaitForCountersignature { token: LockToken, proposal: StateVariables },
    WaitForProposal,
    WaitForSupport(StateVariables),
}

#[derive(Debug, Clone)]
pub struct Reallocation {
    ledger_id: Hash,
    change: Change,
    phase: Phase,
}

impl Reallocation {
    pub fn new(ledger_id: Hash, change: Change) -> Self {
        Self {
            ledger_id,
            change,
            phase: Phase::Start,
        }
    }

    fn peer<B: MessageBus, C: Chain>(
        &self,
        ctx: &Context<'_, B, C>,
    ) -> Result<String, FailureReason> {
        let entry = ctx.entry(self.ledger_id)?;
        if entry.participants().len() != 2 {
            return Err(FailureReason::InvalidParticipants);
        }
        Ok(entry.participants()[1 - entry.my_index()]
            .participant_id
            .clone())
    }

    /// The supported ledger state and the state that would apply the change
    /// to it.
    fn next_state<B: MessageBus, C: Chain>(
        &self,
        ctx: &Context<'_, B, C>,
    ) -> Result<Option<(StateVariables, StateVariables)>, FailureReason> {
        let entry = ctx.entry(self.ledger_id)?;
        let supported = match entry.supported() {
            Some(s) => s.clone(),
            None => return Ok(None),
        };
        let items = self.change.apply(supported.outcome.allocation()?)?;
        let mut next = supported.next();
        next.outcome = Outcome::Allocation(items);
        Ok(Some((supported, next)))
    }

    fn propose<B: MessageBus, C: Chain>(
        &mut self,
        ctx: &mut Context<'_, B, C>,
        token: LockToken,
    ) -> Result<Status, FailureReason> {
        let proposal = match self.next_state(ctx) {
            Ok(Some((_, next))) => next,
            Ok(None) => {
                // Nothing to build on yet, give others a chance.
                release(ctx, &token);
                self.phase = Phase::Start;
                return Ok(Status::InProgress);
            }
            Err(reason) => {
                release(ctx, &token);
                return Err(reason);
            }
        };

        tracing::info!(
            ledger = ?self.ledger_id,
            turn = proposal.turn_num,
            "proposing reallocation"
        );
        let signed = ctx.store.sign_and_add(self.ledger_id, proposal.clone())?;
        ctx.send_states(self.ledger_id, vec![signed])?;
        self.phase = Phase::WaitForCountersignature { token, proposal };
        self.check_countersigned(ctx)
    }

    fn check_countersigned<B: MessageBus, C: Chain>(
        &mut self,
        ctx: &mut Context<'_, B, C>,
    ) -> Result<Status, FailureReason> {
        if let Phase::WaitForCountersignature { token, proposal } = &self.phase {
            let entry = ctx.entry(self.ledger_id)?;
            if entry.supported() == Some(proposal) {
                let token = token.clone();
                release(ctx, &token);
                tracing::info!(ledger = ?self.ledger_id, "reallocation supported");
                return Ok(Status::Success);
            }
        }
        Ok(Status::InProgress)
    }

    fn countersign<B: MessageBus, C: Chain>(
        &mut self,
        ctx: &mut Context<'_, B, C>,
    ) -> Result<Status, FailureReason> {
        let entry = ctx.entry(self.ledger_id)?;
        match entry.supported() {
            None => return Ok(Status::InProgress),
            // Supported before we got to see the proposal.
            Some(s) if self.change.is_applied(s.outcome.allocation()?) => {
                return Ok(Status::Success)
            }
            Some(_) => {}
        }
        let expected = match self.next_state(ctx)? {
            Some((_, next)) => next,
            None => return Ok(Status::InProgress),
        };

        let entry = ctx.entry(self.ledger_id)?;
        let proposer = entry.participants()[0].signing_address;
        let proposed = entry
            .states_at(expected.turn_num)
            .into_iter()
            .any(|s| s.state.variables == expected && s.is_signed_by(&proposer));
        if !proposed {
            return Ok(Status::InProgress);
        }

        tracing::info!(
            ledger = ?self.ledger_id,
            turn = expected.turn_num,
            "countersigning reallocation"
        );
        let signed = ctx.store.sign_and_add(self.ledger_id, expected.clone())?;
        ctx.send_states(self.ledger_id, vec![signed])?;
        self.phase = Phase::WaitForSupport(expected);
        self.check_supported(ctx)
    }

    fn check_supported<B: MessageBus, C: Chain>(
        &self,
        ctx: &Context<'_, B, C>,
    ) -> Result<Status, FailureReason> {
        if let Phase::WaitForSupport(expected) = &self.phase {
            let entry = ctx.entry(self.ledger_id)?;
            if entry.is_signed_by_me(expected)
                && entry
                    .supported()
                    .map_or(false, |s| s.turn_num >= expected.turn_num)
            {
                return Ok(Status::Success);
            }
        }
        Ok(Status::InProgress)
    }
}

fn release<B: MessageBus, C: Chain>(ctx: &mut Context<'_, B, C>, token: &LockToken) {
    if let Err(e) = ctx.store.release_ledger(token) {
        tracing::warn!(error = %e, "releasing ledger lock failed");
    }
}

impl Machine for Reallocation {
    fn advance<B: MessageBus, C: Chain>(
        &mut self,
        ctx: &mut Context<'_, B, C>,
        event: &Event,
    ) -> Result<Status, FailureReason> {
        let proposer = ctx.entry(self.ledger_id)?.my_index() == 0;

        match self.phase.clone() {
            Phase::Start if proposer => {
                let peer = self.peer(ctx)?;
                match ctx.store.lock_ledger(&peer, ctx.process) {
                    LockStatus::Granted(token) => self.propose(ctx, token),
                    LockStatus::Queued => {
                        self.phase = Phase::WaitForLock;
                        Ok(Status::InProgress)
                    }
                }
            }
            Phase::Start | Phase::WaitForProposal => {
                self.phase = Phase::WaitForProposal;
                self.countersign(ctx)
            }
            Phase::WaitForLock => match event {
                Event::LockGranted(token) if token.peer == self.peer(ctx)? => {
                    self.propose(ctx, token.clone())
                }
                _ => Ok(Status::InProgress),
            },
            Phase::WaitForCountersignature { .. } => self.check_countersigned(ctx),
            Phase::WaitForSupport(_) => self.check_supported(ctx),
        }
    }
}
