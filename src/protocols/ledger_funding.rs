use super::{Change, Child, Context, Event, FailureReason, Machine, Reallocation, Status};
use crate::{
    canonical::types::{Destination, Hash},
    chain::Chain,
    channel::{AllocationItem, Funding, StateVariables},
    messages::Message,
    store::{Objective, ObjectiveKind},
    wire::MessageBus,
};
use alloc::{string::String, vec, vec::Vec};

#[derive(Debug, Clone)]
enum Phase {
    FindLedger,
    WaitForLedgerFunding,
    Reallocating(Child<Reallocation>),
}

/// Funds a two-party channel from the ledger channel shared by its
/// participants, creating and funding that ledger first if there is none.
#[derive(Debug, Clone)]
pub struct LedgerFunding {
    target: Hash,
    ledger: Option<Hash>,
    deductions: Option<Vec<AllocationItem>>,
    phase: Phase,
}

impl LedgerFunding {
    /// Funds `target` from the ledger with its other participant, each
    /// participant contributing its own share of the target's allocation.
    pub fn new(target: Hash) -> Self {
        Self {
            target,
            ledger: None,
            deductions: None,
            phase: Phase::FindLedger,
        }
    }

    /// Funds `target` from a known ledger with explicit deductions.
    pub fn with_ledger(target: Hash, ledger: Hash, deductions: Vec<AllocationItem>) -> Self {
        Self {
            target,
            ledger: Some(ledger),
            deductions: Some(deductions),
            phase: Phase::FindLedger,
        }
    }

    pub fn target(&self) -> Hash {
        self.target
    }

    fn peer<B: MessageBus, C: Chain>(
        &self,
        ctx: &Context<'_, B, C>,
    ) -> Result<String, FailureReason> {
        let entry = ctx.entry(self.target)?;
        if entry.participants().len() != 2 {
            return Err(FailureReason::InvalidParticipants);
        }
        Ok(entry.participants()[1 - entry.my_index()]
            .participant_id
            .clone())
    }

    fn find_ledger<B: MessageBus, C: Chain>(
        &mut self,
        ctx: &mut Context<'_, B, C>,
    ) -> Result<Option<Hash>, FailureReason> {
        if let Some(ledger) = self.ledger {
            return Ok(Some(ledger));
        }
        let peer = self.peer(ctx)?;
        if let Ok(ledger) = ctx.store.ledger_with(&peer) {
            self.ledger = Some(ledger);
            return Ok(Some(ledger));
        }

        let entry = ctx.entry(self.target)?;
        if entry.my_index() != 0 {
            // The peer creates the ledger and tells us with a FundLedger
            // objective.
            return Ok(None);
        }
        let first = match entry.supported() {
            Some(s) => StateVariables::new(0, s.outcome.clone()),
            None => return Ok(None),
        };
        let constants = ctx.config.constants(entry.participants().to_vec());

        let (ledger, signed) = ctx.store.create_channel(constants, first)?;
        ctx.store.set_ledger(&peer, ledger)?;
        tracing::info!(channel = ?self.target, ?ledger, "created ledger channel");

        let objective = Objective::new(
            signed.state.constants.participants.clone(),
            ObjectiveKind::FundLedger {
                ledger_channel_id: ledger,
            },
        );
        ctx.store.add_objective(objective.clone())?;
        ctx.send(
            &peer,
            Message {
                signed_states: vec![signed],
                objectives: vec![objective],
            },
        );
        self.ledger = Some(ledger);
        Ok(Some(ledger))
    }

    fn deductions<B: MessageBus, C: Chain>(
        &self,
        ctx: &Context<'_, B, C>,
    ) -> Result<Option<Vec<AllocationItem>>, FailureReason> {
        if let Some(d) = &self.deductions {
            return Ok(Some(d.clone()));
        }
        let entry = ctx.entry(self.target)?;
        match entry.supported() {
            Some(s) => Ok(Some(s.outcome.allocation()?.to_vec())),
            None => Ok(None),
        }
    }
}

impl Machine for LedgerFunding {
    fn advance<B: MessageBus, C: Chain>(
        &mut self,
        ctx: &mut Context<'_, B, C>,
        event: &Event,
    ) -> Result<Status, FailureReason> {
        loop {
            match &mut self.phase {
                Phase::FindLedger => {
                    if self.find_ledger(ctx)?.is_none() {
                        return Ok(Status::InProgress);
                    }
                    self.phase = Phase::WaitForLedgerFunding;
                }
                Phase::WaitForLedgerFunding => {
                    let ledger = self.ledger.ok_or(FailureReason::LedgerNotFound)?;
                    if ctx.entry(ledger)?.funding().is_none() {
                        return Ok(Status::InProgress);
                    }
                    let deductions = match self.deductions(ctx)? {
                        Some(d) => d,
                        None => return Ok(Status::InProgress),
                    };
                    let change = Change::Fund {
                        target: Destination::from(self.target),
                        deductions,
                    };
                    self.phase = Phase::Reallocating(Child::new(Reallocation::new(ledger, change)));
                }
                Phase::Reallocating(realloc) => {
                    if !realloc.run(ctx, event)? {
                        return Ok(Status::InProgress);
                    }
                    let ledger = self.ledger.ok_or(FailureReason::LedgerNotFound)?;
                    ctx.store
                        .set_funding(self.target, Funding::Indirect { ledger_id: ledger })?;
                    tracing::info!(channel = ?self.target, ?ledger, "funded from ledger");
                    return Ok(Status::Success);
                }
            }
        }
    }
}
