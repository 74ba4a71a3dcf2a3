use super::{Context, Event, FailureReason, Machine, Status};
use crate::{
    canonical::types::{Hash, U256},
    chain::{Chain, ChainEvent},
    channel::{amount_before, amount_of, Funding},
    wire::MessageBus,
};

/// Deposits our share of a channel on chain, in allocation order: we only
/// deposit once everything allocated before us is held.
#[derive(Debug, Clone)]
pub struct DirectFunding {
    channel_id: Hash,
    deposit_submitted: bool,
}

impl DirectFunding {
    pub fn new(channel_id: Hash) -> Self {
        Self {
            channel_id,
            deposit_submitted: false,
        }
    }

    pub fn channel_id(&self) -> Hash {
        self.channel_id
    }

    fn finish<B: MessageBus, C: Chain>(
        &self,
        ctx: &mut Context<'_, B, C>,
    ) -> Result<Status, FailureReason> {
        ctx.store.set_funding(self.channel_id, Funding::Direct)?;
        tracing::info!(channel = ?self.channel_id, "channel funded on chain");
        Ok(Status::Success)
    }
}

impl Machine for DirectFunding {
    fn advance<B: MessageBus, C: Chain>(
        &mut self,
        ctx: &mut Context<'_, B, C>,
        event: &Event,
    ) -> Result<Status, FailureReason> {
        if let Event::Chain(ChainEvent::TransactionFailed { channel_id }) = event {
            if *channel_id == self.channel_id {
                return Err(FailureReason::TransactionFailure);
            }
        }

        let entry = ctx.entry(self.channel_id)?;
        if entry.funding() == Some(Funding::Direct) {
            return Ok(Status::Success);
        }
        let supported = match entry.supported() {
            Some(s) => s,
            None => return Ok(Status::InProgress),
        };

        let items = supported.outcome.allocation()?;
        let me = entry.participants()[entry.my_index()].destination;
        let total = items
            .iter()
            .try_fold(U256::zero(), |acc, item| acc.checked_add(item.amount))
            .ok_or(FailureReason::InvalidOutcome)?;
        // A participant without an item has nothing to deposit and simply
        // waits for the others.
        let before = amount_before(items, &me).unwrap_or(total);
        let mine = amount_of(items, &me).unwrap_or_default();
        let target = before + mine;

        let holdings = ctx.chain.get_holdings(self.channel_id);
        if holdings >= total {
            return self.finish(ctx);
        }
        if holdings >= target || holdings < before || self.deposit_submitted {
            return Ok(Status::InProgress);
        }

        let amount = target - holdings;
        tracing::info!(channel = ?self.channel_id, %amount, "depositing");
        self.deposit_submitted = true;
        ctx.chain
            .deposit(self.channel_id, holdings, amount)
            .map_err(|e| {
                tracing::warn!(channel = ?self.channel_id, error = %e, "deposit failed");
                FailureReason::TransactionFailure
            })?;

        if ctx.chain.get_holdings(self.channel_id) >= total {
            return self.finish(ctx);
        }
        Ok(Status::InProgress)
    }
}
