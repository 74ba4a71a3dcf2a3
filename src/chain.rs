//! Interface to the adjudicator contract holding channel deposits.
//!
//! Transaction encoding and event watching live outside this crate: a
//! [Chain] submits deposits and answers holdings queries, the watcher feeds
//! [ChainEvent]s into [Wallet::on_chain_event][crate::Wallet::on_chain_event].

use crate::canonical::types::{Hash, U256};
use alloc::{collections::BTreeMap, rc::Rc, vec::Vec};
use core::{
    cell::RefCell,
    fmt::{Debug, Display},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxReceipt {
    pub channel_id: Hash,
    pub new_holdings: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// The contract's holdings were below `expected_held`.
    HoldingsBelowExpected { held: U256, expected_held: U256 },
    /// Submission failed for a reason not known to the contract rules.
    Rejected,
}

impl Display for ChainError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ChainError::HoldingsBelowExpected { held, expected_held } => write!(
                f,
                "holdings {} below the expected {}",
                held, expected_held
            ),
            ChainError::Rejected => f.write_str("transaction rejected"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    Deposited {
        channel_id: Hash,
        amount_deposited: U256,
        new_holdings: U256,
    },
    Finalized {
        channel_id: Hash,
        turn_num_record: u64,
    },
    /// A transaction submitted earlier did not make it on chain.
    TransactionFailed { channel_id: Hash },
}

impl ChainEvent {
    pub fn channel_id(&self) -> Hash {
        match self {
            ChainEvent::Deposited { channel_id, .. }
            | ChainEvent::Finalized { channel_id, .. }
            | ChainEvent::TransactionFailed { channel_id } => *channel_id,
        }
    }
}

pub trait Chain: Debug {
    fn get_holdings(&self, channel_id: Hash) -> U256;

    /// Deposits `amount` if the contract currently holds at least
    /// `expected_held` for the channel.
    fn deposit(
        &mut self,
        channel_id: Hash,
        expected_held: U256,
        amount: U256,
    ) -> Result<TxReceipt, ChainError>;
}

#[derive(Debug, Default)]
struct Adjudicator {
    holdings: BTreeMap<Hash, U256>,
    events: Vec<ChainEvent>,
    fail_deposits: bool,
}

/// In-memory adjudicator. Clones share the same holdings, so every wallet of
/// a test can be given its own handle.
#[derive(Debug, Clone, Default)]
pub struct FakeChain {
    inner: Rc<RefCell<Adjudicator>>,
}

impl FakeChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events produced since the last call, for the test harness to deliver
    /// to every wallet.
    pub fn take_events(&self) -> Vec<ChainEvent> {
        core::mem::take(&mut self.inner.borrow_mut().events)
    }

    /// Makes every following deposit fail.
    pub fn fail_deposits(&self, fail: bool) {
        self.inner.borrow_mut().fail_deposits = fail;
    }

    pub fn finalize(&self, channel_id: Hash, turn_num_record: u64) {
        self.inner.borrow_mut().events.push(ChainEvent::Finalized {
            channel_id,
            turn_num_record,
        });
    }
}

impl Chain for FakeChain {
    fn get_holdings(&self, channel_id: Hash) -> U256 {
        self.inner
            .borrow()
            .holdings
            .get(&channel_id)
            .copied()
            .unwrap_or_default()
    }

    fn deposit(
        &mut self,
        channel_id: Hash,
        expected_held: U256,
        amount: U256,
    ) -> Result<TxReceipt, ChainError> {
        let mut inner = self.inner.borrow_mut();
        if inner.fail_deposits {
            inner.events.push(ChainEvent::TransactionFailed { channel_id });
            return Err(ChainError::Rejected);
        }

        let held = inner.holdings.get(&channel_id).copied().unwrap_or_default();
        if held < expected_held {
            return Err(ChainError::HoldingsBelowExpected {
                held,
                expected_held,
            });
        }

        // Someone else may have deposited in the meantime, only the part not
        // yet held is credited.
        let credited = (expected_held + amount).saturating_sub(held);
        let new_holdings = held + credited;
        inner.holdings.insert(channel_id, new_holdings);
        tracing::debug!(channel = ?channel_id, %credited, %new_holdings, "deposit");

        if !credited.is_zero() {
            inner.events.push(ChainEvent::Deposited {
                channel_id,
                amount_deposited: credited,
                new_holdings,
            });
        }
        Ok(TxReceipt {
            channel_id,
            new_holdings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deposit_only_credits_missing_part() {
        let mut chain = FakeChain::new();
        let id = Hash([1; 32]);

        chain.deposit(id, U256::zero(), U256::from(5)).unwrap();
        // Expected nothing, 5 already there: only 2 of the 7 are credited.
        let receipt = chain.deposit(id, U256::zero(), U256::from(7)).unwrap();
        assert_eq!(receipt.new_holdings, U256::from(7));
        assert_eq!(chain.get_holdings(id), U256::from(7));
        assert_eq!(chain.take_events().len(), 2);
    }

    #[test]
    fn deposit_rejected_below_expected() {
        let mut chain = FakeChain::new();
        let id = Hash([1; 32]);

        assert_eq!(
            chain.deposit(id, U256::from(3), U256::from(5)),
            Err(ChainError::HoldingsBelowExpected {
                held: U256::zero(),
                expected_held: U256::from(3)
            })
        );
        assert!(chain.take_events().is_empty());
    }

    #[test]
    fn clones_share_holdings() {
        let mut a = FakeChain::new();
        let b = a.clone();
        let id = Hash([2; 32]);

        a.deposit(id, U256::zero(), U256::from(4)).unwrap();
        assert_eq!(b.get_holdings(id), U256::from(4));
    }
}
