//! Asset outcomes and the reallocations performed on ledger channels.

use crate::canonical::types::{Destination, Hash, U256};
use alloc::vec::Vec;
use core::fmt::Display;
use serde::Serialize;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationItem {
    pub destination: Destination,
    pub amount: U256,
}

impl AllocationItem {
    pub fn new(destination: impl Into<Destination>, amount: impl Into<U256>) -> Self {
        Self {
            destination: destination.into(),
            amount: amount.into(),
        }
    }
}

/// Funds of the guaranteeing channel are paid out to the allocation of
/// `target_channel_id`, prioritising `destinations` in order.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Guarantee {
    pub target_channel_id: Hash,
    pub destinations: Vec<Destination>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Allocation(Vec<AllocationItem>),
    Guarantee(Guarantee),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeError {
    InsufficientFunds { destination: Destination },
    DestinationMissing(Destination),
    NotAnAllocation,
    /// Payouts do not add up to the amount they replace.
    AmountMismatch,
}

impl Display for OutcomeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            OutcomeError::InsufficientFunds { destination } => {
                write!(f, "insufficient funds for {:?}", destination)
            }
            OutcomeError::DestinationMissing(d) => write!(f, "destination {:?} missing", d),
            OutcomeError::NotAnAllocation => f.write_str("outcome is not an allocation"),
            OutcomeError::AmountMismatch => {
                f.write_str("payouts do not match the allocated amount")
            }
        }
    }
}

impl Outcome {
    pub fn allocation(&self) -> Result<&[AllocationItem], OutcomeError> {
        match self {
            Outcome::Allocation(items) => Ok(items),
            Outcome::Guarantee(_) => Err(OutcomeError::NotAnAllocation),
        }
    }

    pub fn total(&self) -> Result<U256, OutcomeError> {
        Ok(total(self.allocation()?))
    }
}

pub fn total(items: &[AllocationItem]) -> U256 {
    items
        .iter()
        .fold(U256::zero(), |acc, item| acc.saturating_add(item.amount))
}

/// Sum of all amounts allocated before the first item paying `destination`.
pub fn amount_before(items: &[AllocationItem], destination: &Destination) -> Option<U256> {
    let index = items.iter().position(|i| &i.destination == destination)?;
    Some(total(&items[..index]))
}

pub fn amount_of(items: &[AllocationItem], destination: &Destination) -> Option<U256> {
    items
        .iter()
        .find(|i| &i.destination == destination)
        .map(|i| i.amount)
}

/// Carves `deductions` out of `ledger` and allocates their sum to `target`.
///
/// Items that reach zero are dropped, the target item is appended last.
pub fn allocate_to_target(
    deductions: &[AllocationItem],
    ledger: &[AllocationItem],
    target: Destination,
) -> Result<Vec<AllocationItem>, OutcomeError> {
    let mut items = ledger.to_vec();
    let mut total = U256::zero();

    for deduction in deductions {
        let item = items
            .iter_mut()
            .find(|i| i.destination == deduction.destination)
            .ok_or(OutcomeError::DestinationMissing(deduction.destination))?;
        item.amount = item.amount.checked_sub(deduction.amount).ok_or(
            OutcomeError::InsufficientFunds {
                destination: deduction.destination,
            },
        )?;
        total = total.saturating_add(deduction.amount);
    }

    items.retain(|i| !i.amount.is_zero());
    items.push(AllocationItem {
        destination: target,
        amount: total,
    });
    Ok(items)
}

/// Adds `amount` to the item paying `destination`, appending a new item if
/// there is none.
pub fn credit(items: &mut Vec<AllocationItem>, destination: Destination, amount: U256) {
    if amount.is_zero() {
        return;
    }
    match items.iter_mut().find(|i| i.destination == destination) {
        Some(item) => item.amount = item.amount.saturating_add(amount),
        None => items.push(AllocationItem {
            destination,
            amount,
        }),
    }
}

/// Removes the item paying `target` from `ledger` and hands its amount back
/// according to `payouts`, which must add up to exactly that amount.
pub fn return_to_ledger(
    ledger: &[AllocationItem],
    target: Destination,
    payouts: &[AllocationItem],
) -> Result<Vec<AllocationItem>, OutcomeError> {
    let index = ledger
        .iter()
        .position(|i| i.destination == target)
        .ok_or(OutcomeError::DestinationMissing(target))?;

    if total(payouts) != ledger[index].amount {
        return Err(OutcomeError::AmountMismatch);
    }

    let mut items = ledger.to_vec();
    items.remove(index);
    for payout in payouts {
        credit(&mut items, payout.destination, payout.amount);
    }
    Ok(items)
}
