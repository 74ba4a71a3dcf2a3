//! Funding and defunding protocols.
//!
//! Every protocol is a state machine that is handed the store, the bus and
//! the chain for the duration of one [Event] and reports its [Status]. A
//! machine never blocks: waiting for a peer's signature, a deposit or a
//! ledger lock simply means returning [Status::InProgress] until an event
//! arrives that lets it continue.

mod defunding;
mod direct_funding;
mod ledger_funding;
mod reallocation;
mod support_state;
#[cfg(test)]
mod testing;
mod virtual_funding;

pub use defunding::{LedgerDefunding, VirtualDefundingAsHub, VirtualDefundingAsLeaf};
pub use direct_funding::DirectFunding;
pub use ledger_funding::LedgerFunding;
pub use reallocation::{Change, Reallocation};
pub use support_state::SupportState;
pub use virtual_funding::{VirtualFundingAsHub, VirtualFundingAsLeaf};

use crate::{
    canonical::types::Hash,
    chain::{Chain, ChainEvent},
    channel::{ChannelStoreEntry, OutcomeError, Participant, SignedState},
    config::Config,
    messages::Message,
    store::{LockToken, Objective, ProcessId, Store, StoreError},
    wire::MessageBus,
};
use alloc::vec::Vec;
use core::fmt::Display;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Delivered once, right after the process was spawned.
    Start,
    ChannelUpdated(Hash),
    ObjectiveAdded(Objective),
    /// The ledger lock this process was queued for has been granted.
    LockGranted(LockToken),
    Chain(ChainEvent),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    NotAParticipant,
    InvalidSignature,
    ChannelNotFound,
    InvalidParticipants,
    InsufficientFunds,
    DestinationMissing,
    ChannelNotClosed,
    StaleLock,
    TransactionFailure,
    UserRejected,
    /// The joint channel proposed by the hub does not match the target.
    InvalidFirstState,
    LedgerNotFound,
    NotFunded,
    InvalidOutcome,
    /// The channel was finalized on chain, its funds are paid out there.
    FinalizedOnChain,
    /// Encoding, signing or persistence failed.
    Internal,
}

impl From<StoreError> for FailureReason {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotAParticipant(_) => Self::NotAParticipant,
            StoreError::InvalidSignature(_) => Self::InvalidSignature,
            StoreError::ChannelNotFound(_) => Self::ChannelNotFound,
            StoreError::InvalidParticipants => Self::InvalidParticipants,
            StoreError::StaleLock => Self::StaleLock,
            StoreError::LedgerNotFound(_) => Self::LedgerNotFound,
            StoreError::NoncesExhausted
            | StoreError::Encoding(_)
            | StoreError::Signing(_)
            | StoreError::Backend(_) => Self::Internal,
        }
    }
}

impl From<OutcomeError> for FailureReason {
    fn from(e: OutcomeError) -> Self {
        match e {
            OutcomeError::InsufficientFunds { .. } => Self::InsufficientFunds,
            OutcomeError::DestinationMissing(_) => Self::DestinationMissing,
            OutcomeError::NotAnAllocation | OutcomeError::AmountMismatch => Self::InvalidOutcome,
        }
    }
}

impl Display for FailureReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    InProgress,
    Success,
    Failure(FailureReason),
}

impl Status {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Status::InProgress)
    }
}

/// Everything a protocol may touch while handling one event.
pub struct Context<'a, B: MessageBus, C: Chain> {
    pub store: &'a mut Store,
    pub bus: &'a B,
    pub chain: &'a mut C,
    pub config: &'a Config,
    pub process: ProcessId,
}

impl<'a, B: MessageBus, C: Chain> Context<'a, B, C> {
    pub fn entry(&self, channel_id: Hash) -> Result<&ChannelStoreEntry, FailureReason> {
        Ok(self.store.get_entry(channel_id)?)
    }

    /// Sends `states` to every participant of `channel_id` but us.
    pub fn send_states(
        &self,
        channel_id: Hash,
        states: Vec<SignedState>,
    ) -> Result<(), FailureReason> {
        let entry = self.entry(channel_id)?;
        let me = entry.my_index();
        for (i, p) in entry.participants().iter().enumerate() {
            if i != me {
                self.send(&p.participant_id, Message::from_states(states.clone()));
            }
        }
        Ok(())
    }

    pub fn send(&self, recipient: &str, msg: Message) {
        tracing::debug!(
            recipient,
            states = msg.signed_states.len(),
            objectives = msg.objectives.len(),
            "sending message"
        );
        self.bus.send_to_participant(recipient, msg);
    }

    pub fn is_me(&self, participant: &Participant) -> bool {
        participant.signing_address == self.store.address()
    }
}

/// Shared shape of all protocols.
pub trait Machine {
    /// Advances the machine. `Ok(Status::Success)` and every `Err` are
    /// terminal, the caller must not deliver further events afterwards.
    fn advance<B: MessageBus, C: Chain>(
        &mut self,
        ctx: &mut Context<'_, B, C>,
        event: &Event,
    ) -> Result<Status, FailureReason>;
}

/// A machine driven by another machine, remembering its result so it is not
/// advanced after finishing.
#[derive(Debug, Clone)]
pub(crate) struct Child<M> {
    machine: M,
    status: Status,
}

impl<M: Machine> Child<M> {
    pub(crate) fn new(machine: M) -> Self {
        Self {
            machine,
            status: Status::InProgress,
        }
    }

    /// Advances the child unless it already finished. A failed child fails
    /// the parent with the same reason.
    pub(crate) fn run<B: MessageBus, C: Chain>(
        &mut self,
        ctx: &mut Context<'_, B, C>,
        event: &Event,
    ) -> Result<bool, FailureReason> {
        if !self.status.is_terminal() {
            self.status = match self.machine.advance(ctx, event) {
                Ok(s) => s,
                Err(reason) => Status::Failure(reason),
            };
        }
        match &self.status {
            Status::Failure(reason) => Err(reason.clone()),
            Status::Success => Ok(true),
            Status::InProgress => Ok(false),
        }
    }
}

/// All protocols a process can run, chosen once when the process is
/// spawned.
#[derive(Debug)]
pub enum Protocol {
    DirectFunding(DirectFunding),
    LedgerFunding(LedgerFunding),
    VirtualFundingAsLeaf(VirtualFundingAsLeaf),
    VirtualFundingAsHub(VirtualFundingAsHub),
    LedgerDefunding(LedgerDefunding),
    VirtualDefundingAsLeaf(VirtualDefundingAsLeaf),
    VirtualDefundingAsHub(VirtualDefundingAsHub),
}

impl Protocol {
    pub fn name(&self) -> &'static str {
        match self {
            Protocol::DirectFunding(_) => "direct-funding",
            Protocol::LedgerFunding(_) => "ledger-funding",
            Protocol::VirtualFundingAsLeaf(_) => "virtual-funding-leaf",
            Protocol::VirtualFundingAsHub(_) => "virtual-funding-hub",
            Protocol::LedgerDefunding(_) => "ledger-defunding",
            Protocol::VirtualDefundingAsLeaf(_) => "virtual-defunding-leaf",
            Protocol::VirtualDefundingAsHub(_) => "virtual-defunding-hub",
        }
    }

    /// Channel the protocol was started for.
    pub fn channel_id(&self) -> Hash {
        match self {
            Protocol::DirectFunding(m) => m.channel_id(),
            Protocol::LedgerFunding(m) => m.target(),
            Protocol::VirtualFundingAsLeaf(m) => m.target(),
            Protocol::VirtualFundingAsHub(m) => m.target(),
            Protocol::LedgerDefunding(m) => m.target(),
            Protocol::VirtualDefundingAsLeaf(m) => m.target(),
            Protocol::VirtualDefundingAsHub(m) => m.target(),
        }
    }

    /// Delivers one event and maps errors into [Status::Failure].
    pub fn on_event<B: MessageBus, C: Chain>(
        &mut self,
        ctx: &mut Context<'_, B, C>,
        event: &Event,
    ) -> Status {
        let result = match self {
            Protocol::DirectFunding(m) => m.advance(ctx, event),
            Protocol::LedgerFunding(m) => m.advance(ctx, event),
            Protocol::VirtualFundingAsLeaf(m) => m.advance(ctx, event),
            Protocol::VirtualFundingAsHub(m) => m.advance(ctx, event),
            Protocol::LedgerDefunding(m) => m.advance(ctx, event),
            Protocol::VirtualDefundingAsLeaf(m) => m.advance(ctx, event),
            Protocol::VirtualDefundingAsHub(m) => m.advance(ctx, event),
        };
        result.unwrap_or_else(Status::Failure)
    }
}
