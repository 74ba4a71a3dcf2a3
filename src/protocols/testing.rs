//! Two stores sharing a fake chain, for driving single machines by hand.

use super::{Context, Event, FailureReason, Machine, Protocol, Status};
use crate::{
    canonical::types::{Destination, Hash, U256},
    chain::FakeChain,
    channel::{AllocationItem, ChannelConstants, Outcome, Participant, StateVariables},
    config::Config,
    messages::Message,
    sig::Signer,
    store::{ProcessId, Store},
    wire::MessageBus,
};
use alloc::{string::String, string::ToString, vec, vec::Vec};
use core::cell::RefCell;
use rand::{rngs::StdRng, SeedableRng};

#[derive(Debug, Default)]
pub struct Outbox(RefCell<Vec<(String, Message)>>);

impl Outbox {
    pub fn take(&self) -> Vec<(String, Message)> {
        core::mem::take(&mut *self.0.borrow_mut())
    }
}

impl MessageBus for Outbox {
    fn send_to_participant(&self, recipient: &str, msg: Message) {
        self.0.borrow_mut().push((recipient.to_string(), msg));
    }
}

pub struct Party {
    pub store: Store,
    pub bus: Outbox,
    pub chain: FakeChain,
}

impl Party {
    pub fn step(&mut self, machine: &mut Protocol, event: &Event) -> Status {
        let config = Config::default();
        let mut ctx = self.context(&config);
        machine.on_event(&mut ctx, event)
    }

    pub fn advance<M: Machine>(
        &mut self,
        machine: &mut M,
        event: &Event,
    ) -> Result<Status, FailureReason> {
        let config = Config::default();
        let mut ctx = self.context(&config);
        machine.advance(&mut ctx, event)
    }

    /// Merges every state `other` sent since the last call.
    pub fn receive_from(&mut self, other: &Party) {
        for (_, msg) in other.bus.take() {
            self.store.receive_states(msg.signed_states).unwrap();
        }
    }

    fn context<'a>(&'a mut self, config: &'a Config) -> Context<'a, Outbox, FakeChain> {
        Context {
            store: &mut self.store,
            bus: &self.bus,
            chain: &mut self.chain,
            config,
            process: ProcessId(0),
        }
    }
}

/// A channel between two parties whose first state, allocating `amounts`,
/// is signed by both.
pub fn setup<T: Into<U256>>(amounts: [T; 2]) -> (Party, Party, Hash) {
    let mut rng = StdRng::seed_from_u64(0);
    let signers = [Signer::new(&mut rng), Signer::new(&mut rng)];
    let participants: Vec<Participant> = signers
        .iter()
        .enumerate()
        .map(|(i, s)| Participant {
            participant_id: i.to_string(),
            signing_address: s.address(),
            destination: Destination::from(s.address()),
        })
        .collect();
    let outcome = Outcome::Allocation(
        participants
            .iter()
            .zip(amounts)
            .map(|(p, a)| AllocationItem::new(p.destination, a))
            .collect(),
    );
    let constants = ChannelConstants {
        chain_id: U256::one(),
        participants,
        app_definition: Default::default(),
        challenge_duration: 10,
        channel_nonce: U256::zero(),
    };

    let chain = FakeChain::new();
    let mut a = Party {
        store: Store::new(signers[0].clone()),
        bus: Outbox::default(),
        chain: chain.clone(),
    };
    let mut b = Party {
        store: Store::new(signers[1].clone()),
        bus: Outbox::default(),
        chain,
    };

    let (id, signed) = a
        .store
        .create_channel(constants, StateVariables::new(0, outcome))
        .unwrap();
    b.store.receive_states(vec![signed.clone()]).unwrap();
    let countersigned = b.store.sign_and_add(id, signed.state.variables).unwrap();
    a.store.receive_states(vec![countersigned]).unwrap();
    (a, b, id)
}
