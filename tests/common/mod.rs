#![allow(dead_code)]

use nitro::{
    chain::FakeChain,
    channel::{AllocationItem, Funding, Outcome, Participant, StateVariables},
    protocols::Status,
    sig::Signer,
    store::ProcessId,
    wire::{decode, BytesBus, ProtoBufEncodingLayer},
    Config, Hash, Wallet, U256,
};
use rand::{rngs::StdRng, SeedableRng};
use std::{cell::RefCell, collections::BTreeMap, collections::VecDeque, rc::Rc};

pub type TestWallet = Wallet<ProtoBufEncodingLayer<NetBus>, FakeChain>;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

type Queue = Rc<RefCell<VecDeque<(String, Vec<u8>)>>>;

/// Outgoing frames of one wallet, queued until [Network::settle] delivers
/// them.
#[derive(Debug, Clone)]
pub struct NetBus {
    queue: Queue,
}

impl BytesBus for NetBus {
    fn send_to_participant(&self, recipient: &str, msg: &[u8]) {
        self.queue
            .borrow_mut()
            .push_back((recipient.to_string(), msg.to_vec()));
    }
}

/// A set of wallets sharing one chain and one message queue.
pub struct Network {
    pub chain: FakeChain,
    queue: Queue,
    wallets: BTreeMap<String, TestWallet>,
    signers: BTreeMap<String, Signer>,
}

impl Network {
    pub fn new(names: &[&str]) -> Self {
        Self::with_config(names, Config::default())
    }

    pub fn with_config(names: &[&str], config: Config) -> Self {
        init_tracing();
        let mut rng = StdRng::seed_from_u64(0);
        let chain = FakeChain::new();
        let queue = Queue::default();
        let mut wallets = BTreeMap::new();
        let mut signers = BTreeMap::new();
        for name in names {
            let signer = Signer::new(&mut rng);
            let bus = ProtoBufEncodingLayer {
                bus: NetBus {
                    queue: queue.clone(),
                },
            };
            let wallet = Wallet::new(
                name.to_string(),
                signer.clone(),
                bus,
                chain.clone(),
                config.clone(),
            );
            wallets.insert(name.to_string(), wallet);
            signers.insert(name.to_string(), signer);
        }
        Self {
            chain,
            queue,
            wallets,
            signers,
        }
    }

    pub fn wallet(&mut self, name: &str) -> &mut TestWallet {
        self.wallets.get_mut(name).expect("unknown wallet")
    }

    /// The wallet's key, for signing states behind its back.
    pub fn signer(&self, name: &str) -> Signer {
        self.signers[name].clone()
    }

    pub fn me(&self, name: &str) -> Participant {
        self.wallets[name].me()
    }

    pub fn wallet_is_idle(&self, name: &str) -> bool {
        self.wallets[name].is_idle()
    }

    pub fn status(&self, name: &str, process: ProcessId) -> Status {
        self.wallets[name]
            .status(process)
            .cloned()
            .expect("unknown process")
    }

    /// Status of the process the wallet spawned last.
    pub fn last_status(&self, name: &str) -> Status {
        self.wallets[name]
            .processes()
            .last()
            .map(|(_, status)| status.clone())
            .expect("no process")
    }

    /// Allocation of `amounts` to the named wallets, in that order.
    pub fn allocation(&self, amounts: &[(&str, u64)]) -> Outcome {
        Outcome::Allocation(
            amounts
                .iter()
                .map(|(name, amount)| AllocationItem::new(self.me(name).destination, *amount))
                .collect(),
        )
    }

    pub fn supported(&self, name: &str, channel_id: Hash) -> StateVariables {
        self.wallets[name]
            .store()
            .get_entry(channel_id)
            .expect("unknown channel")
            .supported()
            .cloned()
            .expect("no supported state")
    }

    pub fn funding(&self, name: &str, channel_id: Hash) -> Option<Funding> {
        self.wallets[name]
            .store()
            .get_entry(channel_id)
            .expect("unknown channel")
            .funding()
    }

    /// Amount the supported state of `channel_id` allocates to `destination`.
    pub fn allocated(
        &self,
        name: &str,
        channel_id: Hash,
        destination: impl Into<nitro::Destination>,
    ) -> U256 {
        let supported = self.supported(name, channel_id);
        let items = supported.outcome.allocation().expect("not an allocation");
        nitro::channel::amount_of(items, &destination.into()).unwrap_or_default()
    }

    /// Delivers the oldest queued message, returns false if there was none.
    pub fn deliver_one(&mut self) -> bool {
        let next = self.queue.borrow_mut().pop_front();
        match next {
            Some((recipient, frame)) => {
                let msg = decode(&frame).expect("undecodable frame");
                self.wallet(&recipient)
                    .push_message(msg)
                    .expect("message rejected");
                true
            }
            None => false,
        }
    }

    /// Delivers messages and chain events until nothing is in flight.
    pub fn settle(&mut self) {
        loop {
            if self.deliver_one() {
                continue;
            }

            let events = self.chain.take_events();
            if events.is_empty() {
                break;
            }
            for event in events {
                for wallet in self.wallets.values_mut() {
                    wallet.on_chain_event(event.clone());
                }
            }
        }
    }

    /// Creates a channel proposed by `proposer` and joined by everybody else.
    pub fn open_channel(&mut self, names: &[&str], amounts: &[(&str, u64)]) -> Hash {
        let participants = names.iter().map(|n| self.me(n)).collect();
        let outcome = self.allocation(amounts);
        let id = self
            .wallet(names[0])
            .create_channel(participants, outcome)
            .expect("cannot create channel");
        self.settle();
        for name in &names[1..] {
            self.wallet(name).join_channel(id).expect("cannot join");
        }
        self.settle();
        id
    }

    /// Creates and funds the ledger between `a` and `b` on chain.
    pub fn open_ledger(&mut self, a: &str, b: &str, amounts: &[(&str, u64)]) -> Hash {
        let peer = self.me(b);
        let outcome = self.allocation(amounts);
        let id = self
            .wallet(a)
            .create_ledger_channel(peer, outcome)
            .expect("cannot create ledger");
        self.settle();
        assert_eq!(self.funding(a, id), Some(Funding::Direct));
        assert_eq!(self.funding(b, id), Some(Funding::Direct));
        id
    }

    /// Signs the final state on every participant's side.
    pub fn close(&mut self, names: &[&str], channel_id: Hash) {
        for name in names {
            self.wallet(name)
                .close_channel(channel_id)
                .expect("cannot close");
            self.settle();
        }
    }
}
