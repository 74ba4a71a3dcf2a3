//! Wallets running as separate tasks, exchanging framed messages over
//! channels while funding several channels from one ledger at once.

use nitro::{
    chain::{ChainEvent, FakeChain},
    channel::{amount_of, AllocationItem, Outcome},
    protocols::Status,
    sig::Signer,
    store::ProcessId,
    wire::{decode, BytesBus, ProtoBufEncodingLayer},
    Config, FundingStrategy, Hash, Wallet, U256,
};
use rand::{rngs::StdRng, SeedableRng};
use std::{cell::Cell, cell::RefCell, collections::BTreeMap, rc::Rc};
use tokio::{
    sync::{mpsc, oneshot},
    task::{self, JoinHandle, LocalSet},
};

type TestWallet = Wallet<ProtoBufEncodingLayer<Router>, FakeChain>;
type Call = Box<dyn FnOnce(&mut TestWallet)>;

enum Input {
    Frame(Vec<u8>),
    Chain(ChainEvent),
    Call(Call),
    Stop,
}

/// Routes inputs to the wallet tasks and counts the ones not yet handled.
#[derive(Debug, Clone, Default)]
struct Router {
    inboxes: Rc<RefCell<BTreeMap<String, mpsc::UnboundedSender<Input>>>>,
    in_flight: Rc<Cell<usize>>,
}

impl Router {
    fn send(&self, to: &str, input: Input) {
        if let Some(tx) = self.inboxes.borrow().get(to) {
            self.in_flight.set(self.in_flight.get() + 1);
            if tx.send(input).is_err() {
                self.handled();
            }
        }
    }

    fn broadcast(&self, event: &ChainEvent) {
        let names: Vec<String> = self.inboxes.borrow().keys().cloned().collect();
        for name in names {
            self.send(&name, Input::Chain(event.clone()));
        }
    }

    fn handled(&self) {
        self.in_flight.set(self.in_flight.get() - 1);
    }

    /// Yields until every input sent so far has been handled.
    async fn settle(&self) {
        while self.in_flight.get() > 0 {
            task::yield_now().await;
        }
    }

    async fn call<T: 'static>(
        &self,
        to: &str,
        f: impl FnOnce(&mut TestWallet) -> T + 'static,
    ) -> T {
        let (tx, rx) = oneshot::channel();
        self.send(
            to,
            Input::Call(Box::new(move |wallet| {
                let _ = tx.send(f(wallet));
            })),
        );
        rx.await.expect("wallet task stopped")
    }
}

impl BytesBus for Router {
    fn send_to_participant(&self, recipient: &str, msg: &[u8]) {
        self.send(recipient, Input::Frame(msg.to_vec()));
    }
}

async fn serve(
    mut wallet: TestWallet,
    mut inbox: mpsc::UnboundedReceiver<Input>,
    router: Router,
    chain: FakeChain,
) -> TestWallet {
    while let Some(input) = inbox.recv().await {
        let stop = match input {
            Input::Frame(frame) => {
                let msg = decode(&frame).expect("undecodable frame");
                wallet.push_message(msg).expect("message rejected");
                false
            }
            Input::Chain(event) => {
                wallet.on_chain_event(event);
                false
            }
            Input::Call(f) => {
                f(&mut wallet);
                false
            }
            Input::Stop => true,
        };
        for event in chain.take_events() {
            router.broadcast(&event);
        }
        router.handled();
        if stop {
            break;
        }
        task::yield_now().await;
    }
    wallet
}

fn spawn_wallets(names: &[&str], router: &Router) -> BTreeMap<String, JoinHandle<TestWallet>> {
    let mut rng = StdRng::seed_from_u64(7);
    let chain = FakeChain::new();
    names
        .iter()
        .map(|name| {
            let (tx, rx) = mpsc::unbounded_channel();
            router.inboxes.borrow_mut().insert(name.to_string(), tx);
            let wallet = Wallet::new(
                name.to_string(),
                Signer::new(&mut rng),
                ProtoBufEncodingLayer {
                    bus: router.clone(),
                },
                chain.clone(),
                Config::default(),
            );
            let handle = task::spawn_local(serve(wallet, rx, router.clone(), chain.clone()));
            (name.to_string(), handle)
        })
        .collect()
}

async fn stop(
    router: &Router,
    handles: BTreeMap<String, JoinHandle<TestWallet>>,
) -> BTreeMap<String, TestWallet> {
    let mut wallets = BTreeMap::new();
    for (name, handle) in handles {
        router.send(&name, Input::Stop);
        wallets.insert(name, handle.await.expect("wallet task panicked"));
    }
    wallets
}

fn allocated(
    wallet: &TestWallet,
    ledger: Hash,
    destination: impl Into<nitro::Destination>,
) -> U256 {
    let supported = wallet
        .store()
        .get_entry(ledger)
        .unwrap()
        .supported()
        .cloned()
        .unwrap();
    amount_of(supported.outcome.allocation().unwrap(), &destination.into()).unwrap_or_default()
}

#[tokio::test]
async fn many_channels_funded_from_one_ledger() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let router = Router::default();
            let handles = spawn_wallets(&["a", "b"], &router);

            let a = router.call("a", |w| w.me()).await;
            let b = router.call("b", |w| w.me()).await;
            let split = |x: u64, y: u64| {
                Outcome::Allocation(vec![
                    AllocationItem::new(a.destination, x),
                    AllocationItem::new(b.destination, y),
                ])
            };

            let peer = b.clone();
            let ledger_outcome = split(100, 100);
            let ledger = router
                .call("a", move |w| w.create_ledger_channel(peer, ledger_outcome).unwrap())
                .await;
            router.settle().await;

            let mut targets = Vec::new();
            for i in 1..=5u64 {
                let participants = vec![a.clone(), b.clone()];
                let outcome = split(i, 2 * i);
                let id = router
                    .call("a", move |w| w.create_channel(participants, outcome).unwrap())
                    .await;
                router.settle().await;
                router.call("b", move |w| w.join_channel(id).unwrap()).await;
                targets.push(id);
            }
            router.settle().await;

            // Every funding is requested before any of them completes.
            let mut processes: Vec<(&str, ProcessId)> = Vec::new();
            for &id in &targets {
                for name in ["a", "b"] {
                    let process = router
                        .call(name, move |w| w.fund(id, FundingStrategy::Ledger).unwrap())
                        .await;
                    processes.push((name, process));
                }
            }
            router.settle().await;

            let wallets = stop(&router, handles).await;
            for (name, process) in processes {
                assert_eq!(
                    wallets[name].status(process),
                    Some(&Status::Success),
                    "{} {:?}",
                    name,
                    process
                );
            }

            let (wa, wb) = (&wallets["a"], &wallets["b"]);
            let supported = wa.store().get_entry(ledger).unwrap().supported().cloned();
            assert_eq!(supported.as_ref().map(|s| s.turn_num), Some(5));
            assert_eq!(
                supported.as_ref(),
                wb.store().get_entry(ledger).unwrap().supported()
            );
            for (i, id) in targets.iter().enumerate() {
                let i = i as u64 + 1;
                assert_eq!(allocated(wa, ledger, *id), U256::from(3 * i));
            }
            // 1 + .. + 5 and twice that
            assert_eq!(allocated(wa, ledger, a.destination), U256::from(85));
            assert_eq!(allocated(wa, ledger, b.destination), U256::from(70));
        })
        .await;
}
