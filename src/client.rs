use crate::{
    canonical::types::Hash,
    chain::{Chain, ChainEvent},
    channel::{valid_transition, Funding, Outcome, Participant, SignedState, StateVariables},
    config::Config,
    messages::Message,
    protocols::{
        Context, DirectFunding, Event, LedgerDefunding, LedgerFunding, Protocol, Status,
        VirtualDefundingAsHub, VirtualDefundingAsLeaf, VirtualFundingAsHub, VirtualFundingAsLeaf,
    },
    sig::Signer,
    store::{Objective, ObjectiveKind, ProcessId, Store, StoreError, StoreEvent},
    wire::MessageBus,
};
use alloc::{collections::BTreeMap, string::String, vec, vec::Vec};
use core::fmt::Display;

/// How [Wallet::fund] funds a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FundingStrategy {
    /// Every participant deposits its share on chain.
    Direct,
    /// Carve the channel out of the ledger channel with the other
    /// participant, creating that ledger if needed.
    Ledger,
    /// Through a hub. `None` uses the hub from the [Config].
    Virtual { hub: Option<Participant> },
}

#[derive(Debug)]
pub enum WalletError {
    Store(StoreError),
    /// There is no supported state to build on.
    NotSupported(Hash),
    /// There is no state at the requested turn.
    NoState(Hash),
    NotMyTurn(Hash),
    NotFunded(Hash),
    /// Directly funded channels are defunded on chain.
    OnChainOnly(Hash),
    NoHub,
}

impl From<StoreError> for WalletError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl Display for WalletError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            WalletError::Store(e) => write!(f, "{}", e),
            WalletError::NotSupported(id) => write!(f, "channel {:?} has no supported state", id),
            WalletError::NoState(id) => write!(f, "no state to sign in channel {:?}", id),
            WalletError::NotMyTurn(id) => write!(f, "not our turn in channel {:?}", id),
            WalletError::NotFunded(id) => write!(f, "channel {:?} is not funded", id),
            WalletError::OnChainOnly(id) => write!(f, "channel {:?} is defunded on chain", id),
            WalletError::NoHub => f.write_str("no hub configured"),
        }
    }
}

#[derive(Debug)]
struct Process {
    protocol: Protocol,
    status: Status,
}

/// One participant's wallet: owns its [Store] and runs the funding and
/// defunding protocols of its channels.
///
/// All methods run to completion: every store event caused by a call,
/// including the ones caused by protocols reacting to earlier events, is
/// processed before the call returns. Messages for peers go out through the
/// [MessageBus], chain events have to be fed back with
/// [Wallet::on_chain_event].
#[derive(Debug)]
pub struct Wallet<B: MessageBus, C: Chain> {
    participant_id: String,
    store: Store,
    bus: B,
    chain: C,
    config: Config,
    processes: BTreeMap<ProcessId, Process>,
    next_process: u64,
}

impl<B: MessageBus, C: Chain> Wallet<B, C> {
    pub fn new(participant_id: String, signer: Signer, bus: B, chain: C, config: Config) -> Self {
        Self::with_store(participant_id, Store::new(signer), bus, chain, config)
    }

    /// Creates a wallet around an existing (e.g. restored) store.
    pub fn with_store(
        participant_id: String,
        store: Store,
        bus: B,
        chain: C,
        config: Config,
    ) -> Self {
        Self {
            participant_id,
            store,
            bus,
            chain,
            config,
            processes: BTreeMap::new(),
            next_process: 0,
        }
    }

    /// This wallet as a channel participant, paying out to its signing
    /// address.
    pub fn me(&self) -> Participant {
        Participant {
            participant_id: self.participant_id.clone(),
            signing_address: self.store.address(),
            destination: self.store.address().into(),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn status(&self, process: ProcessId) -> Option<&Status> {
        self.processes.get(&process).map(|p| &p.status)
    }

    /// Every process spawned so far with its status, oldest first.
    pub fn processes(&self) -> impl Iterator<Item = (ProcessId, &Status)> + '_ {
        self.processes.iter().map(|(id, p)| (*id, &p.status))
    }

    /// Whether no protocol is running any more.
    pub fn is_idle(&self) -> bool {
        self.processes.values().all(|p| p.status.is_terminal())
    }

    /// Creates a channel with the first state allocating `outcome` and sends
    /// it to the other participants.
    pub fn create_channel(
        &mut self,
        participants: Vec<Participant>,
        outcome: Outcome,
    ) -> Result<Hash, WalletError> {
        let constants = self.config.constants(participants);
        let (channel_id, signed) = self
            .store
            .create_channel(constants, StateVariables::new(0, outcome))?;
        self.broadcast(channel_id, signed)?;
        self.run();
        Ok(channel_id)
    }

    /// Signs the first state of a channel proposed by someone else.
    pub fn join_channel(&mut self, channel_id: Hash) -> Result<(), WalletError> {
        let first = self
            .store
            .get_entry(channel_id)?
            .states_at(0)
            .into_iter()
            .next()
            .ok_or(WalletError::NoState(channel_id))?;
        self.sign(channel_id, first.state.variables)
    }

    /// Proposes the next state with a new outcome and application data.
    pub fn update_channel(
        &mut self,
        channel_id: Hash,
        outcome: Outcome,
        app_data: Vec<u8>,
    ) -> Result<(), WalletError> {
        let entry = self.store.get_entry(channel_id)?;
        let mut next = entry
            .supported()
            .ok_or(WalletError::NotSupported(channel_id))?
            .next();
        if entry.constants().mover_index(next.turn_num) != entry.my_index() {
            return Err(WalletError::NotMyTurn(channel_id));
        }
        next.outcome = outcome;
        next.app_data = app_data;
        self.sign(channel_id, next)
    }

    /// Countersigns the latest state if it validly follows the supported one.
    pub fn accept_update(&mut self, channel_id: Hash) -> Result<(), WalletError> {
        let entry = self.store.get_entry(channel_id)?;
        let supported = entry
            .supported()
            .ok_or(WalletError::NotSupported(channel_id))?;
        let latest = entry.latest().ok_or(WalletError::NoState(channel_id))?;
        let n = entry.participants().len();
        if latest == supported {
            return Ok(());
        }
        if latest.turn_num != supported.turn_num + 1
            || (latest.is_final && !valid_transition(supported, latest, n))
        {
            return Err(WalletError::NoState(channel_id));
        }
        let latest = latest.clone();
        self.sign(channel_id, latest)
    }

    /// Signs the final state. Both participants calling this arrive at the
    /// same state, which is supported once everybody signed it.
    pub fn close_channel(&mut self, channel_id: Hash) -> Result<(), WalletError> {
        let supported = self
            .store
            .get_entry(channel_id)?
            .supported()
            .ok_or(WalletError::NotSupported(channel_id))?;
        if supported.is_final {
            return Ok(());
        }
        let mut last = supported.next();
        last.is_final = true;
        tracing::info!(channel = ?channel_id, turn = last.turn_num, "closing channel");
        self.sign(channel_id, last)
    }

    /// Creates the ledger channel with `peer` and funds it on chain. The peer
    /// joins and deposits automatically when it receives the objective.
    pub fn create_ledger_channel(
        &mut self,
        peer: Participant,
        outcome: Outcome,
    ) -> Result<Hash, WalletError> {
        let participants = vec![self.me(), peer.clone()];
        let constants = self.config.constants(participants.clone());
        let (ledger, signed) = self
            .store
            .create_channel(constants, StateVariables::new(0, outcome))?;
        self.store.set_ledger(&peer.participant_id, ledger)?;

        let objective = Objective::new(
            participants,
            ObjectiveKind::FundLedger {
                ledger_channel_id: ledger,
            },
        );
        self.store.add_objective(objective.clone())?;
        self.bus.send_to_participant(
            &peer.participant_id,
            Message {
                signed_states: vec![signed],
                objectives: vec![objective],
            },
        );
        self.run();
        Ok(ledger)
    }

    /// Starts funding `channel_id` and returns the process doing it.
    pub fn fund(
        &mut self,
        channel_id: Hash,
        strategy: FundingStrategy,
    ) -> Result<ProcessId, WalletError> {
        self.store.get_entry(channel_id)?;
        let protocol = match strategy {
            FundingStrategy::Direct => Protocol::DirectFunding(DirectFunding::new(channel_id)),
            FundingStrategy::Ledger => Protocol::LedgerFunding(LedgerFunding::new(channel_id)),
            FundingStrategy::Virtual { hub } => {
                let hub = hub.or_else(|| self.config.hub.clone()).ok_or(WalletError::NoHub)?;
                Protocol::VirtualFundingAsLeaf(VirtualFundingAsLeaf::new(channel_id, hub))
            }
        };
        let process = self.spawn(protocol);
        self.run();
        Ok(process)
    }

    /// Starts returning the funds of a closed channel to where they came from.
    pub fn defund(&mut self, channel_id: Hash) -> Result<ProcessId, WalletError> {
        let entry = self.store.get_entry(channel_id)?;
        if entry.finalized_on_chain().is_some() {
            return Err(WalletError::OnChainOnly(channel_id));
        }
        let protocol = match entry.funding() {
            Some(Funding::Indirect { .. }) => {
                Protocol::LedgerDefunding(LedgerDefunding::new(channel_id))
            }
            Some(Funding::Virtual { .. }) => {
                Protocol::VirtualDefundingAsLeaf(VirtualDefundingAsLeaf::new(channel_id))
            }
            Some(Funding::Direct) | Some(Funding::Guarantee { .. }) => {
                return Err(WalletError::OnChainOnly(channel_id))
            }
            None => return Err(WalletError::NotFunded(channel_id)),
        };
        let process = self.spawn(protocol);
        self.run();
        Ok(process)
    }

    /// Merges a message from a peer. Objectives we are not part of are
    /// ignored.
    pub fn push_message(&mut self, msg: Message) -> Result<(), WalletError> {
        let me = self.store.address();
        let result = self.store.receive_states(msg.signed_states);
        if result.is_ok() {
            for objective in msg.objectives {
                if objective.participants.iter().any(|p| p.signing_address == me) {
                    self.store.add_objective(objective)?;
                }
            }
        }
        self.run();
        result.map_err(WalletError::from)
    }

    pub fn on_chain_event(&mut self, event: ChainEvent) {
        tracing::debug!(channel = ?event.channel_id(), "chain event");
        if let ChainEvent::Finalized {
            channel_id,
            turn_num_record,
        } = event
        {
            match self.store.set_finalized_on_chain(channel_id, turn_num_record) {
                Ok(()) | Err(StoreError::ChannelNotFound(_)) => {}
                Err(e) => {
                    tracing::warn!(channel = ?channel_id, error = %e, "cannot record finalization")
                }
            }
        }
        self.deliver_to_all(Event::Chain(event));
        self.run();
    }

    fn sign(&mut self, channel_id: Hash, variables: StateVariables) -> Result<(), WalletError> {
        let signed = self.store.sign_and_add(channel_id, variables)?;
        self.broadcast(channel_id, signed)?;
        self.run();
        Ok(())
    }

    fn broadcast(&self, channel_id: Hash, signed: SignedState) -> Result<(), WalletError> {
        let entry = self.store.get_entry(channel_id)?;
        for (i, p) in entry.participants().iter().enumerate() {
            if i != entry.my_index() {
                self.bus.send_to_participant(
                    &p.participant_id,
                    Message::from_states(vec![signed.clone()]),
                );
            }
        }
        Ok(())
    }

    fn spawn(&mut self, protocol: Protocol) -> ProcessId {
        let process = ProcessId(self.next_process);
        self.next_process += 1;
        tracing::info!(
            ?process,
            protocol = protocol.name(),
            channel = ?protocol.channel_id(),
            "starting protocol"
        );
        self.processes.insert(
            process,
            Process {
                protocol,
                status: Status::InProgress,
            },
        );
        self.deliver(process, &Event::Start);
        process
    }

    /// Drains the store's events until nothing is left to react to.
    fn run(&mut self) {
        while let Some(event) = self.store.pop_event() {
            match event {
                StoreEvent::ChannelUpdated(channel_id) => {
                    self.deliver_to_all(Event::ChannelUpdated(channel_id))
                }
                StoreEvent::ObjectiveAdded(objective) => {
                    self.on_objective(&objective);
                    self.deliver_to_all(Event::ObjectiveAdded(objective));
                }
                StoreEvent::LockGranted { process, token } => {
                    self.deliver(process, &Event::LockGranted(token))
                }
            }
        }
    }

    /// Spawns the protocols an objective asks us to run.
    fn on_objective(&mut self, objective: &Objective) {
        let me = self.store.address();
        let is_hub = objective
            .participants
            .get(1)
            .map_or(false, |p| p.signing_address == me);

        let protocol = match &objective.kind {
            ObjectiveKind::FundLedger { ledger_channel_id } => {
                if let Err(e) = self.join_ledger(objective, *ledger_channel_id) {
                    tracing::warn!(ledger = ?ledger_channel_id, error = %e, "cannot join ledger");
                    return;
                }
                Protocol::DirectFunding(DirectFunding::new(*ledger_channel_id))
            }
            ObjectiveKind::VirtualFund {
                target_channel_id,
                balances,
            } if is_hub => Protocol::VirtualFundingAsHub(VirtualFundingAsHub::new(
                *target_channel_id,
                objective.participants.clone(),
                balances.clone(),
            )),
            ObjectiveKind::DefundVirtual {
                target_channel_id,
                joint_channel_id,
            } if is_hub => Protocol::VirtualDefundingAsHub(VirtualDefundingAsHub::new(
                *target_channel_id,
                *joint_channel_id,
            )),
            _ => return,
        };
        self.spawn(protocol);
    }

    /// Registers the ledger announced in a FundLedger objective and signs its
    /// first state.
    fn join_ledger(&mut self, objective: &Objective, ledger: Hash) -> Result<(), WalletError> {
        let me = self.store.address();
        let peer = objective
            .participants
            .iter()
            .find(|p| p.signing_address != me)
            .ok_or(WalletError::Store(StoreError::InvalidParticipants))?;
        self.store.set_ledger(&peer.participant_id, ledger)?;

        let entry = self.store.get_entry(ledger)?;
        let first = entry
            .states_at(0)
            .into_iter()
            .next()
            .ok_or(WalletError::NoState(ledger))?;
        if !entry.is_signed_by_me(&first.state.variables) {
            let signed = self.store.sign_and_add(ledger, first.state.variables)?;
            self.broadcast(ledger, signed)?;
        }
        Ok(())
    }

    fn deliver_to_all(&mut self, event: Event) {
        let running: Vec<ProcessId> = self
            .processes
            .iter()
            .filter(|(_, p)| !p.status.is_terminal())
            .map(|(id, _)| *id)
            .collect();
        for process in running {
            self.deliver(process, &event);
        }
    }

    fn deliver(&mut self, process: ProcessId, event: &Event) {
        let p = match self.processes.get_mut(&process) {
            Some(p) if !p.status.is_terminal() => p,
            _ => return,
        };
        let mut ctx = Context {
            store: &mut self.store,
            bus: &self.bus,
            chain: &mut self.chain,
            config: &self.config,
            process,
        };
        p.status = p.protocol.on_event(&mut ctx, event);

        match &p.status {
            Status::InProgress => return,
            Status::Success => {
                tracing::info!(?process, protocol = p.protocol.name(), "protocol succeeded")
            }
            Status::Failure(reason) => tracing::warn!(
                ?process,
                protocol = p.protocol.name(),
                %reason,
                "protocol failed"
            ),
        }
        self.store.release_locks_of(process);
    }
}
