//! The store owns every [ChannelStoreEntry] of this participant together with
//! the cross-channel tables: nonces, ledger registry, objectives and ledger
//! locks.
//!
//! Protocols never hold references into the store. They get it passed for
//! the duration of one event and learn about changes through the
//! [StoreEvent] queue drained by the [Wallet][crate::Wallet].

mod backend;
mod lock;
mod objective;

pub use backend::{Backend, BackendError, MemoryBackend};
pub use lock::{LockStatus, LockToken};
pub use objective::{Objective, ObjectiveKind};

pub use crate::channel::ChannelRecord;

use crate::{
    canonical::{
        self,
        types::{Address, Hash, U256},
    },
    channel::{
        hash_state_with_id, ChannelConstants, ChannelStoreEntry, EntryError, Funding,
        SignatureEntry, SignedState, State, StateVariables,
    },
    sig::{self, Signer},
};
use alloc::{
    boxed::Box,
    collections::{BTreeMap, VecDeque},
    string::String,
    vec::Vec,
};
use core::fmt::Display;
use lock::LedgerLock;

/// Identifies a running protocol instance, used to hand out ledger locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// New states or signatures were merged into the channel.
    ChannelUpdated(Hash),
    ObjectiveAdded(Objective),
    /// `process` now holds the ledger lock for `token.peer`.
    LockGranted { process: ProcessId, token: LockToken },
}

#[derive(Debug)]
pub enum StoreError {
    NotAParticipant(Address),
    InvalidSignature(Address),
    ChannelNotFound(Hash),
    InvalidParticipants,
    StaleLock,
    LedgerNotFound(String),
    /// Every nonce of the participant list has been used.
    NoncesExhausted,
    Encoding(canonical::Error),
    Signing(sig::Error),
    Backend(BackendError),
}

impl From<canonical::Error> for StoreError {
    fn from(e: canonical::Error) -> Self {
        Self::Encoding(e)
    }
}
impl From<sig::Error> for StoreError {
    fn from(e: sig::Error) -> Self {
        Self::Signing(e)
    }
}
impl From<BackendError> for StoreError {
    fn from(e: BackendError) -> Self {
        Self::Backend(e)
    }
}
impl From<EntryError> for StoreError {
    fn from(e: EntryError) -> Self {
        match e {
            EntryError::NotAParticipant(a) => Self::NotAParticipant(a),
            EntryError::Encoding(e) => Self::Encoding(e),
        }
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            StoreError::NotAParticipant(a) => write!(f, "{:?} is not a participant", a),
            StoreError::InvalidSignature(a) => write!(f, "invalid signature by {:?}", a),
            StoreError::ChannelNotFound(id) => write!(f, "channel {:?} not found", id),
            StoreError::InvalidParticipants => {
                f.write_str("a channel needs at least 2 participants")
            }
            StoreError::StaleLock => f.write_str("lock token does not match the holder"),
            StoreError::LedgerNotFound(peer) => write!(f, "no ledger channel with {}", peer),
            StoreError::NoncesExhausted => f.write_str("no unused channel nonce left"),
            StoreError::Encoding(e) => write!(f, "encoding failed: {}", e),
            StoreError::Signing(e) => write!(f, "signing failed: {}", e),
            StoreError::Backend(e) => write!(f, "{}", e),
        }
    }
}

#[derive(Debug)]
pub struct Store {
    signer: Signer,
    entries: BTreeMap<Hash, ChannelStoreEntry>,
    nonces: BTreeMap<Vec<Address>, U256>,
    ledgers: BTreeMap<String, Hash>,
    objectives: Vec<Objective>,
    locks: BTreeMap<String, LedgerLock>,
    next_lock_id: u64,
    events: VecDeque<StoreEvent>,
    backend: Box<dyn Backend>,
}

impl Store {
    /// Creates an empty store persisting into a fresh [MemoryBackend].
    pub fn new(signer: Signer) -> Self {
        Self::with_backend(signer, Box::new(MemoryBackend::new()))
    }

    /// Creates an empty store, nothing is loaded from `backend`.
    pub fn with_backend(signer: Signer, backend: Box<dyn Backend>) -> Self {
        Self {
            signer,
            entries: BTreeMap::new(),
            nonces: BTreeMap::new(),
            ledgers: BTreeMap::new(),
            objectives: Vec::new(),
            locks: BTreeMap::new(),
            next_lock_id: 0,
            events: VecDeque::new(),
            backend,
        }
    }

    /// Rebuilds a store from everything `backend` has persisted.
    ///
    /// Locks and queued events are not persisted, the processes owning them
    /// did not survive either.
    pub fn restore(signer: Signer, backend: Box<dyn Backend>) -> Result<Self, StoreError> {
        let mut store = Self::with_backend(signer, backend);
        for (id, record) in store.backend.load_channels()? {
            let entry = ChannelStoreEntry::from_record(record)?;
            store.entries.insert(id, entry);
        }
        store.nonces = store.backend.load_nonces()?.into_iter().collect();
        store.ledgers = store.backend.load_ledgers()?.into_iter().collect();
        store.objectives = store.backend.load_objectives()?;
        tracing::info!(channels = store.entries.len(), "restored store");
        Ok(store)
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Returns the next unused nonce for this exact (ordered) participant
    /// list and records it as used.
    pub fn next_nonce(&mut self, participants: &[Address]) -> Result<U256, StoreError> {
        let key = participants.to_vec();
        let nonce = match self.nonces.get(&key) {
            Some(n) => n
                .checked_add(U256::one())
                .ok_or(StoreError::NoncesExhausted)?,
            None => U256::zero(),
        };
        self.nonces.insert(key.clone(), nonce);
        self.backend.save_nonce(key, nonce)?;
        Ok(nonce)
    }

    /// Marks the nonce of a channel learned from a peer as used, so channels
    /// created here later do not get the same id.
    fn observe_nonce(&mut self, constants: &ChannelConstants) -> Result<(), StoreError> {
        let key = constants.signing_addresses();
        if self
            .nonces
            .get(&key)
            .map_or(false, |n| *n >= constants.channel_nonce)
        {
            return Ok(());
        }
        self.nonces.insert(key.clone(), constants.channel_nonce);
        self.backend.save_nonce(key, constants.channel_nonce)?;
        Ok(())
    }

    /// Assigns a fresh nonce to `constants`, signs `first` and stores it.
    pub fn create_channel(
        &mut self,
        mut constants: ChannelConstants,
        first: StateVariables,
    ) -> Result<(Hash, SignedState), StoreError> {
        if constants.participants.len() < 2 {
            return Err(StoreError::InvalidParticipants);
        }
        let my_index = constants
            .index_of(&self.address())
            .ok_or(StoreError::NotAParticipant(self.address()))?;

        // Never replace a channel we already know.
        let addresses = constants.signing_addresses();
        let channel_id = loop {
            constants.channel_nonce = self.next_nonce(&addresses)?;
            let id = constants.channel_id()?;
            if !self.entries.contains_key(&id) {
                break id;
            }
        };
        let entry = ChannelStoreEntry::new(constants, my_index)?;
        self.entries.insert(channel_id, entry);
        tracing::info!(channel = ?channel_id, "created channel");

        let signed = self.sign_and_add(channel_id, first)?;
        Ok((channel_id, signed))
    }

    /// Signs `state` without storing it.
    pub fn sign_state(&self, state: &State) -> Result<SignedState, StoreError> {
        let me = self.address();
        if state.constants.index_of(&me).is_none() {
            return Err(StoreError::NotAParticipant(me));
        }
        let hash = state.hash()?;
        Ok(SignedState {
            state: state.clone(),
            signatures: alloc::vec![SignatureEntry {
                signer: me,
                signature: self.signer.sign_eth(hash)?,
            }],
        })
    }

    /// Signs `variables` for the channel and merges the signature. The
    /// returned state carries every signature known for it.
    pub fn sign_and_add(
        &mut self,
        channel_id: Hash,
        variables: StateVariables,
    ) -> Result<SignedState, StoreError> {
        let me = self.address();
        let entry = self
            .entries
            .get_mut(&channel_id)
            .ok_or(StoreError::ChannelNotFound(channel_id))?;
        let hash = entry.state_hash(&variables)?;
        let signature = SignatureEntry {
            signer: me,
            signature: self.signer.sign_eth(hash)?,
        };
        let turn_num = variables.turn_num;
        let changed = entry.add_state(variables.clone(), [signature])?;

        let signed = entry
            .states_at(turn_num)
            .into_iter()
            .find(|s| s.state.variables == variables)
            .unwrap_or_else(|| SignedState {
                // Already pruned, only our own signature is of interest.
                state: State {
                    constants: entry.constants().clone(),
                    variables,
                },
                signatures: alloc::vec![signature],
            });

        if changed {
            self.channel_changed(channel_id)?;
        }
        Ok(signed)
    }

    /// Verifies and merges a batch of signed states.
    ///
    /// Either the whole batch is merged or, if any state is rejected, nothing
    /// is. A state is rejected if a signature does not match its claimed
    /// signer or if it opens a channel we cannot be part of.
    pub fn receive_states(&mut self, states: Vec<SignedState>) -> Result<(), StoreError> {
        let mut verified = Vec::with_capacity(states.len());
        for signed in states {
            let channel_id = signed.state.channel_id()?;
            let constants = match self.entries.get(&channel_id) {
                Some(entry) => entry.constants().clone(),
                None => {
                    self.new_entry(signed.state.constants.clone())?;
                    signed.state.constants.clone()
                }
            };
            let hash = hash_state_with_id(channel_id, &constants, &signed.state.variables)?;
            for entry in &signed.signatures {
                self.verify(&constants, hash, entry)?;
            }
            verified.push((channel_id, signed));
        }

        let mut touched = Vec::new();
        for (channel_id, signed) in verified {
            if !self.entries.contains_key(&channel_id) {
                let entry = self.new_entry(signed.state.constants.clone())?;
                self.observe_nonce(entry.constants())?;
                self.entries.insert(channel_id, entry);
                tracing::info!(channel = ?channel_id, "learned about channel");
                touched.push(channel_id);
            }
            let entry = self
                .entries
                .get_mut(&channel_id)
                .ok_or(StoreError::ChannelNotFound(channel_id))?;
            if entry.add_state(signed.state.variables, signed.signatures)?
                && !touched.contains(&channel_id)
            {
                touched.push(channel_id);
            }
        }

        for channel_id in touched {
            tracing::debug!(channel = ?channel_id, "merged states");
            self.channel_changed(channel_id)?;
        }
        Ok(())
    }

    /// Creates the entry for a channel whose states are already known, e.g.
    /// when importing it from another device.
    pub fn create_entry(
        &mut self,
        states: Vec<SignedState>,
        funding: Option<Funding>,
    ) -> Result<Hash, StoreError> {
        let first = states.first().ok_or(StoreError::InvalidParticipants)?;
        let channel_id = first.state.channel_id()?;
        if states
            .iter()
            .any(|s| s.state.constants != first.state.constants)
        {
            return Err(StoreError::InvalidParticipants);
        }
        self.receive_states(states)?;
        if let Some(funding) = funding {
            self.set_funding(channel_id, funding)?;
        }
        Ok(channel_id)
    }

    fn new_entry(&self, constants: ChannelConstants) -> Result<ChannelStoreEntry, StoreError> {
        if constants.participants.len() < 2 {
            return Err(StoreError::InvalidParticipants);
        }
        let me = self.address();
        let my_index = constants
            .index_of(&me)
            .ok_or(StoreError::NotAParticipant(me))?;
        Ok(ChannelStoreEntry::new(constants, my_index)?)
    }

    fn verify(
        &self,
        constants: &ChannelConstants,
        hash: Hash,
        entry: &SignatureEntry,
    ) -> Result<(), StoreError> {
        if constants.index_of(&entry.signer).is_none() {
            tracing::warn!(signer = ?entry.signer, "rejected signature by non-participant");
            return Err(StoreError::InvalidSignature(entry.signer));
        }
        match self.signer.recover_signer(hash, entry.signature) {
            Ok(addr) if addr == entry.signer => Ok(()),
            _ => {
                tracing::warn!(signer = ?entry.signer, "rejected batch with invalid signature");
                Err(StoreError::InvalidSignature(entry.signer))
            }
        }
    }

    fn channel_changed(&mut self, channel_id: Hash) -> Result<(), StoreError> {
        if let Some(entry) = self.entries.get(&channel_id) {
            self.backend.save_channel(channel_id, entry.record())?;
        }
        self.events.push_back(StoreEvent::ChannelUpdated(channel_id));
        Ok(())
    }

    pub fn get_entry(&self, channel_id: Hash) -> Result<&ChannelStoreEntry, StoreError> {
        self.entries
            .get(&channel_id)
            .ok_or(StoreError::ChannelNotFound(channel_id))
    }

    pub fn channel_ids(&self) -> impl Iterator<Item = &Hash> {
        self.entries.keys()
    }

    pub fn set_funding(&mut self, channel_id: Hash, funding: Funding) -> Result<(), StoreError> {
        let entry = self
            .entries
            .get_mut(&channel_id)
            .ok_or(StoreError::ChannelNotFound(channel_id))?;
        if entry.funding() == Some(funding) {
            return Ok(());
        }
        entry.set_funding(funding);
        tracing::info!(channel = ?channel_id, ?funding, "funding recorded");
        self.channel_changed(channel_id)
    }

    /// Records that the adjudicator finalized the channel at
    /// `turn_num_record`. Off-chain defunding is refused from then on.
    pub fn set_finalized_on_chain(
        &mut self,
        channel_id: Hash,
        turn_num_record: u64,
    ) -> Result<(), StoreError> {
        let entry = self
            .entries
            .get_mut(&channel_id)
            .ok_or(StoreError::ChannelNotFound(channel_id))?;
        if entry.finalized_on_chain() == Some(turn_num_record) {
            return Ok(());
        }
        entry.set_finalized_on_chain(turn_num_record);
        tracing::info!(channel = ?channel_id, turn_num_record, "finalized on chain");
        self.channel_changed(channel_id)
    }

    /// Registers `ledger_id` as the ledger channel shared with `peer`.
    pub fn set_ledger(&mut self, peer: &str, ledger_id: Hash) -> Result<(), StoreError> {
        self.get_entry(ledger_id)?;
        if self.ledgers.get(peer) == Some(&ledger_id) {
            return Ok(());
        }
        self.ledgers.insert(peer.into(), ledger_id);
        self.backend.save_ledger(peer.into(), ledger_id)?;
        tracing::info!(peer, ledger = ?ledger_id, "registered ledger");
        self.events.push_back(StoreEvent::ChannelUpdated(ledger_id));
        Ok(())
    }

    pub fn ledger_with(&self, peer: &str) -> Result<Hash, StoreError> {
        self.ledgers
            .get(peer)
            .copied()
            .ok_or_else(|| StoreError::LedgerNotFound(peer.into()))
    }

    /// Queues `objective` unless an equal one is already known. Returns
    /// whether it was new.
    pub fn add_objective(&mut self, objective: Objective) -> Result<bool, StoreError> {
        if self.objectives.contains(&objective) {
            return Ok(false);
        }
        tracing::debug!(channel = ?objective.channel_id(), "objective added");
        self.objectives.push(objective.clone());
        self.backend.save_objectives(&self.objectives)?;
        self.events.push_back(StoreEvent::ObjectiveAdded(objective));
        Ok(true)
    }

    pub fn objectives(&self) -> &[Objective] {
        &self.objectives
    }

    /// Grants the lock for the ledger with `peer` right away if it is free,
    /// otherwise queues `process` behind the current holder and earlier
    /// requests.
    pub fn lock_ledger(&mut self, peer: &str, process: ProcessId) -> LockStatus {
        let lock = self.locks.entry(peer.into()).or_default();
        if let Some((token, holder)) = &lock.holder {
            if *holder == process {
                return LockStatus::Granted(token.clone());
            }
            if !lock.is_waiting(process) {
                lock.waiting.push_back(process);
            }
            tracing::debug!(peer, ?process, "ledger lock queued");
            return LockStatus::Queued;
        }

        let token = LockToken {
            peer: peer.into(),
            id: self.next_lock_id,
        };
        self.next_lock_id += 1;
        lock.holder = Some((token.clone(), process));
        tracing::info!(peer, ?process, "ledger lock granted");
        LockStatus::Granted(token)
    }

    /// Releases the lock and hands it to the next waiting process, which is
    /// told through a [StoreEvent::LockGranted].
    ///
    /// A token that does not belong to the current holder changes nothing.
    pub fn release_ledger(&mut self, token: &LockToken) -> Result<(), StoreError> {
        let lock = match self.locks.get_mut(&token.peer) {
            Some(lock) => lock,
            None => {
                tracing::warn!(peer = %token.peer, "release of unknown lock");
                return Err(StoreError::StaleLock);
            }
        };
        match &lock.holder {
            Some((held, _)) if held == token => {}
            _ => {
                tracing::warn!(peer = %token.peer, "stale lock release ignored");
                return Err(StoreError::StaleLock);
            }
        }

        lock.holder = None;
        if let Some(next) = lock.waiting.pop_front() {
            let next_token = LockToken {
                peer: token.peer.clone(),
                id: self.next_lock_id,
            };
            self.next_lock_id += 1;
            lock.holder = Some((next_token.clone(), next));
            tracing::info!(peer = %token.peer, process = ?next, "ledger lock handed over");
            self.events.push_back(StoreEvent::LockGranted {
                process: next,
                token: next_token,
            });
        } else if lock.is_idle() {
            self.locks.remove(&token.peer);
        }
        Ok(())
    }

    /// Withdraws a lock request that has not been granted yet.
    pub fn abandon_lock_request(&mut self, peer: &str, process: ProcessId) {
        if let Some(lock) = self.locks.get_mut(peer) {
            lock.waiting.retain(|p| *p != process);
        }
    }

    /// Drops every lock request of `process` and releases what it holds.
    pub fn release_locks_of(&mut self, process: ProcessId) {
        let mut held = Vec::new();
        for lock in self.locks.values_mut() {
            lock.waiting.retain(|p| *p != process);
            if let Some((token, holder)) = &lock.holder {
                if *holder == process {
                    held.push(token.clone());
                }
            }
        }
        for token in held {
            // We just read the token from the holder, it cannot be stale.
            let _ = self.release_ledger(&token);
        }
    }

    pub fn pop_event(&mut self) -> Option<StoreEvent> {
        self.events.pop_front()
    }
}
