//! Per-channel bookkeeping of signed states and the derivation of the
//! supported state.

use super::{
    state::hash_state_with_id, ChannelConstants, Participant, SignatureEntry, SignedState, State,
    StateVariables,
};
use crate::canonical::{
    self,
    types::{Address, Hash},
};
use alloc::{collections::BTreeMap, collections::BTreeSet, vec::Vec};
use core::fmt::Display;

/// How a channel's funds are held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Funding {
    /// Deposited on chain into the channel itself.
    Direct,
    /// Carved out of a ledger channel's allocation.
    Indirect { ledger_id: Hash },
    /// Backed by a joint channel through guarantors.
    Virtual { joint_channel_id: Hash },
    /// Joint channel, backed by a guarantor.
    Guarantee { guarantor_channel_id: Hash },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Proposed,
    Opening,
    Running,
    Closing,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryError {
    NotAParticipant(Address),
    Encoding(canonical::Error),
}

impl From<canonical::Error> for EntryError {
    fn from(e: canonical::Error) -> Self {
        Self::Encoding(e)
    }
}

impl Display for EntryError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            EntryError::NotAParticipant(a) => write!(f, "{:?} is not a participant", a),
            EntryError::Encoding(e) => write!(f, "encoding failed: {}", e),
        }
    }
}

/// Everything needed to rebuild a [ChannelStoreEntry].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRecord {
    pub constants: ChannelConstants,
    pub states: Vec<(StateVariables, Vec<SignatureEntry>)>,
    pub funding: Option<Funding>,
    pub my_index: usize,
    pub finalized_on_chain: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ChannelStoreEntry {
    constants: ChannelConstants,
    channel_id: Hash,
    my_index: usize,
    funding: Option<Funding>,
    // Turn recorded by the adjudicator when the channel was finalized there.
    finalized_on_chain: Option<u64>,
    states: BTreeMap<Hash, StateVariables>,
    // Pruned together with `states`.
    signatures: BTreeMap<Hash, Vec<SignatureEntry>>,
    // Hashes of the current support, highest turn first.
    support: Vec<Hash>,
}

impl ChannelStoreEntry {
    pub fn new(constants: ChannelConstants, my_index: usize) -> Result<Self, EntryError> {
        let channel_id = constants.channel_id()?;
        if my_index >= constants.participants.len() {
            return Err(EntryError::NotAParticipant(Address::default()));
        }
        Ok(Self {
            constants,
            channel_id,
            my_index,
            funding: None,
            finalized_on_chain: None,
            states: BTreeMap::new(),
            signatures: BTreeMap::new(),
            support: Vec::new(),
        })
    }

    pub fn from_record(record: ChannelRecord) -> Result<Self, EntryError> {
        let mut entry = Self::new(record.constants, record.my_index)?;
        entry.funding = record.funding;
        entry.finalized_on_chain = record.finalized_on_chain;
        for (variables, signatures) in record.states {
            entry.add_state(variables, signatures)?;
        }
        Ok(entry)
    }

    pub fn record(&self) -> ChannelRecord {
        let states = self
            .states
            .iter()
            .map(|(hash, vars)| (vars.clone(), self.signatures_of(hash).to_vec()))
            .collect();
        ChannelRecord {
            constants: self.constants.clone(),
            states,
            funding: self.funding,
            my_index: self.my_index,
            finalized_on_chain: self.finalized_on_chain,
        }
    }

    pub fn channel_id(&self) -> Hash {
        self.channel_id
    }

    pub fn constants(&self) -> &ChannelConstants {
        &self.constants
    }

    pub fn participants(&self) -> &[Participant] {
        &self.constants.participants
    }

    pub fn my_index(&self) -> usize {
        self.my_index
    }

    pub fn my_address(&self) -> Address {
        self.constants.participants[self.my_index].signing_address
    }

    pub fn funding(&self) -> Option<Funding> {
        self.funding
    }

    pub fn set_funding(&mut self, funding: Funding) {
        self.funding = Some(funding);
    }

    pub fn finalized_on_chain(&self) -> Option<u64> {
        self.finalized_on_chain
    }

    pub fn set_finalized_on_chain(&mut self, turn_num_record: u64) {
        self.finalized_on_chain = Some(turn_num_record);
    }

    pub fn state_hash(&self, variables: &StateVariables) -> Result<Hash, canonical::Error> {
        hash_state_with_id(self.channel_id, &self.constants, variables)
    }

    /// Merges a state and its signatures, returns whether anything changed.
    ///
    /// Signatures must have been verified by the caller, only membership of
    /// the signer is checked here. A signer already recorded for the state is
    /// ignored.
    pub fn add_state(
        &mut self,
        variables: StateVariables,
        signatures: impl IntoIterator<Item = SignatureEntry>,
    ) -> Result<bool, EntryError> {
        let signatures: Vec<SignatureEntry> = signatures.into_iter().collect();
        if let Some(s) = signatures
            .iter()
            .find(|s| self.constants.index_of(&s.signer).is_none())
        {
            return Err(EntryError::NotAParticipant(s.signer));
        }

        let hash = self.state_hash(&variables)?;

        // A state older than the support could never become part of it
        // again.
        if self
            .earliest_supported_turn()
            .map_or(false, |t| variables.turn_num < t)
        {
            return Ok(false);
        }
        let mut changed = false;
        if !self.states.contains_key(&hash) {
            self.states.insert(hash, variables);
            changed = true;
        }

        let recorded = self.signatures.entry(hash).or_default();
        for sig in signatures {
            if !recorded.iter().any(|r| r.signer == sig.signer) {
                recorded.push(sig);
                changed = true;
            }
        }

        if changed {
            self.update_support();
        }
        Ok(changed)
    }

    fn earliest_supported_turn(&self) -> Option<u64> {
        self.support
            .last()
            .and_then(|h| self.states.get(h))
            .map(|s| s.turn_num)
    }

    fn signatures_of(&self, hash: &Hash) -> &[SignatureEntry] {
        self.signatures
            .get(hash)
            .map(|s| s.as_slice())
            .unwrap_or(&[])
    }

    fn update_support(&mut self) {
        self.support = self.compute_support();
        tracing::debug!(
            channel = ?self.channel_id,
            support = self.support.len(),
            "recomputed support"
        );

        if let Some(earliest) = self.earliest_supported_turn() {
            let before = self.states.len();
            self.states.retain(|_, s| s.turn_num >= earliest);
            let states = &self.states;
            self.signatures.retain(|h, _| states.contains_key(h));
            if self.states.len() != before {
                tracing::debug!(
                    channel = ?self.channel_id,
                    pruned = before - self.states.len(),
                    "pruned stale states"
                );
            }
        }
    }

    /// Walks the states from the highest turn down and collects a validly
    /// chained suffix until every participant has signed somewhere in it.
    fn compute_support(&self) -> Vec<Hash> {
        let n = self.constants.participants.len();
        let all: BTreeSet<usize> = (0..n).collect();

        let mut sorted: Vec<(&Hash, &StateVariables)> = self.states.iter().collect();
        // Ties cannot be ordered by arrival, use the hash so the result does
        // not depend on the order states were received in.
        sorted.sort_by(|(ha, a), (hb, b)| b.turn_num.cmp(&a.turn_num).then(ha.cmp(hb)));

        let mut support = Vec::new();
        let mut not_signed = all.clone();
        let mut previous: Option<&StateVariables> = None;

        for (hash, state) in sorted {
            if let Some(higher) = previous {
                if !valid_transition(state, higher, n) {
                    support.clear();
                    not_signed = all.clone();
                }
            }

            let signers: BTreeSet<usize> = self
                .signatures_of(hash)
                .iter()
                .filter_map(|s| self.constants.index_of(&s.signer))
                .collect();

            if signers.contains(&self.constants.mover_index(state.turn_num)) {
                support.push(*hash);
                for i in &signers {
                    not_signed.remove(i);
                }
                if not_signed.is_empty() {
                    return support;
                }
            }
            previous = Some(state);
        }
        Vec::new()
    }

    fn signed_state(&self, hash: &Hash, variables: &StateVariables) -> SignedState {
        SignedState {
            state: self.state(variables),
            signatures: self.signatures_of(hash).to_vec(),
        }
    }

    fn state(&self, variables: &StateVariables) -> State {
        State {
            constants: self.constants.clone(),
            variables: variables.clone(),
        }
    }

    pub fn is_supported(&self) -> bool {
        !self.support.is_empty()
    }

    pub fn supported(&self) -> Option<&StateVariables> {
        self.support.first().and_then(|h| self.states.get(h))
    }

    /// The states forming the support, highest turn first.
    pub fn support(&self) -> Vec<SignedState> {
        self.support
            .iter()
            .filter_map(|h| self.states.get(h).map(|v| self.signed_state(h, v)))
            .collect()
    }

    pub fn is_finalized(&self) -> bool {
        self.supported().map_or(false, |s| s.is_final)
    }

    /// Highest turn known, signed or not by me.
    pub fn latest(&self) -> Option<&StateVariables> {
        self.states.values().max_by_key(|s| s.turn_num)
    }

    pub fn latest_signed_by_me(&self) -> Option<&StateVariables> {
        let me = self.my_address();
        self.states
            .iter()
            .filter(|(h, _)| self.signatures_of(h).iter().any(|s| s.signer == me))
            .map(|(_, s)| s)
            .max_by_key(|s| s.turn_num)
    }

    pub fn is_supported_by_me(&self) -> bool {
        self.latest_signed_by_me().is_some()
    }

    pub fn is_signed_by_me(&self, variables: &StateVariables) -> bool {
        let me = self.my_address();
        self.state_hash(variables)
            .map(|h| self.signatures_of(&h).iter().any(|s| s.signer == me))
            .unwrap_or(false)
    }

    /// Every stored state with the given turn, together with its signatures.
    pub fn states_at(&self, turn_num: u64) -> Vec<SignedState> {
        self.states
            .iter()
            .filter(|(_, s)| s.turn_num == turn_num)
            .map(|(h, v)| self.signed_state(h, v))
            .collect()
    }

    pub fn all_signed_states(&self) -> Vec<SignedState> {
        self.states
            .iter()
            .map(|(h, v)| self.signed_state(h, v))
            .collect()
    }

    pub fn status(&self) -> ChannelStatus {
        let n = self.constants.participants.len() as u64;
        match self.supported() {
            Some(s) if s.is_final => ChannelStatus::Closed,
            Some(_) if self.latest().map_or(false, |l| l.is_final) => ChannelStatus::Closing,
            Some(s) if s.turn_num + 1 < 2 * n => ChannelStatus::Opening,
            Some(_) => ChannelStatus::Running,
            None => ChannelStatus::Proposed,
        }
    }
}

/// Checks `first -> second` without looking at the application rules.
pub fn valid_transition(first: &StateVariables, second: &StateVariables, n: usize) -> bool {
    if first.turn_num + 1 != second.turn_num {
        return false;
    }
    if second.is_final {
        return first.outcome == second.outcome;
    }
    if second.turn_num < 2 * n as u64 {
        return first.outcome == second.outcome && first.app_data == second.app_data;
    }
    true
}

#[cfg(test)]
mod tests;
