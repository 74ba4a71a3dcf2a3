//! Persistence of the store's tables.

use super::Objective;
use crate::{
    canonical::types::{Address, Hash, U256},
    channel::ChannelRecord,
};
use alloc::{collections::BTreeMap, rc::Rc, string::String, vec::Vec};
use core::{
    cell::RefCell,
    fmt::{Debug, Display},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError(pub String);

impl Display for BackendError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "backend error: {}", self.0)
    }
}

/// Key-value persistence used by the [Store][super::Store]. The store keeps
/// everything in memory and writes through after each mutation.
pub trait Backend: Debug {
    fn save_channel(&mut self, id: Hash, record: ChannelRecord) -> Result<(), BackendError>;
    fn load_channels(&self) -> Result<Vec<(Hash, ChannelRecord)>, BackendError>;

    fn save_nonce(&mut self, key: Vec<Address>, nonce: U256) -> Result<(), BackendError>;
    fn load_nonces(&self) -> Result<Vec<(Vec<Address>, U256)>, BackendError>;

    fn save_ledger(&mut self, peer: String, ledger_id: Hash) -> Result<(), BackendError>;
    fn load_ledgers(&self) -> Result<Vec<(String, Hash)>, BackendError>;

    fn save_objectives(&mut self, objectives: &[Objective]) -> Result<(), BackendError>;
    fn load_objectives(&self) -> Result<Vec<Objective>, BackendError>;
}

#[derive(Debug, Default)]
struct Tables {
    channels: BTreeMap<Hash, ChannelRecord>,
    nonces: BTreeMap<Vec<Address>, U256>,
    ledgers: BTreeMap<String, Hash>,
    objectives: Vec<Objective>,
}

/// In-memory backend. Clones share the same tables, so a clone kept outside
/// the store can be used to restore it.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    tables: Rc<RefCell<Tables>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Backend for MemoryBackend {
    fn save_channel(&mut self, id: Hash, record: ChannelRecord) -> Result<(), BackendError> {
        self.tables.borrow_mut().channels.insert(id, record);
        Ok(())
    }

    fn load_channels(&self) -> Result<Vec<(Hash, ChannelRecord)>, BackendError> {
        Ok(self
            .tables
            .borrow()
            .channels
            .iter()
            .map(|(k, v)| (*k, v.clone()))
            .collect())
    }

    fn save_nonce(&mut self, key: Vec<Address>, nonce: U256) -> Result<(), BackendError> {
        self.tables.borrow_mut().nonces.insert(key, nonce);
        Ok(())
    }

    fn load_nonces(&self) -> Result<Vec<(Vec<Address>, U256)>, BackendError> {
        Ok(self
            .tables
            .borrow()
            .nonces
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect())
    }

    fn save_ledger(&mut self, peer: String, ledger_id: Hash) -> Result<(), BackendError> {
        self.tables.borrow_mut().ledgers.insert(peer, ledger_id);
        Ok(())
    }

    fn load_ledgers(&self) -> Result<Vec<(String, Hash)>, BackendError> {
        Ok(self
            .tables
            .borrow()
            .ledgers
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect())
    }

    fn save_objectives(&mut self, objectives: &[Objective]) -> Result<(), BackendError> {
        self.tables.borrow_mut().objectives = objectives.to_vec();
        Ok(())
    }

    fn load_objectives(&self) -> Result<Vec<Objective>, BackendError> {
        Ok(self.tables.borrow().objectives.clone())
    }
}
