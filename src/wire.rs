mod encoding;

use core::fmt::Debug;

pub use encoding::{decode, ProtoBufEncodingLayer};

use crate::messages::Message;

/// Sends raw bytes to a participant, identified by its participant id.
pub trait BytesBus: Debug {
    fn send_to_participant(&self, recipient: &str, msg: &[u8]);
}

/// Low-Level abstraction over the network configuration.
///
/// Delivery may duplicate and reorder messages. Wallets cope with both, so
/// implementations are free to retry.
pub trait MessageBus: Debug {
    fn send_to_participant(&self, recipient: &str, msg: Message);
}
