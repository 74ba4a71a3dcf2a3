use prost::bytes::BufMut;

use super::{BytesBus, MessageBus};
use crate::{
    messages::{ConversionError, Message},
    nitrowire::Envelope,
};
use alloc::vec::Vec;

/// Encodes messages as protobuf [Envelope]s and hands the bytes to a
/// [BytesBus].
#[derive(Debug)]
pub struct ProtoBufEncodingLayer<B: BytesBus> {
    pub bus: B,
}

impl<B: BytesBus> ProtoBufEncodingLayer<B> {
    /// Frames `msg` with a big-endian u16 length instead of the LEB128 varint
    /// `encode_length_delimited` would write.
    pub fn encode(msg: Message) -> Result<Vec<u8>, ConversionError> {
        let envelope: Envelope = msg.into();
        let len = prost::Message::encoded_len(&envelope);
        if len >= (1 << 16) {
            return Err(ConversionError::TooLarge(len));
        }

        let mut buf = Vec::with_capacity(2 + len);
        buf.put_slice(&(len as u16).to_be_bytes());
        prost::Message::encode(&envelope, &mut buf)?;
        Ok(buf)
    }
}

impl<B: BytesBus> MessageBus for ProtoBufEncodingLayer<B> {
    fn send_to_participant(&self, recipient: &str, msg: Message) {
        match Self::encode(msg) {
            Ok(buf) => self.bus.send_to_participant(recipient, &buf),
            Err(e) => tracing::warn!(recipient, error = %e, "dropping message"),
        }
    }
}

/// Reverses [ProtoBufEncodingLayer::encode].
pub fn decode(buf: &[u8]) -> Result<Message, ConversionError> {
    if buf.len() < 2 {
        return Err(ConversionError::InvalidFrame);
    }
    let len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
    let payload = &buf[2..];
    if payload.len() != len {
        return Err(ConversionError::InvalidFrame);
    }
    let envelope = <Envelope as prost::Message>::decode(payload)?;
    envelope.try_into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        canonical::types::{Address, Destination, Hash, U256},
        channel::{
            AllocationItem, ChannelConstants, Outcome, Participant, SignatureEntry, SignedState,
            State, StateVariables,
        },
        sig::Signer,
        store::{Objective, ObjectiveKind},
    };
    use alloc::{string::ToString, vec};
    use core::cell::RefCell;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    #[derive(Debug, Default)]
    struct Recorder(RefCell<Vec<(alloc::string::String, Vec<u8>)>>);

    impl BytesBus for Recorder {
        fn send_to_participant(&self, recipient: &str, msg: &[u8]) {
            self.0.borrow_mut().push((recipient.to_string(), msg.to_vec()));
        }
    }

    fn message(rng: &mut StdRng) -> Message {
        let signer = Signer::new(rng);
        let participants: Vec<Participant> = (0..2)
            .map(|i| Participant {
                participant_id: i.to_string(),
                signing_address: rng.gen(),
                destination: Destination::from(rng.gen::<Address>()),
            })
            .collect();
        let outcome = Outcome::Allocation(vec![
            AllocationItem::new(participants[0].destination, 7u64),
            AllocationItem::new(participants[1].destination, U256::MAX),
        ]);
        let state = State {
            constants: ChannelConstants {
                chain_id: U256::from(1337),
                participants: participants.clone(),
                app_definition: rng.gen(),
                challenge_duration: 60,
                channel_nonce: U256::from(3),
            },
            variables: StateVariables::new(4, outcome),
        };
        let signature = signer.sign_eth(rng.gen()).unwrap();
        Message {
            signed_states: vec![SignedState {
                state,
                signatures: vec![SignatureEntry {
                    signer: signer.address(),
                    signature,
                }],
            }],
            objectives: vec![Objective::new(
                participants,
                ObjectiveKind::FundLedger {
                    ledger_channel_id: rng.gen::<Hash>(),
                },
            )],
        }
    }

    #[test]
    fn bytes_bus_receives_decodable_frame() {
        let mut rng = StdRng::seed_from_u64(0);
        let msg = message(&mut rng);
        let layer = ProtoBufEncodingLayer {
            bus: Recorder::default(),
        };

        layer.send_to_participant("bob", msg.clone());

        let sent = layer.bus.0.borrow();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "bob");
        let len = u16::from_be_bytes([sent[0].1[0], sent[0].1[1]]) as usize;
        assert_eq!(len + 2, sent[0].1.len());
        assert_eq!(decode(&sent[0].1).unwrap(), msg);
    }

    #[test]
    fn truncated_frame_is_rejected() {
        let mut rng = StdRng::seed_from_u64(1);
        let buf = ProtoBufEncodingLayer::<Recorder>::encode(message(&mut rng)).unwrap();

        assert!(matches!(
            decode(&buf[..buf.len() - 1]),
            Err(ConversionError::InvalidFrame)
        ));
        assert!(matches!(decode(&buf[..1]), Err(ConversionError::InvalidFrame)));
    }

    #[test]
    fn short_address_is_rejected() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut envelope: Envelope = message(&mut rng).into();
        envelope.objectives[0].participants[0].signing_address.pop();

        assert!(matches!(
            Message::try_from(envelope),
            Err(ConversionError::ByteLengthMissmatch)
        ));
    }

    #[test]
    fn missing_outcome_is_rejected() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut envelope: Envelope = message(&mut rng).into();
        if let Some(state) = envelope.signed_states[0].state.as_mut() {
            state.outcome = None;
        }

        assert!(matches!(
            Message::try_from(envelope),
            Err(ConversionError::ExptectedSome)
        ));
    }

    #[test]
    fn empty_message_encodes_to_length_prefix_only() {
        let buf = ProtoBufEncodingLayer::<Recorder>::encode(Message::default()).unwrap();
        assert_eq!(buf, vec![0, 0]);
        assert!(decode(&buf).unwrap().is_empty());
    }
}
