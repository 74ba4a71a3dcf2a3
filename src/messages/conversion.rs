use super::{ConversionError, Message};
use crate::{
    canonical::types::{Address, Destination, Hash, Signature, U256},
    channel::{
        AllocationItem, ChannelConstants, Guarantee, Outcome, Participant, SignatureEntry,
        SignedState, State, StateVariables,
    },
    nitrowire::{self, objective, outcome},
    store::{Objective, ObjectiveKind},
};
use alloc::vec::Vec;

fn fixed<T>(bytes: &[u8]) -> Result<T, ConversionError>
where
    T: for<'a> TryFrom<&'a [u8]>,
{
    T::try_from(bytes).or(Err(ConversionError::ByteLengthMissmatch))
}

fn u256(bytes: &[u8]) -> Result<U256, ConversionError> {
    if bytes.len() != 32 {
        return Err(ConversionError::ByteLengthMissmatch);
    }
    Ok(U256::from_big_endian(bytes))
}

fn collect<T, U>(values: Vec<T>) -> Result<Vec<U>, ConversionError>
where
    U: TryFrom<T, Error = ConversionError>,
{
    values.into_iter().map(U::try_from).collect()
}

impl From<Participant> for nitrowire::Participant {
    fn from(value: Participant) -> Self {
        Self {
            participant_id: value.participant_id,
            signing_address: value.signing_address.0.to_vec(),
            destination: value.destination.0.to_vec(),
        }
    }
}

impl TryFrom<nitrowire::Participant> for Participant {
    type Error = ConversionError;

    fn try_from(value: nitrowire::Participant) -> Result<Self, Self::Error> {
        Ok(Self {
            participant_id: value.participant_id,
            signing_address: fixed::<Address>(&value.signing_address)?,
            destination: fixed::<Destination>(&value.destination)?,
        })
    }
}

impl From<AllocationItem> for nitrowire::AllocationItem {
    fn from(value: AllocationItem) -> Self {
        Self {
            destination: value.destination.0.to_vec(),
            amount: value.amount.to_be_bytes().to_vec(),
        }
    }
}

impl TryFrom<nitrowire::AllocationItem> for AllocationItem {
    type Error = ConversionError;

    fn try_from(value: nitrowire::AllocationItem) -> Result<Self, Self::Error> {
        Ok(Self {
            destination: fixed::<Destination>(&value.destination)?,
            amount: u256(&value.amount)?,
        })
    }
}

impl From<Outcome> for nitrowire::Outcome {
    fn from(value: Outcome) -> Self {
        let kind = match value {
            Outcome::Allocation(items) => outcome::Kind::Allocation(nitrowire::Allocation {
                items: items.into_iter().map(Into::into).collect(),
            }),
            Outcome::Guarantee(g) => outcome::Kind::Guarantee(nitrowire::Guarantee {
                target_channel_id: g.target_channel_id.0.to_vec(),
                destinations: g.destinations.iter().map(|d| d.0.to_vec()).collect(),
            }),
        };
        Self { kind: Some(kind) }
    }
}

impl TryFrom<nitrowire::Outcome> for Outcome {
    type Error = ConversionError;

    fn try_from(value: nitrowire::Outcome) -> Result<Self, Self::Error> {
        match value.kind.ok_or(ConversionError::ExptectedSome)? {
            outcome::Kind::Allocation(a) => Ok(Outcome::Allocation(collect(a.items)?)),
            outcome::Kind::Guarantee(g) => Ok(Outcome::Guarantee(Guarantee {
                target_channel_id: fixed::<Hash>(&g.target_channel_id)?,
                destinations: g
                    .destinations
                    .iter()
                    .map(|d| fixed::<Destination>(d))
                    .collect::<Result<_, _>>()?,
            })),
        }
    }
}

impl From<State> for nitrowire::State {
    fn from(value: State) -> Self {
        let State {
            constants,
            variables,
        } = value;
        Self {
            chain_id: constants.chain_id.to_be_bytes().to_vec(),
            participants: constants.participants.into_iter().map(Into::into).collect(),
            app_definition: constants.app_definition.0.to_vec(),
            challenge_duration: constants.challenge_duration,
            channel_nonce: constants.channel_nonce.to_be_bytes().to_vec(),
            turn_num: variables.turn_num,
            is_final: variables.is_final,
            app_data: variables.app_data,
            outcome: Some(variables.outcome.into()),
        }
    }
}

impl TryFrom<nitrowire::State> for State {
    type Error = ConversionError;

    fn try_from(value: nitrowire::State) -> Result<Self, Self::Error> {
        Ok(Self {
            constants: ChannelConstants {
                chain_id: u256(&value.chain_id)?,
                participants: collect(value.participants)?,
                app_definition: fixed::<Address>(&value.app_definition)?,
                challenge_duration: value.challenge_duration,
                channel_nonce: u256(&value.channel_nonce)?,
            },
            variables: StateVariables {
                turn_num: value.turn_num,
                is_final: value.is_final,
                app_data: value.app_data,
                outcome: value
                    .outcome
                    .ok_or(ConversionError::ExptectedSome)?
                    .try_into()?,
            },
        })
    }
}

impl From<SignedState> for nitrowire::SignedState {
    fn from(value: SignedState) -> Self {
        Self {
            state: Some(value.state.into()),
            signatures: value
                .signatures
                .into_iter()
                .map(|s| nitrowire::SignatureEntry {
                    signer: s.signer.0.to_vec(),
                    signature: s.signature.0.to_vec(),
                })
                .collect(),
        }
    }
}

impl TryFrom<nitrowire::SignedState> for SignedState {
    type Error = ConversionError;

    fn try_from(value: nitrowire::SignedState) -> Result<Self, Self::Error> {
        Ok(Self {
            state: value.state.ok_or(ConversionError::ExptectedSome)?.try_into()?,
            signatures: value
                .signatures
                .iter()
                .map(|s| -> Result<SignatureEntry, ConversionError> {
                    Ok(SignatureEntry {
                        signer: fixed::<Address>(&s.signer)?,
                        signature: fixed::<Signature>(&s.signature)?,
                    })
                })
                .collect::<Result<_, _>>()?,
        })
    }
}

impl From<Objective> for nitrowire::Objective {
    fn from(value: Objective) -> Self {
        let kind = match value.kind {
            ObjectiveKind::FundLedger { ledger_channel_id } => {
                objective::Kind::FundLedger(nitrowire::FundLedger {
                    ledger_channel_id: ledger_channel_id.0.to_vec(),
                })
            }
            ObjectiveKind::VirtualFund {
                target_channel_id,
                balances,
            } => objective::Kind::VirtualFund(nitrowire::VirtualFund {
                target_channel_id: target_channel_id.0.to_vec(),
                balances: balances.into_iter().map(Into::into).collect(),
            }),
            ObjectiveKind::FundGuarantor {
                target_channel_id,
                joint_channel_id,
                guarantor_channel_id,
                ledger_channel_id,
            } => objective::Kind::FundGuarantor(nitrowire::FundGuarantor {
                target_channel_id: target_channel_id.0.to_vec(),
                joint_channel_id: joint_channel_id.0.to_vec(),
                guarantor_channel_id: guarantor_channel_id.0.to_vec(),
                ledger_channel_id: ledger_channel_id.0.to_vec(),
            }),
            ObjectiveKind::DefundVirtual {
                target_channel_id,
                joint_channel_id,
            } => objective::Kind::DefundVirtual(nitrowire::DefundVirtual {
                target_channel_id: target_channel_id.0.to_vec(),
                joint_channel_id: joint_channel_id.0.to_vec(),
            }),
        };
        Self {
            participants: value.participants.into_iter().map(Into::into).collect(),
            kind: Some(kind),
        }
    }
}

impl TryFrom<nitrowire::Objective> for Objective {
    type Error = ConversionError;

    fn try_from(value: nitrowire::Objective) -> Result<Self, Self::Error> {
        let kind = match value.kind.ok_or(ConversionError::ExptectedSome)? {
            objective::Kind::FundLedger(o) => ObjectiveKind::FundLedger {
                ledger_channel_id: fixed(&o.ledger_channel_id)?,
            },
            objective::Kind::VirtualFund(o) => ObjectiveKind::VirtualFund {
                target_channel_id: fixed(&o.target_channel_id)?,
                balances: collect(o.balances)?,
            },
            objective::Kind::FundGuarantor(o) => ObjectiveKind::FundGuarantor {
                target_channel_id: fixed(&o.target_channel_id)?,
                joint_channel_id: fixed(&o.joint_channel_id)?,
                guarantor_channel_id: fixed(&o.guarantor_channel_id)?,
                ledger_channel_id: fixed(&o.ledger_channel_id)?,
            },
            objective::Kind::DefundVirtual(o) => ObjectiveKind::DefundVirtual {
                target_channel_id: fixed(&o.target_channel_id)?,
                joint_channel_id: fixed(&o.joint_channel_id)?,
            },
        };
        Ok(Objective::new(collect(value.participants)?, kind))
    }
}

impl From<Message> for nitrowire::Envelope {
    fn from(value: Message) -> Self {
        Self {
            signed_states: value.signed_states.into_iter().map(Into::into).collect(),
            objectives: value.objectives.into_iter().map(Into::into).collect(),
        }
    }
}

impl TryFrom<nitrowire::Envelope> for Message {
    type Error = ConversionError;

    fn try_from(value: nitrowire::Envelope) -> Result<Self, Self::Error> {
        Ok(Self {
            signed_states: collect(value.signed_states)?,
            objectives: collect(value.objectives)?,
        })
    }
}
