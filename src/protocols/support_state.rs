use super::{Context, Event, FailureReason, Machine, Status};
use crate::{
    canonical::types::Hash, chain::Chain, channel::StateVariables, wire::MessageBus,
};

/// Signs `variables` (unless we already did), sends it to the other
/// participants and waits until it is the supported state of the channel.
#[derive(Debug, Clone)]
pub struct SupportState {
    channel_id: Hash,
    variables: StateVariables,
}

impl SupportState {
    pub fn new(channel_id: Hash, variables: StateVariables) -> Self {
        Self {
            channel_id,
            variables,
        }
    }
}

impl Machine for SupportState {
    fn advance<B: MessageBus, C: Chain>(
        &mut self,
        ctx: &mut Context<'_, B, C>,
        _event: &Event,
    ) -> Result<Status, FailureReason> {
        let entry = ctx.entry(self.channel_id)?;
        if entry.supported() == Some(&self.variables) {
            return Ok(Status::Success);
        }
        if let Some(supported) = entry.supported() {
            if supported.turn_num > self.variables.turn_num {
                // Moved past the state we wanted, it can never be supported.
                return Err(FailureReason::UserRejected);
            }
        }

        if !entry.is_signed_by_me(&self.variables) {
            let signed = ctx
                .store
                .sign_and_add(self.channel_id, self.variables.clone())?;
            ctx.send_states(self.channel_id, alloc::vec![signed])?;
        }

        let entry = ctx.entry(self.channel_id)?;
        if entry.supported() == Some(&self.variables) {
            Ok(Status::Success)
        } else {
            Ok(Status::InProgress)
        }
    }
}
