//! Channel data model: constants, state variables, outcomes and the per
//! channel store entry deciding which state is supported.

mod entry;
mod outcome;
mod state;

pub use entry::*;
pub use outcome::*;
pub use state::*;
