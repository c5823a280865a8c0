//! Test sequencing engine
//!
//! [`Sequencer`] executes the selected tests of a [`TestStore`] snapshot
//! under two nested repeat loops and reports every transition as a
//! [`Progress`] event.
//!
//! [`TestStore`]: crate::definition::TestStore

mod progress;
mod sequencer;
mod state;

pub use progress::{Counters, Progress, ProgressKind, RunPhase};
pub use sequencer::{Sequencer, SequencerOptions};
pub use state::{RunRequest, RunTicket, Selection};
