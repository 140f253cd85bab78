//! Agent runtime: the life loop and the facade that drives it
//!
//! Tasks are taken from the backing file one at a time, planned step by step,
//! retried on failure, and recorded back into memory.

mod life_loop;
mod runtime;
mod state;

pub use life_loop::ProgressFn;
pub use runtime::{Agent, Ports, RunMode};
pub use state::StopHandle;
