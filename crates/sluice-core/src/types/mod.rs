//! Core types for sluice.

mod change;
mod listener;
mod outcome;

pub use change::*;
pub use listener::*;
pub use outcome::*;
