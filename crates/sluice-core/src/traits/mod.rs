//! Interfaces the dispatch core consumes.

mod change_feed;
mod delivery_log;
mod listener_store;

pub use change_feed::*;
pub use delivery_log::*;
pub use listener_store::*;
