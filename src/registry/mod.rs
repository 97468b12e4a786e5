//! Code Registry Module
//!
//! Time-bounded in-memory directory of rendezvous codes, plus the background
//! sweeper that evicts expired registrations.

pub mod code_registry;
pub mod sweeper;

pub use code_registry::*;
pub use sweeper::*;
