//! API Module
//!
//! HTTP surface of the exchange: the REST handlers and the server that
//! hosts them.

pub mod server;
pub mod rest;

pub use server::*;
pub use rest::*;
