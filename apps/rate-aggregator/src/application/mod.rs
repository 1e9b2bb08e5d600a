//! Application Layer - Use cases and port definitions.
//!
//! Services here orchestrate the domain against the driven ports. They do
//! not know which store, transport or wire codec sits behind a port.

pub mod ports;
pub mod services;
