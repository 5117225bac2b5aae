//! PLC wire protocol stack
//!
//! Layered bottom-up: [`codec`] builds and parses frames, [`transport`]
//! runs one-shot TCP exchanges, [`registers`] exposes the read/write
//! operations the rest of the service uses. [`simulator`] is a
//! protocol-faithful stand-in for the real device used by tests.

pub mod codec;
pub mod registers;
pub mod simulator;
pub mod transport;

pub use registers::{RegisterService, DEFAULT_SENSOR_COUNT, SENSOR_BLOCK_ADDRESS};
pub use transport::{ConnectionStatus, PlcTransport};
