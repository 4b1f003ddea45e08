//! Core data types: trading enums, connection state, and security codes.
//!
//! Everything that crosses a crate boundary (config → supervisor → sessions →
//! operations) lives here so the md/td crates never depend on each other.

pub mod enums;
pub mod symbol;

pub use enums::*;
pub use symbol::*;
