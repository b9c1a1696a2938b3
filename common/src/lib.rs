//! TokenBank Common Types
//!
//! Shared types used across the TokenBank workspace: account addresses,
//! operation identifiers, integer amount types and the error taxonomy.

pub mod amount;
pub mod error;
pub mod identifiers;

pub use amount::*;
pub use error::*;
pub use identifiers::*;
