//! CareLink Shared Utilities
//!
//! Common functionality for the CareLink sync crates:
//! - Failure taxonomy surfaced by every remote operation
//! - Collection identities, record ids and relation expansions
//! - Best-effort row access for the storage shape
//! - Logging setup

pub mod collection;
pub mod error;
pub mod logging;
pub mod row;

pub use collection::*;
pub use error::*;
pub use row::*;
