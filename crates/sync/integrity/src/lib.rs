//! CareLink Sync Integrity
//!
//! Pure domain layer shared by every sync component:
//! - Entry shapes (storage payloads and view records)
//! - Record mappers between the two
//! - Appointment and prescription state machines
//! - Availability normalization and weekday date arithmetic
//! - Payload validation and statistics
//!
//! Nothing here performs I/O.

pub mod availability;
pub mod entries;
pub mod mapper;
pub mod stats;
pub mod status;
pub mod validation;

pub use availability::*;
pub use entries::*;
pub use mapper::*;
pub use stats::*;
pub use status::*;
pub use validation::*;
