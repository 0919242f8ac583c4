//! Shared foundation types for the siwa workspace.
//!
//! This crate holds the pieces every other crate leans on: the rootcause
//! `Result` alias, the clock abstraction used for token lifetimes, and the
//! internal user identifier.

pub mod clock;
pub mod error;
pub mod id;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::Result;
pub use id::{ParseIdError, UserId};
