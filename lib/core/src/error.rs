//! Error handling foundation for siwa.
//!
//! Only the `Result` alias lives here. Each crate owns its domain error
//! enum and reports it through `rootcause::Report`, adding context as the
//! error crosses a layer boundary.

use rootcause::Report;

/// A Result type alias using rootcause's Report for error handling.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;
