//! Type system utilities and aliases.
//!
//! ## Modules
//!
//! - [`aliases`]: Type aliases for callbacks and subscription maps.

pub mod aliases;

pub use aliases::*;
