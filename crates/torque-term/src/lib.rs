#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]
//! Terminal output primitives for torque frontends.
//!
//! This crate isolates terminal rendering and spinners so libtorque can
//! remain UI-agnostic.

/// Terminal output abstractions and implementations.
mod output;

pub use output::{Output, OutputError, Quiet, Spinner, Terminal};
