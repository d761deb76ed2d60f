//! Tax calculation

pub mod vat;

pub use vat::*;
