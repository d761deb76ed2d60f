//! Engine facade tying the stock ledger, settlement and treasury together

pub mod core;

pub use self::core::*;
