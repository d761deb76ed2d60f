//! Stock ledger: movements and on-hand derivation

pub mod ledger;
pub mod movement;

pub use ledger::*;
pub use movement::*;
