//! VAT settlement: period computation, the closing-balance chain and locks

pub mod closing_balance;
pub mod engine;
pub mod locks;

pub use closing_balance::*;
pub use engine::*;
pub use locks::*;
