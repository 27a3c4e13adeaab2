//! API handlers for the loan ledger

mod health;
mod loan;

pub use health::{health_check, root};
pub use loan::*;
