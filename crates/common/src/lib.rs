//! Shared types for the funds-transfer workspace.

pub mod types;

pub use types::{AccountNumber, Money, TransferId};
