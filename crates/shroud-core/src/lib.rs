//! # shroud-core
//! Protocol types, consensus arithmetic and collaborator traits for Shroud.

pub mod constants;
pub mod difficulty;
pub mod error;
pub mod genesis;
pub mod merkle;
pub mod reward;
pub mod traits;
pub mod types;
pub mod util;
