//! Integration and adversarial test suite for the Shroud storage engine.
//!
//! The tests drive a [`Blockchain`](shroud_chain::Blockchain) only through
//! its public API, with the in-memory verifier and pool from
//! `shroud_chain::testing`.

pub mod helpers;
