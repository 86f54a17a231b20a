//! # pulse-cli — Pulse Command-Line Interface
//!
//! ## Subcommands
//!
//! - `validate`: engine and auto-reason configuration checks
//! - `simulate`: scheduler rounds over a scenario, against the in-memory
//!   store and a simulated clock
//!
//! ## Crate Policy
//!
//! - Argument parsing lives in `main.rs`; handlers return an exit code.
//! - Handlers delegate to the engine crates. No engine logic here.
//! - Reports go to stdout, logs to stderr.

pub mod scenario;
pub mod simulate;
pub mod validate;
