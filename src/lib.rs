//! expod library
//!
//! The `expod start` command: flag parsing and validation in [`cli`], the
//! run loop in [`start`]. Dev server logic lives in `expod-app`.

pub mod cli;
pub mod start;

pub use cli::{Cli, Command, StartArgs, StartPlan};
