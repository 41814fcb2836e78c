//! Command surface of the `recall` memory store.
//!
//! Every subcommand prints exactly one JSON object on stdout; logs go to
//! stderr.

pub mod cli;
mod commands;
mod gateways;
pub mod output;

pub use cli::{Cli, Command};
pub use commands::Runtime;
pub use gateways::{GatewayFactory, HttpGateways};
