//! Frontend components
//!
//! Configuration loading and the command-line interface.

pub mod cli;
pub mod config;

pub use cli::main as cli_main;
pub use config::Config;
