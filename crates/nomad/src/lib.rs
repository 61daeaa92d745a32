//! CLI-facing layer: file enumeration, logging setup, and the command
//! surface built on `nomad-core` and `nomad-db`.

pub mod cli;
pub mod fsops;
pub mod logging;
