//! Domain layer of the nomad migration engine: content hashing, the SQL
//! segmenter and hazard detector, the migration-file parser, the planner,
//! the shared error taxonomy, and the configuration record. No I/O beyond
//! reading a config file happens in this crate; everything that talks to a
//! database lives in `nomad-db`.

pub mod checksum;
pub mod config;
pub mod error;
pub mod hazard;
pub mod model;
pub mod parse;
pub mod plan;
pub mod segment;

pub use error::{NomadError, Result};
