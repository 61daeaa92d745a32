//! Database-facing layer of the nomad migration engine: the `Driver`/
//! `Connection` abstraction, its three dialect implementations, the
//! migrator orchestration, and the NDJSON event vocabulary. Everything in
//! `nomad-core` is pure; everything that opens a socket lives here.

pub mod driver;
pub mod events;
pub mod migrator;

pub use driver::{Capabilities, Connection, Driver};
pub use events::{Event, EventSink, NdjsonSink, NullSink};
pub use migrator::Migrator;
