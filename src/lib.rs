#[macro_use]
extern crate bitflags;

/// Byte pipes to the printer: USB bulk transfers and a scripted stand-in for tests.
pub mod transport;
pub use transport::Error as TransportError;

/// Read print jobs from the spool, in length-declared and command-tagged form.
pub mod spool;
pub use spool::Error as FormatError;

/// The family-independent model of a job: header fields and image planes.
pub mod job;

/// Canonical device status and consumables.
pub mod status;

/// Per-family wire formats behind a common trait.
pub mod family;

/// Jobs resident in the printer's memory banks.
pub mod queue;
pub use queue::Error as QueueError;

/// Submit jobs and follow them to completion.
pub mod engine;
pub use engine::Error as EngineError;

/// Map every failure to what the spooler should do next.
pub mod policy;

/// Messages, attributes and exit codes of the CUPS backend interface.
pub mod cups;

/// Settings from the backend environment.
pub mod config;
pub use config::Error as ConfigError;
