//! Hive harness
//!
//! Runs many simulated overlay nodes inside one process: registers relays
//! and clients, bootstraps them seed-first over an in-process transport,
//! and exposes all of their events as one stream for tests to consume.

pub mod bootstrap;
pub mod driver;
pub mod error;
pub mod hive;
pub mod settings;
pub mod shutdown;

pub use bootstrap::BootstrapSequencer;
pub use driver::drive;
pub use error::HiveError;
pub use hive::{EngineFactory, Hive, DEFAULT_ENDPOINT};
pub use settings::HiveSettings;
pub use shutdown::ShutdownReport;
