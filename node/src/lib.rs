//! Hive node library
//!
//! The building blocks of a hive: the per-instance wrapper around a node
//! engine, the in-process transport the instances talk over, and the event
//! queue all of them report into.

#[macro_use]
mod macros;

pub mod engine;
pub mod error;
pub mod event_queue;
pub mod instance;
pub mod transport;

// Re-export main types for public API
pub use engine::{EngineError, NodeEngine, SimulatedEngine};
pub use error::{InstanceError, TransportError};
pub use event_queue::{EventQueue, EventSink, QueueClosed};
pub use instance::{InstanceState, NodeInstance};
pub use transport::{Packet, VirtualTransport, MAX_PAYLOAD_SIZE};

// Re-export from lib crate for convenience
pub use hive_lib::{Config, Event, EventKind, InstanceId, Role, ServiceAddress};
