// Shared data model for the hive: instance configuration, on-disk layout,
// events, key material and signed descriptors.
pub mod config;
pub mod descriptor;
pub mod error;
pub mod events;
pub mod keys;
pub mod layout;

pub use config::{Config, InstanceId, Role};
pub use descriptor::Descriptor;
pub use error::{ConfigError, DescriptorError, KeyError};
pub use events::{DeliveryFailure, Event, EventKind, ServiceAddress};
pub use keys::KeyMaterial;
pub use layout::HiveLayout;
