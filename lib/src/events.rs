use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

use crate::config::InstanceId;

/// Address of a service endpoint inside the hive, e.g. `3f9a...c1.hive`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceAddress(String);

impl ServiceAddress {
    pub const SUFFIX: &'static str = ".hive";

    /// Builds an address from a digest, hex encoded and suffixed.
    pub fn from_digest(digest: &[u8]) -> Self {
        Self(format!("{}{}", hex::encode(digest), Self::SUFFIX))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServiceAddress {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryFailure {
    UnknownDestination,
    DestinationDown,
    DestinationClosed,
    PayloadTooLarge,
}

impl fmt::Display for DeliveryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            DeliveryFailure::UnknownDestination => "unknown destination",
            DeliveryFailure::DestinationDown => "destination down",
            DeliveryFailure::DestinationClosed => "destination closed",
            DeliveryFailure::PayloadTooLarge => "payload too large",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    // The instance reached Running
    Started,
    // The instance verified its trust anchors and joined the network
    BootstrapComplete {
        anchors: usize,
    },
    // A service endpoint was created and is reachable
    EndpointReady {
        name: String,
        address: ServiceAddress,
    },
    // A packet arrived at one of the instance's endpoints
    PacketReceived {
        endpoint: String,
        from: ServiceAddress,
        payload: Vec<u8>,
    },
    // A packet crossed this relay on its way to the destination
    HopTraversed {
        from: ServiceAddress,
        to: ServiceAddress,
        bytes: usize,
    },
    // A packet sent by this instance could not be delivered
    DeliveryFailed {
        to: ServiceAddress,
        bytes: usize,
        reason: DeliveryFailure,
    },
    // Non-fatal failure inside the instance
    Error {
        message: String,
    },
    // The instance reached Stopped
    Stopped,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Started => "Started",
            EventKind::BootstrapComplete { .. } => "BootstrapComplete",
            EventKind::EndpointReady { .. } => "EndpointReady",
            EventKind::PacketReceived { .. } => "PacketReceived",
            EventKind::HopTraversed { .. } => "HopTraversed",
            EventKind::DeliveryFailed { .. } => "DeliveryFailed",
            EventKind::Error { .. } => "Error",
            EventKind::Stopped => "Stopped",
        }
    }
}

/// One entry of the hive-wide event stream.
///
/// `sequence` counts up from zero per producing instance, without gaps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub instance: InstanceId,
    pub sequence: u64,
    #[serde(with = "humantime_serde")]
    pub triggered: SystemTime,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Event: {} -- from {} #{}",
            self.kind.name(),
            self.instance,
            self.sequence
        )
    }
}
