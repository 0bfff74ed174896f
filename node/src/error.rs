use hive_lib::{InstanceId, ServiceAddress};
use thiserror::Error;

use crate::engine::EngineError;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("address {0} is already registered")]
    AddressInUse(ServiceAddress),
}

#[derive(Debug, Error)]
pub enum InstanceError {
    #[error("{0} is already running")]
    AlreadyRunning(InstanceId),

    #[error("{0} is not running")]
    NotRunning(InstanceId),

    #[error("{0} is a relay and exposes no service endpoint")]
    RelayHasNoEndpoint(InstanceId),

    #[error("{instance} already has an endpoint named {name:?}")]
    DuplicateEndpoint { instance: InstanceId, name: String },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("engine of {instance} failed: {source}")]
    Engine {
        instance: InstanceId,
        #[source]
        source: EngineError,
    },
}
