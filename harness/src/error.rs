use hive_lib::{ConfigError, InstanceId};
use hive_node::InstanceError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HiveError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("bootstrap seed {seed} did not start within {waited:?}")]
    BootstrapTimeout { seed: InstanceId, waited: Duration },

    #[error("bootstrap seed {seed} produced no usable descriptor at {path:?} within {waited:?}: {reason}")]
    BootstrapFailed {
        seed: InstanceId,
        path: PathBuf,
        waited: Duration,
        reason: String,
    },

    #[error("failed to start {instance}: {source}")]
    InstanceStart {
        instance: InstanceId,
        #[source]
        source: InstanceError,
    },

    #[error("{instance} did not start within {waited:?}")]
    StartTimeout {
        instance: InstanceId,
        waited: Duration,
    },

    #[error("failed to stop {instance}: {source}")]
    InstanceStop {
        instance: InstanceId,
        #[source]
        source: InstanceError,
    },

    #[error("no instance {0} in this hive")]
    UnknownInstance(InstanceId),

    #[error("hive has been shut down")]
    ShutDown,
}
