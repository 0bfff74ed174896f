use std::path::PathBuf;

use thiserror::Error;

use crate::config::{InstanceId, Role};

/// Problems with an instance's configuration, detected at registration or
/// right before start-all.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("instance {0} is already registered")]
    DuplicateIndex(InstanceId),

    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: PathBuf, reason: &'static str },

    #[error("path {path:?} of {instance} is already used by {owner}")]
    PathCollision {
        instance: InstanceId,
        owner: InstanceId,
        path: PathBuf,
    },

    #[error("config for {instance} has role {actual}, expected {expected}")]
    RoleMismatch {
        instance: InstanceId,
        expected: Role,
        actual: Role,
    },

    #[error("{0} has no listen port: index past the end of the port range")]
    IndexOutOfRange(InstanceId),

    #[error("network id must not be empty")]
    InvalidNetId,

    #[error("hive has no relay to act as bootstrap seed")]
    NoSeed,

    #[error("{instance} does not trust the seed descriptor {seed:?}")]
    MissingAnchor { instance: InstanceId, seed: PathBuf },
}

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("descriptor I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed descriptor: {0}")]
    Malformed(String),

    #[error("descriptor signature does not verify")]
    BadSignature,

    #[error("descriptor belongs to network {found:?}, expected {expected:?}")]
    NetworkMismatch { expected: String, found: String },
}

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("key file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed key file {path:?}: {reason}")]
    Malformed { path: PathBuf, reason: String },
}
