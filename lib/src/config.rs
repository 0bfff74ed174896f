use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::layout::HiveLayout;

pub const RELAY_BASE_PORT: u16 = 30000;
pub const CLIENT_BASE_PORT: u16 = 40000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Relay,
    Client,
}

impl Role {
    pub fn base_port(self) -> u16 {
        match self {
            Role::Relay => RELAY_BASE_PORT,
            Role::Client => CLIENT_BASE_PORT,
        }
    }

    /// Listen port of instance `index`, or `None` past the end of the port
    /// range.
    pub fn port_for(self, index: u32) -> Option<u16> {
        u16::try_from(index)
            .ok()
            .and_then(|index| self.base_port().checked_add(index))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Relay => write!(f, "relay"),
            Role::Client => write!(f, "client"),
        }
    }
}

/// Identifies one instance inside a hive. Relays and clients are numbered
/// independently, so `relay-1` and `client-1` can coexist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId {
    pub role: Role,
    pub index: u32,
}

impl InstanceId {
    pub fn relay(index: u32) -> Self {
        Self {
            role: Role::Relay,
            index,
        }
    }

    pub fn client(index: u32) -> Self {
        Self {
            role: Role::Client,
            index,
        }
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.role, self.index)
    }
}

/// Settings for a single node instance. Built once, then shared read-only
/// with the instance and its engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub role: Role,
    pub index: u32,
    pub netid: String,
    pub nickname: Option<String>,
    pub listen_address: SocketAddr,
    pub encryption_keyfile: PathBuf,
    pub transport_keyfile: PathBuf,
    pub identity_keyfile: PathBuf,
    /// Where the instance persists its signed self-descriptor.
    pub descriptor_file: PathBuf,
    /// Descriptor files of the instances this one trusts to join the network.
    pub bootstrap: Vec<PathBuf>,
    pub nodedb_dir: PathBuf,
    pub profiles_file: PathBuf,
    pub enable_profiling: bool,
    pub pidfile: PathBuf,
}

impl Config {
    /// Relay `index` under `layout`. Every relay but the first trusts the
    /// first relay's descriptor.
    pub fn relay(layout: &HiveLayout, index: u32, netid: &str) -> Self {
        let dir = layout.relay_dir(index);
        let bootstrap = if index == 1 {
            Vec::new()
        } else {
            vec![layout.seed_descriptor()]
        };
        Self::in_dir(
            &dir,
            Role::Relay,
            index,
            netid,
            Some(format!("Router{}", index)),
            Role::Relay.port_for(index).unwrap_or(0),
            bootstrap,
        )
    }

    /// Client `index` under `layout`. Clients always trust the seed.
    pub fn client(layout: &HiveLayout, index: u32, netid: &str) -> Self {
        let dir = layout.client_dir(index);
        Self::in_dir(
            &dir,
            Role::Client,
            index,
            netid,
            None,
            Role::Client.port_for(index).unwrap_or(0),
            vec![layout.seed_descriptor()],
        )
    }

    fn in_dir(
        dir: &Path,
        role: Role,
        index: u32,
        netid: &str,
        nickname: Option<String>,
        port: u16,
        bootstrap: Vec<PathBuf>,
    ) -> Self {
        Self {
            role,
            index,
            netid: netid.to_string(),
            nickname,
            listen_address: SocketAddr::from(([127, 0, 0, 1], port)),
            encryption_keyfile: dir.join(HiveLayout::ENCRYPTION_KEY),
            transport_keyfile: dir.join(HiveLayout::TRANSPORT_KEY),
            identity_keyfile: dir.join(HiveLayout::IDENTITY_KEY),
            descriptor_file: dir.join(HiveLayout::DESCRIPTOR),
            bootstrap,
            nodedb_dir: dir.join(HiveLayout::NODEDB),
            profiles_file: dir.join(HiveLayout::PROFILES),
            enable_profiling: false,
            pidfile: dir.join(HiveLayout::PIDFILE),
        }
    }

    pub fn id(&self) -> InstanceId {
        InstanceId {
            role: self.role,
            index: self.index,
        }
    }

    pub fn with_profiling(mut self, enabled: bool) -> Self {
        self.enable_profiling = enabled;
        self
    }

    /// Paths this instance writes to. No two instances in a hive may share one.
    pub fn owned_paths(&self) -> [&Path; 7] {
        [
            &self.encryption_keyfile,
            &self.transport_keyfile,
            &self.identity_keyfile,
            &self.descriptor_file,
            &self.nodedb_dir,
            &self.profiles_file,
            &self.pidfile,
        ]
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let anchors = self.bootstrap.iter().map(PathBuf::as_path);
        for path in self.owned_paths().into_iter().chain(anchors) {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::InvalidPath {
                    path: path.to_path_buf(),
                    reason: "path is empty",
                });
            }
            if !path.is_absolute() {
                return Err(ConfigError::InvalidPath {
                    path: path.to_path_buf(),
                    reason: "path must be absolute",
                });
            }
        }
        if self.netid.is_empty() {
            return Err(ConfigError::InvalidNetId);
        }
        if self.role.port_for(self.index).is_none() {
            return Err(ConfigError::IndexOutOfRange(self.id()));
        }
        Ok(())
    }
}
