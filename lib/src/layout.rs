use std::path::{Path, PathBuf};

/// On-disk layout of one hive run. Every instance gets its own directory so
/// key material, descriptors and caches never collide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HiveLayout {
    root: PathBuf,
}

impl HiveLayout {
    pub const ENCRYPTION_KEY: &'static str = "encryption.key";
    pub const TRANSPORT_KEY: &'static str = "transport.key";
    pub const IDENTITY_KEY: &'static str = "identity.key";
    pub const DESCRIPTOR: &'static str = "rc.signed";
    pub const NODEDB: &'static str = "netdb";
    pub const PROFILES: &'static str = "profiles.dat";
    pub const PIDFILE: &'static str = "hive.pid";

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn relay_dir(&self, index: u32) -> PathBuf {
        self.root.join("routers").join(index.to_string())
    }

    pub fn client_dir(&self, index: u32) -> PathBuf {
        self.root.join("clients").join(index.to_string())
    }

    /// Descriptor of relay 1, the bootstrap seed every other instance trusts.
    pub fn seed_descriptor(&self) -> PathBuf {
        self.relay_dir(1).join(Self::DESCRIPTOR)
    }
}
