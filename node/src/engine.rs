use async_trait::async_trait;
use hive_lib::{Config, Descriptor, EventKind, KeyMaterial, ServiceAddress};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io;
use std::sync::{Mutex, PoisonError};

use crate::event_queue::EventSink;
use crate::transport::Packet;

pub type EngineError = Box<dyn std::error::Error + Send + Sync>;

/// The node implementation a [`crate::NodeInstance`] drives. The instance
/// owns lifecycle, endpoints and transport registration; the engine only
/// brings its own state up and down and observes delivered packets.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NodeEngine: Send + Sync + 'static {
    async fn start(&self, config: &Config, events: &EventSink) -> Result<(), EngineError>;

    async fn stop(&self, config: &Config) -> Result<(), EngineError>;

    fn on_packet(&self, packet: &Packet, events: &EventSink);
}

#[derive(Debug, Default, Clone, Serialize)]
struct PeerProfile {
    packets: u64,
    bytes: u64,
}

/// Default engine: provisions the instance directory, key material and a
/// signed descriptor, and keeps per-peer packet counts.
#[derive(Default)]
pub struct SimulatedEngine {
    profiles: Mutex<BTreeMap<ServiceAddress, PeerProfile>>,
}

impl SimulatedEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NodeEngine for SimulatedEngine {
    async fn start(&self, config: &Config, events: &EventSink) -> Result<(), EngineError> {
        let id = config.id();
        tokio::fs::create_dir_all(&config.nodedb_dir).await?;

        // Key files and descriptors are read and written with std::fs.
        let provision = config.clone();
        let keys = tokio::task::spawn_blocking(move || -> Result<KeyMaterial, EngineError> {
            let keys = KeyMaterial::load_or_generate(
                &provision.identity_keyfile,
                &provision.encryption_keyfile,
                &provision.transport_keyfile,
            )?;
            for anchor in &provision.bootstrap {
                let descriptor = Descriptor::read_verified(anchor, &provision.netid)?;
                let cached = provision
                    .nodedb_dir
                    .join(format!("{}.signed", descriptor.identity));
                descriptor.write(&cached)?;
                log_debug!(provision.id(), "trusting {} from {:?}", descriptor.address, anchor);
            }
            Ok(keys)
        })
        .await??;
        events.emit(EventKind::BootstrapComplete {
            anchors: config.bootstrap.len(),
        });

        let publish = config.clone();
        let keys = tokio::task::spawn_blocking(move || -> Result<KeyMaterial, EngineError> {
            Descriptor::sign(
                &keys,
                publish.nickname.clone(),
                &publish.netid,
                publish.role,
                publish.listen_address,
            )?
            .write(&publish.descriptor_file)?;
            Ok(keys)
        })
        .await??;
        tokio::fs::write(&config.pidfile, format!("{}\n", std::process::id())).await?;

        log_info!(id, "identity {} at {}", keys.identity_hex(), config.listen_address);
        Ok(())
    }

    async fn stop(&self, config: &Config) -> Result<(), EngineError> {
        match tokio::fs::remove_file(&config.pidfile).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        if config.enable_profiling {
            let json = {
                let profiles = self.profiles.lock().unwrap_or_else(PoisonError::into_inner);
                serde_json::to_vec_pretty(&*profiles)?
            };
            tokio::fs::write(&config.profiles_file, json).await?;
        }
        Ok(())
    }

    fn on_packet(&self, packet: &Packet, _events: &EventSink) {
        let mut profiles = self.profiles.lock().unwrap_or_else(PoisonError::into_inner);
        let profile = profiles.entry(packet.from.clone()).or_default();
        profile.packets += 1;
        profile.bytes += packet.payload.len() as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_queue::EventQueue;
    use hive_lib::{HiveLayout, InstanceId};

    #[tokio::test]
    async fn test_seed_provisions_its_directory() {
        let dir = tempfile::tempdir().unwrap();
        let layout = HiveLayout::new(dir.path());
        let config = Config::relay(&layout, 1, "hive");
        let queue = EventQueue::new();
        let engine = SimulatedEngine::new();

        engine
            .start(&config, &queue.sink(config.id()))
            .await
            .expect("Seed should start");

        assert!(config.identity_keyfile.exists());
        assert!(config.encryption_keyfile.exists());
        assert!(config.transport_keyfile.exists());
        assert!(config.nodedb_dir.is_dir());
        assert!(config.pidfile.exists());
        let descriptor = Descriptor::read_verified(&config.descriptor_file, "hive").unwrap();
        assert_eq!(descriptor.nickname.as_deref(), Some("Router1"));

        let event = queue.try_pop().unwrap();
        assert_eq!(event.kind, EventKind::BootstrapComplete { anchors: 0 });

        engine.stop(&config).await.unwrap();
        assert!(!config.pidfile.exists());
    }

    #[tokio::test]
    async fn test_client_caches_seed_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let layout = HiveLayout::new(dir.path());
        let seed = Config::relay(&layout, 1, "hive");
        let client = Config::client(&layout, 1, "hive");
        let queue = EventQueue::new();

        SimulatedEngine::new()
            .start(&seed, &queue.sink(seed.id()))
            .await
            .unwrap();
        SimulatedEngine::new()
            .start(&client, &queue.sink(client.id()))
            .await
            .expect("Client should join through the seed");

        let seed_identity = Descriptor::read(&seed.descriptor_file).unwrap().identity;
        assert!(client
            .nodedb_dir
            .join(format!("{}.signed", seed_identity))
            .exists());
    }

    #[tokio::test]
    async fn test_missing_anchor_fails_start() {
        let dir = tempfile::tempdir().unwrap();
        let layout = HiveLayout::new(dir.path());
        let client = Config::client(&layout, 1, "hive");
        let queue = EventQueue::new();

        let result = SimulatedEngine::new()
            .start(&client, &queue.sink(client.id()))
            .await;
        assert!(result.is_err());
        assert!(!client.descriptor_file.exists());
    }

    #[tokio::test]
    async fn test_profiles_written_on_stop() {
        let dir = tempfile::tempdir().unwrap();
        let layout = HiveLayout::new(dir.path());
        let config = Config::relay(&layout, 1, "hive").with_profiling(true);
        let queue = EventQueue::new();
        let sink = queue.sink(InstanceId::relay(1));
        let engine = SimulatedEngine::new();
        engine.start(&config, &sink).await.unwrap();

        let packet = Packet {
            from: ServiceAddress::from("peer.hive"),
            to: ServiceAddress::from("me.hive"),
            endpoint: "default".to_string(),
            payload: vec![0; 5],
            via: None,
        };
        engine.on_packet(&packet, &sink);
        engine.on_packet(&packet, &sink);
        engine.stop(&config).await.unwrap();

        let profiles: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&config.profiles_file).unwrap()).unwrap();
        assert_eq!(profiles["peer.hive"]["packets"], 2);
        assert_eq!(profiles["peer.hive"]["bytes"], 10);
    }
}
