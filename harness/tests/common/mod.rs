#![allow(dead_code)]

use async_trait::async_trait;
use hive_harness::{EngineFactory, Hive, HiveSettings};
use hive_lib::{Config, Event, EventKind, HiveLayout, InstanceId};
use hive_node::{EngineError, EventSink, NodeEngine, Packet, SimulatedEngine};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Short timings so failure paths finish quickly.
pub fn fast_settings() -> HiveSettings {
    HiveSettings {
        bootstrap_grace: Duration::from_millis(500),
        bootstrap_poll: Duration::from_millis(10),
        seed_start_timeout: Duration::from_secs(2),
        start_timeout: Duration::from_secs(2),
        stop_grace: Duration::from_millis(300),
    }
}

pub fn layout(dir: &TempDir) -> HiveLayout {
    HiveLayout::new(dir.path().join("hive"))
}

/// A hive of simulated engines with `relays` relays and `clients` clients.
pub fn simulated_hive(dir: &TempDir, relays: u32, clients: u32) -> Hive {
    let hive = Hive::new(fast_settings());
    hive.populate(&layout(dir), relays, clients, "hive-test")
        .expect("Failed to populate hive");
    hive
}

pub type SeedLog = Arc<Mutex<Vec<(InstanceId, bool)>>>;

/// Wraps the simulated engine with failure behaviour picked per instance.
#[derive(Default)]
pub struct ScriptedEngine {
    pub inner: SimulatedEngine,
    pub fail_start: bool,
    pub hang_start: bool,
    pub hang_stop: bool,
    pub skip_descriptor: bool,
    /// Records, at start, whether the seed descriptor already existed.
    pub seed_seen: Option<(PathBuf, SeedLog)>,
}

#[async_trait]
impl NodeEngine for ScriptedEngine {
    async fn start(&self, config: &Config, events: &EventSink) -> Result<(), EngineError> {
        if let Some((seed, log)) = &self.seed_seen {
            log.lock().expect("seed log").push((config.id(), seed.exists()));
        }
        if self.fail_start {
            return Err("scripted start failure".into());
        }
        if self.hang_start {
            std::future::pending::<()>().await;
        }
        if self.skip_descriptor {
            return Ok(());
        }
        self.inner.start(config, events).await
    }

    async fn stop(&self, config: &Config) -> Result<(), EngineError> {
        if self.hang_stop {
            std::future::pending::<()>().await;
        }
        self.inner.stop(config).await
    }

    fn on_packet(&self, packet: &Packet, events: &EventSink) {
        self.inner.on_packet(packet, events)
    }
}

pub fn scripted<F>(make: F) -> EngineFactory
where
    F: Fn(&Config) -> ScriptedEngine + Send + Sync + 'static,
{
    Arc::new(move |config: &Config| Arc::new(make(config)) as Arc<dyn NodeEngine>)
}

pub fn scripted_hive<F>(dir: &TempDir, relays: u32, clients: u32, make: F) -> Hive
where
    F: Fn(&Config) -> ScriptedEngine + Send + Sync + 'static,
{
    scripted_hive_with(fast_settings(), dir, relays, clients, make)
}

pub fn scripted_hive_with<F>(
    settings: HiveSettings,
    dir: &TempDir,
    relays: u32,
    clients: u32,
    make: F,
) -> Hive
where
    F: Fn(&Config) -> ScriptedEngine + Send + Sync + 'static,
{
    let hive = Hive::with_engine_factory(settings, scripted(make));
    hive.populate(&layout(dir), relays, clients, "hive-test")
        .expect("Failed to populate hive");
    hive
}

/// Pops events until one matches or a second passes without any.
pub async fn wait_for<P>(hive: &Hive, mut matches: P) -> Option<Event>
where
    P: FnMut(&Event) -> bool,
{
    loop {
        match hive.next_event_timeout(Duration::from_secs(1)).await {
            Ok(Some(event)) if matches(&event) => return Some(event),
            Ok(Some(_)) => continue,
            Ok(None) | Err(_) => return None,
        }
    }
}

/// Stops the hive and returns every event left in the stream.
pub async fn shut_down_and_drain(hive: &Hive) -> Vec<Event> {
    hive.stop_all().await;
    let mut events = Vec::new();
    while let Some(event) = hive.next_event().await {
        events.push(event);
    }
    events
}

pub fn count(events: &[Event], name: &str) -> usize {
    events.iter().filter(|e| e.kind.name() == name).count()
}

pub fn is_packet_for(event: &Event, instance: InstanceId) -> bool {
    event.instance == instance && matches!(event.kind, EventKind::PacketReceived { .. })
}
