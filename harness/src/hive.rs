use hive_lib::{Config, ConfigError, Event, HiveLayout, InstanceId, Role, ServiceAddress};
use hive_node::{EventQueue, NodeEngine, NodeInstance, SimulatedEngine, VirtualTransport};
use log::{debug, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::time::error::Elapsed;

use crate::bootstrap::BootstrapSequencer;
use crate::error::HiveError;
use crate::settings::HiveSettings;
use crate::shutdown::{stop_instances, ShutdownReport};

/// Endpoint name clients use for hive-wide traffic.
pub const DEFAULT_ENDPOINT: &str = "default";

/// Builds the engine each registered instance runs.
pub type EngineFactory = Arc<dyn Fn(&Config) -> Arc<dyn NodeEngine> + Send + Sync>;

/// Owns a set of node instances, the transport they share and the queue
/// their events land in.
pub struct Hive {
    settings: HiveSettings,
    // Registration order; the first relay is the bootstrap seed.
    instances: RwLock<Vec<Arc<NodeInstance>>>,
    transport: VirtualTransport,
    queue: EventQueue,
    engines: EngineFactory,
    shut_down: AtomicBool,
    // Serializes start-all, stop-all and restarts.
    control: tokio::sync::Mutex<()>,
}

impl Default for Hive {
    fn default() -> Self {
        Self::new(HiveSettings::default())
    }
}

impl Hive {
    /// A hive whose instances run the [`SimulatedEngine`].
    pub fn new(settings: HiveSettings) -> Self {
        Self::with_engine_factory(
            settings,
            Arc::new(|_: &Config| Arc::new(SimulatedEngine::new()) as Arc<dyn NodeEngine>),
        )
    }

    pub fn with_engine_factory(settings: HiveSettings, engines: EngineFactory) -> Self {
        Self {
            settings,
            instances: RwLock::new(Vec::new()),
            transport: VirtualTransport::new(),
            queue: EventQueue::new(),
            engines,
            shut_down: AtomicBool::new(false),
            control: tokio::sync::Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &HiveSettings {
        &self.settings
    }

    pub fn transport(&self) -> &VirtualTransport {
        &self.transport
    }

    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    pub fn add_router(&self, config: Config) -> Result<Arc<NodeInstance>, HiveError> {
        self.add_instance(config, Role::Relay)
    }

    pub fn add_client(&self, config: Config) -> Result<Arc<NodeInstance>, HiveError> {
        self.add_instance(config, Role::Client)
    }

    /// Registers relays `1..=relays` and clients `1..=clients` laid out under
    /// `layout`, all on network `netid`.
    pub fn populate(
        &self,
        layout: &HiveLayout,
        relays: u32,
        clients: u32,
        netid: &str,
    ) -> Result<(), HiveError> {
        for index in 1..=relays {
            self.add_router(Config::relay(layout, index, netid))?;
        }
        for index in 1..=clients {
            self.add_client(Config::client(layout, index, netid))?;
        }
        Ok(())
    }

    fn add_instance(&self, config: Config, role: Role) -> Result<Arc<NodeInstance>, HiveError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(HiveError::ShutDown);
        }
        let id = config.id();
        if config.role != role {
            return Err(ConfigError::RoleMismatch {
                instance: id,
                expected: role,
                actual: config.role,
            }
            .into());
        }
        config.validate()?;

        let mut instances = self.instances.write().unwrap_or_else(PoisonError::into_inner);
        if instances.iter().any(|instance| instance.id() == id) {
            return Err(ConfigError::DuplicateIndex(id).into());
        }
        for existing in instances.iter() {
            let taken = existing.config().owned_paths();
            if let Some(path) = config.owned_paths().into_iter().find(|p| taken.contains(p)) {
                return Err(ConfigError::PathCollision {
                    instance: id,
                    owner: existing.id(),
                    path: path.to_path_buf(),
                }
                .into());
            }
        }

        let engine = (self.engines)(&config);
        let instance = Arc::new(NodeInstance::new(
            config,
            engine,
            self.transport.clone(),
            &self.queue,
        ));
        instances.push(instance.clone());
        debug!("[{}] registered", id);
        Ok(instance)
    }

    /// Point-in-time copy of the registered instances, in registration order.
    pub fn snapshot(&self) -> Vec<Arc<NodeInstance>> {
        self.instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn instance(&self, id: InstanceId) -> Option<Arc<NodeInstance>> {
        self.snapshot().into_iter().find(|instance| instance.id() == id)
    }

    pub fn relays(&self) -> Vec<Arc<NodeInstance>> {
        self.snapshot().into_iter().filter(|i| i.is_relay()).collect()
    }

    pub fn clients(&self) -> Vec<Arc<NodeInstance>> {
        self.snapshot().into_iter().filter(|i| i.is_client()).collect()
    }

    pub fn len(&self) -> usize {
        self.instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn running_count(&self) -> usize {
        self.snapshot().iter().filter(|i| i.is_running()).count()
    }

    /// The first registered relay.
    pub fn seed(&self) -> Option<Arc<NodeInstance>> {
        self.snapshot().into_iter().find(|i| i.is_relay())
    }

    /// Applies `f` to every instance. `f` runs on a snapshot taken before the
    /// first call, so it may itself call back into the hive.
    pub fn for_each_router<F>(&self, mut f: F)
    where
        F: FnMut(&Arc<NodeInstance>),
    {
        for instance in self.snapshot() {
            f(&instance);
        }
    }

    /// Starts every registered instance, seed first.
    pub async fn start_all(&self) -> Result<(), HiveError> {
        let _control = self.control.lock().await;
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(HiveError::ShutDown);
        }

        let instances = self.snapshot();
        if instances.is_empty() {
            return Ok(());
        }
        let seed = instances
            .iter()
            .find(|i| i.is_relay())
            .cloned()
            .ok_or(ConfigError::NoSeed)?;
        let anchor = &seed.config().descriptor_file;

        let rest: Vec<Arc<NodeInstance>> = instances
            .iter()
            .filter(|i| i.id() != seed.id())
            .cloned()
            .collect();
        if let Some(orphan) = rest.iter().find(|i| !i.config().bootstrap.contains(anchor)) {
            return Err(ConfigError::MissingAnchor {
                instance: orphan.id(),
                seed: anchor.clone(),
            }
            .into());
        }

        info!(
            "starting hive: seed {}, {} other instance(s)",
            seed.id(),
            rest.len()
        );
        BootstrapSequencer::new(&self.settings)
            .run(&seed, &rest)
            .await?;
        info!("hive running with {} instance(s)", self.running_count());
        Ok(())
    }

    /// Stops every instance, then closes the event queue. Calling it again
    /// does nothing and returns an empty report.
    pub async fn stop_all(&self) -> ShutdownReport {
        let _control = self.control.lock().await;
        if self.shut_down.swap(true, Ordering::SeqCst) {
            debug!("stop-all: already shut down");
            return ShutdownReport::default();
        }

        let report = stop_instances(&self.snapshot(), self.settings.stop_grace).await;
        self.queue.close();
        report
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Stops (if running) and starts one instance again.
    pub async fn restart_instance(&self, id: InstanceId) -> Result<(), HiveError> {
        let _control = self.control.lock().await;
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(HiveError::ShutDown);
        }
        let instance = self.instance(id).ok_or(HiveError::UnknownInstance(id))?;

        if instance.is_running() {
            instance
                .stop()
                .await
                .map_err(|source| HiveError::InstanceStop {
                    instance: id,
                    source,
                })?;
        }
        instance
            .start()
            .await
            .map_err(|source| HiveError::InstanceStart {
                instance: id,
                source,
            })
    }

    /// Has every running client send `payload` from its default endpoint to
    /// `to`. Returns how many sends were accepted.
    pub fn broadcast(&self, to: &ServiceAddress, payload: &[u8]) -> usize {
        let mut sent = 0;
        self.for_each_router(|instance| {
            if instance.is_client() && instance.try_send_packet(DEFAULT_ENDPOINT, to, payload) {
                debug!("[{}] sent {} bytes to {}", instance.id(), payload.len(), to);
                sent += 1;
            }
        });
        sent
    }

    /// Waits for the next event. `None` once the hive is shut down and every
    /// buffered event has been handed out.
    pub async fn next_event(&self) -> Option<Event> {
        self.queue.pop().await
    }

    pub async fn next_event_timeout(&self, timeout: Duration) -> Result<Option<Event>, Elapsed> {
        self.queue.pop_timeout(timeout).await
    }
}
