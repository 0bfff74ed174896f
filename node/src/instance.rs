use hive_lib::{Config, EventKind, InstanceId, Role, ServiceAddress};
use serde::Serialize;
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::engine::NodeEngine;
use crate::error::InstanceError;
use crate::event_queue::{EventQueue, EventSink};
use crate::transport::{Packet, VirtualTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InstanceState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl InstanceState {
    /// Stopped or Failed: nothing of the instance is running.
    pub fn is_terminal(self) -> bool {
        matches!(self, InstanceState::Stopped | InstanceState::Failed)
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

struct Runtime {
    inbox: mpsc::UnboundedSender<Packet>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// One simulated overlay node: an engine plus the lifecycle, endpoints and
/// packet loop the hive needs around it.
pub struct NodeInstance {
    id: InstanceId,
    config: Arc<Config>,
    engine: Arc<dyn NodeEngine>,
    transport: VirtualTransport,
    events: EventSink,
    state: Mutex<InstanceState>,
    endpoints: Mutex<BTreeMap<String, ServiceAddress>>,
    runtime: Mutex<Option<Runtime>>,
    // Serializes start and stop of this instance.
    lifecycle: tokio::sync::Mutex<()>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl NodeInstance {
    pub fn new(
        config: Config,
        engine: Arc<dyn NodeEngine>,
        transport: VirtualTransport,
        queue: &EventQueue,
    ) -> Self {
        let id = config.id();
        Self {
            id,
            config: Arc::new(config),
            engine,
            transport,
            events: queue.sink(id),
            state: Mutex::new(InstanceState::Created),
            endpoints: Mutex::new(BTreeMap::new()),
            runtime: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn role(&self) -> Role {
        self.config.role
    }

    pub fn is_relay(&self) -> bool {
        self.role() == Role::Relay
    }

    pub fn is_client(&self) -> bool {
        self.role() == Role::Client
    }

    pub fn state(&self) -> InstanceState {
        *lock(&self.state)
    }

    pub fn is_running(&self) -> bool {
        self.state() == InstanceState::Running
    }

    fn set_state(&self, state: InstanceState) {
        let mut current = lock(&self.state);
        log_debug!(self.id, "{} -> {}", *current, state);
        *current = state;
    }

    pub async fn start(&self) -> Result<(), InstanceError> {
        let _lifecycle = self.lifecycle.lock().await;
        match self.state() {
            InstanceState::Created | InstanceState::Stopped | InstanceState::Failed => {}
            InstanceState::Starting | InstanceState::Running | InstanceState::Stopping => {
                return Err(InstanceError::AlreadyRunning(self.id));
            }
        }
        // Leftovers of an abandoned run.
        self.teardown();

        self.set_state(InstanceState::Starting);
        if let Err(source) = self.engine.start(&self.config, &self.events).await {
            log_error!(self.id, "failed to start: {}", source);
            self.set_state(InstanceState::Failed);
            self.events.emit(EventKind::Error {
                message: format!("start failed: {}", source),
            });
            return Err(InstanceError::Engine {
                instance: self.id,
                source,
            });
        }

        let (inbox, receiver) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(Self::packet_loop(
            self.id,
            receiver,
            cancel.clone(),
            self.engine.clone(),
            self.events.clone(),
        ));
        *lock(&self.runtime) = Some(Runtime {
            inbox,
            cancel,
            task,
        });
        if self.is_relay() {
            self.transport.register_relay(self.events.clone());
        }

        self.set_state(InstanceState::Running);
        self.events.emit(EventKind::Started);
        log_info!(self.id, "running on {}", self.config.listen_address);
        Ok(())
    }

    async fn packet_loop(
        id: InstanceId,
        mut receiver: mpsc::UnboundedReceiver<Packet>,
        cancel: CancellationToken,
        engine: Arc<dyn NodeEngine>,
        events: EventSink,
    ) {
        let deliver = |packet: Packet| {
            engine.on_packet(&packet, &events);
            events.emit(EventKind::PacketReceived {
                endpoint: packet.endpoint,
                from: packet.from,
                payload: packet.payload,
            });
        };
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                packet = receiver.recv() => match packet {
                    Some(packet) => deliver(packet),
                    None => break,
                },
            }
        }
        // Packets accepted before the endpoints were released still land.
        let mut drained = 0;
        while let Ok(packet) = receiver.try_recv() {
            deliver(packet);
            drained += 1;
        }
        log_debug!(id, "packet loop finished, {} drained", drained);
    }

    pub async fn stop(&self) -> Result<(), InstanceError> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.state() != InstanceState::Running {
            return Err(InstanceError::NotRunning(self.id));
        }
        self.set_state(InstanceState::Stopping);

        let released = self.release_endpoints();
        let runtime = lock(&self.runtime).take();
        if let Some(runtime) = runtime {
            runtime.cancel.cancel();
            if let Err(e) = runtime.task.await {
                log_warn!(self.id, "packet loop ended abnormally: {}", e);
            }
        }

        match self.engine.stop(&self.config).await {
            Ok(()) => {
                self.set_state(InstanceState::Stopped);
                self.events.emit(EventKind::Stopped);
                log_info!(self.id, "stopped, released {} endpoint(s)", released);
                Ok(())
            }
            Err(source) => {
                log_error!(self.id, "failed to stop cleanly: {}", source);
                self.set_state(InstanceState::Failed);
                self.events.emit(EventKind::Error {
                    message: format!("stop failed: {}", source),
                });
                Err(InstanceError::Engine {
                    instance: self.id,
                    source,
                })
            }
        }
    }

    /// Gives up on an instance that did not stop in time: releases its
    /// addresses, aborts its packet loop and marks it Failed.
    pub fn abandon(&self) {
        log_warn!(self.id, "abandoning in state {}", self.state());
        // Failed first, so no endpoint can be created after the release.
        self.set_state(InstanceState::Failed);
        self.teardown();
    }

    /// Deregisters every address of this instance. Holds the endpoint map
    /// throughout so a concurrent `create_endpoint` either lands before the
    /// release or sees the instance no longer running.
    fn release_endpoints(&self) -> usize {
        let mut endpoints = lock(&self.endpoints);
        let released = self.transport.deregister_owner(self.id);
        endpoints.clear();
        released
    }

    fn teardown(&self) {
        self.release_endpoints();
        if let Some(runtime) = lock(&self.runtime).take() {
            runtime.cancel.cancel();
            runtime.task.abort();
        }
    }

    /// Creates a named service endpoint and registers its address with the
    /// transport. Relays expose no endpoints.
    pub fn create_endpoint(&self, name: &str) -> Result<ServiceAddress, InstanceError> {
        if self.is_relay() {
            return Err(InstanceError::RelayHasNoEndpoint(self.id));
        }
        if !self.is_running() {
            return Err(InstanceError::NotRunning(self.id));
        }
        let inbox = lock(&self.runtime)
            .as_ref()
            .map(|runtime| runtime.inbox.clone())
            .ok_or(InstanceError::NotRunning(self.id))?;

        let mut endpoints = lock(&self.endpoints);
        if !self.is_running() {
            return Err(InstanceError::NotRunning(self.id));
        }
        if endpoints.contains_key(name) {
            return Err(InstanceError::DuplicateEndpoint {
                instance: self.id,
                name: name.to_string(),
            });
        }
        let address = self.endpoint_address(name);
        self.transport
            .register_endpoint(address.clone(), self.id, name, inbox)?;
        endpoints.insert(name.to_string(), address.clone());
        drop(endpoints);

        self.events.emit(EventKind::EndpointReady {
            name: name.to_string(),
            address: address.clone(),
        });
        log_info!(self.id, "endpoint {} ready at {}", name, address);
        Ok(address)
    }

    fn endpoint_address(&self, name: &str) -> ServiceAddress {
        let mut hasher = Sha1::new();
        hasher.update(self.config.netid.as_bytes());
        hasher.update(self.id.to_string().as_bytes());
        hasher.update(name.as_bytes());
        ServiceAddress::from_digest(&hasher.finalize())
    }

    pub fn endpoint(&self, name: &str) -> Option<ServiceAddress> {
        lock(&self.endpoints).get(name).cloned()
    }

    pub fn endpoints(&self) -> Vec<(String, ServiceAddress)> {
        lock(&self.endpoints)
            .iter()
            .map(|(name, address)| (name.clone(), address.clone()))
            .collect()
    }

    /// Sends `payload` from the local endpoint `endpoint` to `to`. Returns
    /// false when the instance is not running, the local endpoint does not
    /// exist, or the transport could not deliver.
    pub fn try_send_packet(&self, endpoint: &str, to: &ServiceAddress, payload: &[u8]) -> bool {
        if !self.is_running() {
            log_debug!(self.id, "not running, cannot send to {}", to);
            return false;
        }
        let Some(from) = self.endpoint(endpoint) else {
            log_warn!(self.id, "no endpoint named {}", endpoint);
            return false;
        };
        self.transport
            .send(&from, to, payload.to_vec(), &self.events)
            .is_ok()
    }
}

impl fmt::Debug for NodeInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeInstance")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
