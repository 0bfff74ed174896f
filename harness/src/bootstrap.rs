use hive_lib::{Config, Descriptor};
use hive_node::{InstanceState, NodeInstance};
use log::{debug, info, warn};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};

use crate::error::HiveError;
use crate::settings::HiveSettings;
use crate::shutdown::stop_instances;

/// Two-phase startup. Phase 1 starts the seed alone and waits for its
/// signed descriptor; phase 2 starts everyone else, who join through that
/// descriptor. Any failure stops whatever this run started.
pub struct BootstrapSequencer {
    settings: HiveSettings,
}

impl BootstrapSequencer {
    pub fn new(settings: &HiveSettings) -> Self {
        Self {
            settings: settings.clone(),
        }
    }

    pub async fn run(
        &self,
        seed: &Arc<NodeInstance>,
        rest: &[Arc<NodeInstance>],
    ) -> Result<(), HiveError> {
        let mut started = Vec::new();

        if is_startable(seed) {
            // A descriptor left behind by an earlier run must not satisfy
            // the wait below.
            if let Err(e) = remove_stale_descriptor(seed.config()).await {
                return Err(HiveError::BootstrapFailed {
                    seed: seed.id(),
                    path: seed.config().descriptor_file.clone(),
                    waited: Duration::ZERO,
                    reason: format!("cannot remove stale descriptor: {}", e),
                });
            }
            info!("[{}] phase 1: starting bootstrap seed", seed.id());
            match timeout(self.settings.seed_start_timeout, seed.start()).await {
                Ok(Ok(())) => started.push(seed.clone()),
                Ok(Err(source)) => {
                    return Err(HiveError::InstanceStart {
                        instance: seed.id(),
                        source,
                    });
                }
                Err(_) => {
                    seed.abandon();
                    return Err(HiveError::BootstrapTimeout {
                        seed: seed.id(),
                        waited: self.settings.seed_start_timeout,
                    });
                }
            }
        }

        if let Err(reason) = self.wait_for_descriptor(seed.config()).await {
            warn!("[{}] no descriptor, aborting bootstrap: {}", seed.id(), reason);
            stop_instances(&started, self.settings.stop_grace).await;
            return Err(HiveError::BootstrapFailed {
                seed: seed.id(),
                path: seed.config().descriptor_file.clone(),
                waited: self.settings.bootstrap_grace,
                reason,
            });
        }

        let pending: Vec<Arc<NodeInstance>> =
            rest.iter().filter(|i| is_startable(i)).cloned().collect();
        info!("phase 2: starting {} instance(s)", pending.len());
        let results =
            futures::future::join_all(pending.iter().map(|instance| self.start_one(instance)))
                .await;

        let mut failure = None;
        for (instance, result) in pending.iter().zip(results) {
            match result {
                Ok(()) => started.push(instance.clone()),
                Err(e) if failure.is_none() => failure = Some(e),
                Err(e) => warn!("[{}] {}", instance.id(), e),
            }
        }

        if let Some(e) = failure {
            warn!("start-all failed, rolling back {} instance(s)", started.len());
            stop_instances(&started, self.settings.stop_grace).await;
            return Err(e);
        }
        Ok(())
    }

    async fn start_one(&self, instance: &NodeInstance) -> Result<(), HiveError> {
        match timeout(self.settings.start_timeout, instance.start()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(HiveError::InstanceStart {
                instance: instance.id(),
                source,
            }),
            Err(_) => {
                instance.abandon();
                Err(HiveError::StartTimeout {
                    instance: instance.id(),
                    waited: self.settings.start_timeout,
                })
            }
        }
    }

    /// Polls until the seed's descriptor exists and verifies, or the grace
    /// period ends. Returns the last read error on expiry.
    async fn wait_for_descriptor(&self, seed: &Config) -> Result<(), String> {
        let deadline = Instant::now() + self.settings.bootstrap_grace;
        loop {
            let path = seed.descriptor_file.clone();
            let netid = seed.netid.clone();
            let read = tokio::task::spawn_blocking(move || Descriptor::read_verified(&path, &netid))
                .await
                .map_err(|e| e.to_string())?;
            match read {
                Ok(descriptor) => {
                    debug!(
                        "[{}] descriptor ready, identity {}",
                        seed.id(),
                        descriptor.identity
                    );
                    return Ok(());
                }
                Err(e) if Instant::now() >= deadline => return Err(e.to_string()),
                Err(_) => sleep(self.settings.bootstrap_poll).await,
            }
        }
    }
}

async fn remove_stale_descriptor(seed: &Config) -> io::Result<()> {
    match tokio::fs::remove_file(&seed.descriptor_file).await {
        Ok(()) => {
            debug!("[{}] removed descriptor of a previous run", seed.id());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn is_startable(instance: &NodeInstance) -> bool {
    matches!(
        instance.state(),
        InstanceState::Created | InstanceState::Stopped | InstanceState::Failed
    )
}
