use hive_lib::InstanceId;
use hive_node::{InstanceState, NodeInstance};
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// Outcome of stopping a set of instances.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Instances that reached Stopped.
    pub stopped: Vec<InstanceId>,
    /// Instances that failed to stop or ran out of time and were marked Failed.
    pub abandoned: Vec<InstanceId>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.abandoned.is_empty()
    }
}

enum StopOutcome {
    Stopped,
    Abandoned,
    Skipped,
}

/// Stops every live instance concurrently. Each gets `grace` to stop; one
/// that errors or runs out of time is abandoned so it cannot hold up the rest.
pub(crate) async fn stop_instances(instances: &[Arc<NodeInstance>], grace: Duration) -> ShutdownReport {
    let outcomes = futures::future::join_all(
        instances
            .iter()
            .map(|instance| stop_one(instance, grace)),
    )
    .await;

    let mut report = ShutdownReport::default();
    for (instance, outcome) in instances.iter().zip(outcomes) {
        match outcome {
            StopOutcome::Stopped => report.stopped.push(instance.id()),
            StopOutcome::Abandoned => report.abandoned.push(instance.id()),
            StopOutcome::Skipped => {}
        }
    }
    info!(
        "stopped {} instance(s), abandoned {}",
        report.stopped.len(),
        report.abandoned.len()
    );
    report
}

async fn stop_one(instance: &NodeInstance, grace: Duration) -> StopOutcome {
    match instance.state() {
        InstanceState::Created | InstanceState::Stopped | InstanceState::Failed => {
            return StopOutcome::Skipped;
        }
        InstanceState::Starting | InstanceState::Running | InstanceState::Stopping => {}
    }

    match timeout(grace, instance.stop()).await {
        Ok(Ok(())) => StopOutcome::Stopped,
        Ok(Err(e)) => {
            warn!("[{}] stop failed, abandoning: {}", instance.id(), e);
            instance.abandon();
            StopOutcome::Abandoned
        }
        Err(_) => {
            warn!("[{}] did not stop within {:?}, abandoning", instance.id(), grace);
            instance.abandon();
            StopOutcome::Abandoned
        }
    }
}
