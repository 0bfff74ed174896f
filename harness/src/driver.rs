use hive_lib::Event;
use log::info;
use tokio_util::sync::CancellationToken;

use crate::hive::Hive;
use crate::shutdown::ShutdownReport;

/// Feeds hive events to `on_event` until `cancel` fires (or the queue ends),
/// then stops the hive and hands over the remaining events until
/// end-of-stream.
pub async fn drive<F>(hive: &Hive, cancel: CancellationToken, mut on_event: F) -> ShutdownReport
where
    F: FnMut(&Event),
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("cancellation requested, stopping all instances");
                break;
            }
            event = hive.next_event() => match event {
                Some(event) => on_event(&event),
                None => break,
            },
        }
    }

    let report = hive.stop_all().await;
    while let Some(event) = hive.next_event().await {
        on_event(&event);
    }
    report
}
