use std::sync::Arc;
use std::time::Duration;
use log::info;
use tokio::spawn;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::device::session::SessionManager;
use crate::device::transport::Transport;
use crate::device::types::DeviceEvent;

/// Ticks the session every `period` and tells observers to re-read the
/// store. The first tick fires immediately. A tick in progress when `cancel`
/// fires runs to completion; `period` must be non-zero.
pub fn polling_task<T: Transport>(
    cancel: CancellationToken,
    session: Arc<SessionManager<T>>,
    events: broadcast::Sender<DeviceEvent>,
    period: Duration,
) -> JoinHandle<()> {
    spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                _ = ticker.tick() => {},
            }

            // not raced against `cancel`, a tick dropped mid-connect would leak the link
            session.tick().await;
            let _ = events.send(DeviceEvent::Refresh);
        }

        info!("Polling stopped");
    })
}
