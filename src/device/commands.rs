use std::sync::Arc;
use std::time::Duration;
use log::{debug, warn};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::device::constants::COMMAND_CHARACTERISTIC;
use crate::device::session::Link;
use crate::device::transport::Transport;
use crate::device::types::Command;
use crate::error::CommandError;

/// Serializes command writes against the live session.
///
/// One write is in flight at a time; callers queue on `write_lock`. Nothing
/// is retried, a failed tare must not turn into a double tare.
pub struct CommandGateway<T: Transport> {
    transport: Arc<T>,
    link: Link<T::Handle>,
    write_lock: Mutex<()>,
    write_timeout: Duration,
    cancel: CancellationToken,
}

impl<T: Transport> CommandGateway<T> {
    pub(crate) fn new(transport: Arc<T>, link: Link<T::Handle>, write_timeout: Duration, cancel: CancellationToken) -> Self {
        CommandGateway {
            transport,
            link,
            write_lock: Mutex::new(()),
            write_timeout,
            cancel,
        }
    }

    pub async fn execute(&self, command: Command) -> Result<(), CommandError> {
        if self.cancel.is_cancelled() {
            return Err(CommandError::ShuttingDown);
        }
        command.validate()?;

        if self.link.current().is_none() {
            return Err(CommandError::NotConnected);
        }

        let _guard = tokio::select! {
            _ = self.cancel.cancelled() => return Err(CommandError::ShuttingDown),
            guard = self.write_lock.lock() => guard,
        };

        // the session may have dropped while this call was queued
        let handle = self.link.current().ok_or(CommandError::NotConnected)?;
        let payload = command.encode();
        debug!("Sending {} ({:02x?})", command, payload);

        let write = timeout(self.write_timeout, self.transport.write(&handle, COMMAND_CHARACTERISTIC, &payload));

        tokio::select! {
            _ = self.cancel.cancelled() => Err(CommandError::ShuttingDown),
            result = write => match result {
                Err(_) => {
                    warn!("Sending {} took too long", command);
                    Err(CommandError::Timeout)
                },
                Ok(Err(err)) => {
                    warn!("Failed to send {}: {}", command, err);
                    Err(err.into())
                },
                Ok(Ok(())) => Ok(()),
            }
        }
    }
}
