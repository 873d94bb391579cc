use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::spawn;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::device::constants::IS_CONNECTED_DEADLINE;
use crate::device::decoder::FrameDecoder;
use crate::device::store::StateStore;
use crate::device::transport::{FrameStream, Transport};
use crate::device::types::{ConnectionState, DeviceEvent};
use crate::error::DeviceError;

/// The handle of the live session, published for the command gateway.
/// Present only while the session manager is `Connected`.
pub(crate) struct Link<H> {
    inner: Arc<RwLock<Option<H>>>,
}

impl<H: Clone> Link<H> {
    pub(crate) fn new() -> Self {
        Link { inner: Arc::new(RwLock::new(None)) }
    }

    pub(crate) fn current(&self) -> Option<H> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set(&self, handle: Option<H>) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = handle;
    }
}

impl<H> Clone for Link<H> {
    fn clone(&self) -> Self {
        Link { inner: self.inner.clone() }
    }
}

/// A live session: the transport handle and the task reading its frames.
struct SessionHandle<H> {
    handle: H,
    receiver: JoinHandle<()>,
    receiver_cancel: CancellationToken,
}

struct SessionSlot<H> {
    active: Option<SessionHandle<H>>,
}

/// Owns the transport lifecycle of one scale.
///
/// `tick` drives the state machine; it is called by the polling scheduler and
/// never fails, connect errors are logged and retried on the next tick.
pub struct SessionManager<T: Transport> {
    address: String,
    transport: Arc<T>,
    decoder: Arc<dyn FrameDecoder>,
    store: StateStore,
    link: Link<T::Handle>,
    events: broadcast::Sender<DeviceEvent>,
    connect_timeout: Duration,
    state: RwLock<ConnectionState>,
    slot: Mutex<SessionSlot<T::Handle>>,
    cancel: CancellationToken,
}

fn read_notifications_task(
    cancel: CancellationToken,
    mut frames: FrameStream,
    decoder: Arc<dyn FrameDecoder>,
    store: StateStore,
    events: broadcast::Sender<DeviceEvent>,
) -> JoinHandle<()> {
    spawn(async move {
        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                frame = frames.next() => {
                    let Some(frame) = frame else {
                        info!("Notification stream closed");
                        break 'mainloop;
                    };

                    match decoder.decode(&frame) {
                        Err(err) => warn!("Dropping frame: {}", err),
                        Ok(delta) => {
                            if delta.is_empty() {
                                continue;
                            }
                            store.merge(&delta);
                            // no observers is fine
                            let _ = events.send(DeviceEvent::StateChanged);
                        }
                    }
                }
            }
        }
    })
}

impl<T: Transport> SessionManager<T> {
    pub(crate) fn new(
        address: String,
        transport: Arc<T>,
        decoder: Arc<dyn FrameDecoder>,
        store: StateStore,
        link: Link<T::Handle>,
        events: broadcast::Sender<DeviceEvent>,
        connect_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        SessionManager {
            address,
            transport,
            decoder,
            store,
            link,
            events,
            connect_timeout,
            state: RwLock::new(ConnectionState::Disconnected),
            slot: Mutex::new(SessionSlot { active: None }),
            cancel,
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    pub async fn tick(&self) {
        let mut slot = match self.slot.try_lock() {
            Ok(slot) => slot,
            Err(_) => {
                debug!("Session busy, skipping tick");
                return;
            },
        };

        if self.cancel.is_cancelled() {
            return;
        }

        if self.connection_state() == ConnectionState::Connected {
            if self.is_alive(&slot).await {
                return;
            }

            warn!("Connection to {} lost", self.address);
            self.end_session(&mut slot).await;
        }

        self.connect(&mut slot).await;
    }

    /// The receive loop is running and the transport still reports the link
    /// up within `IS_CONNECTED_DEADLINE`. Some transports keep the
    /// notification stream open after the device went away.
    async fn is_alive(&self, slot: &SessionSlot<T::Handle>) -> bool {
        let Some(active) = slot.active.as_ref() else {
            return false;
        };
        if active.receiver.is_finished() {
            return false;
        }

        match timeout(IS_CONNECTED_DEADLINE, self.transport.is_connected(&active.handle)).await {
            Err(_) => {
                warn!("Checking for connection status took too long");
                false
            },
            Ok(Err(err)) => {
                warn!("Error checking for connection state: {}", err);
                false
            },
            Ok(Ok(connected)) => connected,
        }
    }

    async fn connect(&self, slot: &mut SessionSlot<T::Handle>) {
        // a tick dropped mid-connect leaves `Connecting` behind; it is treated like `Disconnected`
        self.set_state(ConnectionState::Connecting);

        match self.open_session().await {
            Ok(session) => {
                info!("Scale {} ready", self.address);
                self.link.set(Some(session.handle.clone()));
                slot.active = Some(session);
                self.set_state(ConnectionState::Connected);
                self.store.mark_connected();
                let _ = self.events.send(DeviceEvent::ConnectionChanged(true));
            },
            Err(err) => {
                debug!("Could not connect to scale {}: {}", self.address, err);
                self.set_state(ConnectionState::Disconnected);
            },
        }
    }

    async fn open_session(&self) -> Result<SessionHandle<T::Handle>, DeviceError> {
        let handle = match timeout(self.connect_timeout, self.transport.connect(&self.address)).await {
            Err(_) => return Err(DeviceError::Timeout),
            Ok(result) => result?,
        };

        // shutdown began while connecting, hand the link straight back
        if self.cancel.is_cancelled() {
            self.disconnect_quietly(&handle).await;
            return Err(DeviceError::Cancelled);
        }

        let frames = match self.transport.notifications(&handle).await {
            Ok(frames) => frames,
            Err(err) => {
                self.disconnect_quietly(&handle).await;
                return Err(err);
            },
        };

        let receiver_cancel = self.cancel.child_token();
        let receiver = read_notifications_task(
            receiver_cancel.clone(),
            frames,
            self.decoder.clone(),
            self.store.clone(),
            self.events.clone(),
        );

        Ok(SessionHandle { handle, receiver, receiver_cancel })
    }

    async fn disconnect_quietly(&self, handle: &T::Handle) {
        if let Err(err) = self.transport.disconnect(handle).await {
            debug!("Disconnect failed: {}", err);
        }
    }

    async fn end_session(&self, slot: &mut SessionSlot<T::Handle>) {
        let was_connected = self.connection_state() == ConnectionState::Connected;
        self.link.set(None);
        self.set_state(ConnectionState::Disconnected);

        if let Some(active) = slot.active.take() {
            active.receiver_cancel.cancel();
            if let Err(err) = active.receiver.await {
                warn!("Read notifications task failed: {:?}", err);
            }
            self.disconnect_quietly(&active.handle).await;
        }

        self.store.mark_disconnected();
        if was_connected {
            let _ = self.events.send(DeviceEvent::ConnectionChanged(false));
        }
    }

    /// Stops the receive loop and disconnects. Waits for a tick in progress
    /// to finish. Later ticks are no-ops as long as the cancellation token
    /// passed to `new` stays cancelled.
    pub async fn shutdown(&self) {
        let mut slot = self.slot.lock().await;
        info!("Shutting down session for {}", self.address);
        self.end_session(&mut slot).await;
    }
}
