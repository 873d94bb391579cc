use std::sync::{Arc, PoisonError};
use log::{info, warn};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::types::ScaleConfig;
use crate::device::commands::CommandGateway;
use crate::device::constants::EVENT_CHANNEL_CAPACITY;
use crate::device::decoder::FrameDecoder;
use crate::device::scheduler::polling_task;
use crate::device::session::{Link, SessionManager};
use crate::device::store::StateStore;
use crate::device::transport::Transport;
use crate::device::types::{Command, ConnectionState, DeviceEvent, Snapshot};
use crate::error::{CommandError, SetupError};

pub mod btle;
pub mod commands;
pub mod constants;
pub mod decoder;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod transport;
pub mod types;

/// Everything the bridge runs for one scale.
pub struct Scale<T: Transport> {
    config: ScaleConfig,
    store: StateStore,
    session: Arc<SessionManager<T>>,
    gateway: CommandGateway<T>,
    events: broadcast::Sender<DeviceEvent>,
    cancel: CancellationToken,
    polling: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl<T: Transport> Scale<T> {
    /// Builds an idle bridge; nothing connects until `start` or `refresh`.
    pub fn new(config: ScaleConfig, transport: T, decoder: impl FrameDecoder) -> Result<Self, SetupError> {
        if !config.is_valid_scale {
            return Err(SetupError::UnsupportedDevice { address: config.address.clone() });
        }
        if config.poll_interval.is_zero() {
            return Err(SetupError::InvalidPollInterval);
        }

        let transport = Arc::new(transport);
        let store = StateStore::new();
        let link = Link::new();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let session = Arc::new(SessionManager::new(
            config.address.clone(),
            transport.clone(),
            Arc::new(decoder),
            store.clone(),
            link.clone(),
            events.clone(),
            config.connect_timeout,
            cancel.clone(),
        ));
        let gateway = CommandGateway::new(transport, link, config.command_timeout, cancel.clone());

        Ok(Scale {
            config,
            store,
            session,
            gateway,
            events,
            cancel,
            polling: std::sync::Mutex::new(None),
        })
    }

    /// `new` followed by `start`. Must be called from within a tokio runtime.
    pub fn setup(config: ScaleConfig, transport: T, decoder: impl FrameDecoder) -> Result<Self, SetupError> {
        let scale = Self::new(config, transport, decoder)?;
        scale.start();
        Ok(scale)
    }

    /// Starts the polling task. Calling it again has no effect.
    pub fn start(&self) {
        let mut polling = self.polling.lock().unwrap_or_else(PoisonError::into_inner);
        if polling.is_some() || self.cancel.is_cancelled() {
            return;
        }

        info!("Polling {} ({}) every {}", self.config.name, self.config.address, humantime::format_duration(self.config.poll_interval));
        *polling = Some(polling_task(
            self.cancel.clone(),
            self.session.clone(),
            self.events.clone(),
            self.config.poll_interval,
        ));
    }

    pub fn config(&self) -> &ScaleConfig {
        &self.config
    }

    pub fn snapshot(&self) -> Snapshot {
        self.store.read()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.session.connection_state()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }

    /// Runs one tick immediately, outside the polling cadence.
    pub async fn refresh(&self) {
        self.session.tick().await;
        let _ = self.events.send(DeviceEvent::Refresh);
    }

    pub async fn execute(&self, command: Command) -> Result<(), CommandError> {
        self.gateway.execute(command).await
    }

    pub async fn tare(&self) -> Result<(), CommandError> {
        self.execute(Command::Tare).await
    }

    pub async fn reset_timer(&self) -> Result<(), CommandError> {
        self.execute(Command::ResetTimer).await
    }

    pub async fn start_timer(&self) -> Result<(), CommandError> {
        self.execute(Command::StartTimer).await
    }

    pub async fn stop_timer(&self) -> Result<(), CommandError> {
        self.execute(Command::StopTimer).await
    }

    pub async fn tare_and_start_timer(&self) -> Result<(), CommandError> {
        self.execute(Command::TareAndStart).await
    }

    pub async fn set_beep_level(&self, level: u8) -> Result<(), CommandError> {
        self.execute(Command::SetBeepLevel(level)).await
    }

    pub async fn set_auto_off(&self, minutes: u16) -> Result<(), CommandError> {
        self.execute(Command::SetAutoOff(minutes)).await
    }

    pub async fn set_flow_smoothing(&self, enabled: bool) -> Result<(), CommandError> {
        self.execute(Command::SetFlowSmoothing(enabled)).await
    }

    /// Stops polling and the receive loop, fails pending commands with
    /// `ShuttingDown` and disconnects. Last known readings stay readable.
    pub async fn shutdown(&self) {
        self.cancel.cancel();

        let polling = self.polling.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = polling {
            if let Err(err) = handle.await {
                warn!("Polling task failed: {:?}", err);
            }
        }

        self.session.shutdown().await;
    }
}
