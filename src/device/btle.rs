use async_trait::async_trait;
use btleplug::api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::{future, StreamExt};
use log::{debug, info, warn};
use tokio::time::{sleep, Instant};
use uuid::Uuid;

use crate::device::constants::{COMMAND_CHARACTERISTIC, SCALE_SERVICE, SCAN_POLL_DELAY, SCAN_WINDOW, WEIGHT_CHARACTERISTIC};
use crate::device::transport::{FrameStream, Transport};
use crate::error::DeviceError;

/// A connected scale: the peripheral and its two characteristics.
#[derive(Debug, Clone)]
pub struct BtleLink {
    peripheral: Peripheral,
    weight_char: Characteristic,
    command_char: Characteristic,
}

/// `Transport` backed by the host's bluetooth adapters.
pub struct BtleTransport {
    manager: Manager,
}

impl BtleTransport {
    pub async fn new() -> Result<Self, DeviceError> {
        Ok(BtleTransport { manager: Manager::new().await? })
    }
}

async fn start_scanning(manager: &Manager) -> Result<Vec<Adapter>, DeviceError> {
    let adapters = manager.adapters().await?;

    let filter = ScanFilter {
        services: vec![SCALE_SERVICE],
    };

    for adapter in &adapters {
        debug!("Scanning using adapter {}...", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));
        adapter.start_scan(filter.clone()).await?;
    }

    Ok(adapters)
}

async fn stop_scanning(adapters: &[Adapter]) {
    for adapter in adapters {
        if let Err(err) = adapter.stop_scan().await {
            debug!("Failed to stop scan: {:?}", err);
        }
    }
}

fn matches_address(address: &str, peripheral_address: &str, local_name: Option<&str>) -> bool {
    peripheral_address.eq_ignore_ascii_case(address)
        || local_name.is_some_and(|name| name == address)
}

async fn find_peripheral(adapters: &[Adapter], address: &str) -> Option<Peripheral> {
    for adapter in adapters {
        let peripherals = match adapter.peripherals().await {
            Ok(v) => v,
            Err(err) => {
                warn!("Failed to query BLE adapter for peripherals: {}", err);
                continue;
            },
        };

        for peripheral in peripherals {
            match peripheral.properties().await {
                Err(err) => {
                    debug!("Could not query peripheral for properties: {:?}", err);
                },
                Ok(None) => {},
                Ok(Some(properties)) => {
                    if matches_address(address, &properties.address.to_string(), properties.local_name.as_deref()) {
                        info!(
                            "Using peripheral {} {}",
                            properties.address,
                            properties.local_name.unwrap_or(String::from("NONE")),
                        );
                        return Some(peripheral);
                    }
                }
            }
        }
    }

    None
}

/// Disconnects a peripheral whose connect did not complete, including when the
/// connecting future is dropped by a deadline or shutdown.
struct ConnectGuard {
    peripheral: Option<Peripheral>,
}

impl ConnectGuard {
    fn new(peripheral: Peripheral) -> Self {
        ConnectGuard { peripheral: Some(peripheral) }
    }

    fn disarm(mut self) {
        self.peripheral = None;
    }
}

impl Drop for ConnectGuard {
    fn drop(&mut self) {
        let Some(peripheral) = self.peripheral.take() else {
            return;
        };

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime to disconnect half-open peripheral on");
            return;
        };

        runtime.spawn(async move {
            debug!("Disconnecting peripheral after incomplete connect");
            if let Err(err) = peripheral.disconnect().await {
                debug!("Disconnect after incomplete connect failed: {:?}", err);
            }
        });
    }
}

async fn connect_peripheral(peripheral: Peripheral) -> Result<BtleLink, DeviceError> {
    info!("Connecting to peripheral...");
    peripheral.connect().await?;

    info!("Connected; Discovering services...");
    peripheral.discover_services().await?;

    let mut weight_char = None;
    let mut command_char = None;

    for service in peripheral.services() {
        if service.uuid != SCALE_SERVICE {
            continue;
        }

        for characteristic in service.characteristics {
            if characteristic.uuid == WEIGHT_CHARACTERISTIC {
                weight_char = Some(characteristic);
            } else if characteristic.uuid == COMMAND_CHARACTERISTIC {
                command_char = Some(characteristic);
            }
        }
    }

    let (Some(weight_char), Some(command_char)) = (weight_char, command_char) else {
        return Err(DeviceError::MissingCharacteristic);
    };

    info!("Subscribing to characteristic {:?}", weight_char.uuid);
    peripheral.subscribe(&weight_char).await?;

    Ok(BtleLink { peripheral, weight_char, command_char })
}

#[async_trait]
impl Transport for BtleTransport {
    type Handle = BtleLink;

    async fn connect(&self, address: &str) -> Result<BtleLink, DeviceError> {
        let adapters = start_scanning(&self.manager).await?;
        let deadline = Instant::now() + SCAN_WINDOW;

        let peripheral = loop {
            if let Some(peripheral) = find_peripheral(&adapters, address).await {
                break Some(peripheral);
            }
            if Instant::now() >= deadline {
                break None;
            }
            sleep(SCAN_POLL_DELAY).await;
        };

        stop_scanning(&adapters).await;

        let peripheral = peripheral.ok_or_else(|| DeviceError::DeviceNotFound { address: address.to_string() })?;

        // leave no half-open link behind, the next attempt starts from a fresh scan
        let guard = ConnectGuard::new(peripheral.clone());
        let link = connect_peripheral(peripheral).await?;
        guard.disarm();
        Ok(link)
    }

    async fn disconnect(&self, handle: &BtleLink) -> Result<(), DeviceError> {
        info!("Disconnecting from peripheral");
        handle.peripheral.disconnect().await?;
        Ok(())
    }

    async fn is_connected(&self, handle: &BtleLink) -> Result<bool, DeviceError> {
        Ok(handle.peripheral.is_connected().await?)
    }

    async fn write(&self, handle: &BtleLink, characteristic: Uuid, data: &[u8]) -> Result<(), DeviceError> {
        let target = if characteristic == handle.command_char.uuid {
            &handle.command_char
        } else if characteristic == handle.weight_char.uuid {
            &handle.weight_char
        } else {
            return Err(DeviceError::MissingCharacteristic);
        };

        handle.peripheral.write(target, data, WriteType::WithResponse).await?;
        Ok(())
    }

    async fn notifications(&self, handle: &BtleLink) -> Result<FrameStream, DeviceError> {
        let weight_uuid = handle.weight_char.uuid;
        let stream = handle.peripheral.notifications().await?;

        Ok(stream
            .filter(move |notification| future::ready(notification.uuid == weight_uuid))
            .map(|notification| notification.value)
            .boxed())
    }
}
