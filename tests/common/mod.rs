#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};
use uuid::Uuid;

use bookoo_bridge::device::constants::xor_checksum;
use bookoo_bridge::device::transport::{FrameStream, Transport};
use bookoo_bridge::device::types::DeviceEvent;
use bookoo_bridge::error::DeviceError;
use bookoo_bridge::ScaleConfig;

pub const ADDRESS: &str = "AA:BB:CC:DD:EE:FF";
const WAIT: Duration = Duration::from_secs(2);

#[derive(Default)]
struct MockState {
    connect_failures: VecDeque<DeviceError>,
    write_failures: VecDeque<DeviceError>,
    session: u32,
    connected: bool,
    frames: Option<UnboundedSender<Vec<u8>>>,
    pending_stream: Option<UnboundedReceiver<Vec<u8>>>,
    connects: usize,
    disconnects: usize,
    writes: Vec<(Uuid, Vec<u8>)>,
    in_flight: usize,
    max_in_flight: usize,
    connect_delay: Duration,
    write_delay: Duration,
    health_delay: Duration,
}

/// In-memory scale link. Clones share state so a test keeps a handle after
/// giving the transport to a `Scale`.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    fn with<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn fail_next_connect(&self, err: DeviceError) {
        self.with(|state| state.connect_failures.push_back(err));
    }

    pub fn fail_next_write(&self, err: DeviceError) {
        self.with(|state| state.write_failures.push_back(err));
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        self.with(|state| state.connect_delay = delay);
    }

    pub fn set_write_delay(&self, delay: Duration) {
        self.with(|state| state.write_delay = delay);
    }

    /// Delays the transport's answer to "is the link still up".
    pub fn set_health_delay(&self, delay: Duration) {
        self.with(|state| state.health_delay = delay);
    }

    pub fn push_frame(&self, frame: Vec<u8>) {
        self.with(|state| {
            let sender = state.frames.as_ref().expect("no open session");
            sender.unbounded_send(frame).expect("stream receiver dropped");
        });
    }

    /// Simulates the scale going away: the notification stream ends.
    pub fn close_stream(&self) {
        self.with(|state| state.frames = None);
    }

    /// Simulates a link lost without the notification stream ending, as
    /// bluez does when the scale powers off.
    pub fn drop_link(&self) {
        self.with(|state| state.connected = false);
    }

    pub fn connects(&self) -> usize {
        self.with(|state| state.connects)
    }

    pub fn disconnects(&self) -> usize {
        self.with(|state| state.disconnects)
    }

    pub fn writes(&self) -> Vec<(Uuid, Vec<u8>)> {
        self.with(|state| state.writes.clone())
    }

    pub fn max_in_flight(&self) -> usize {
        self.with(|state| state.max_in_flight)
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Handle = u32;

    async fn connect(&self, address: &str) -> Result<u32, DeviceError> {
        assert_eq!(address, ADDRESS);
        let delay = self.with(|state| state.connect_delay);
        sleep(delay).await;

        self.with(|state| {
            state.connects += 1;
            if let Some(err) = state.connect_failures.pop_front() {
                return Err(err);
            }

            let (sender, receiver) = unbounded();
            state.session += 1;
            state.connected = true;
            state.frames = Some(sender);
            state.pending_stream = Some(receiver);
            Ok(state.session)
        })
    }

    async fn disconnect(&self, _handle: &u32) -> Result<(), DeviceError> {
        self.with(|state| {
            state.disconnects += 1;
            state.connected = false;
            state.frames = None;
        });
        Ok(())
    }

    async fn is_connected(&self, handle: &u32) -> Result<bool, DeviceError> {
        let delay = self.with(|state| state.health_delay);
        sleep(delay).await;

        Ok(self.with(|state| state.connected && *handle == state.session))
    }

    async fn write(&self, handle: &u32, characteristic: Uuid, data: &[u8]) -> Result<(), DeviceError> {
        let delay = self.with(|state| {
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
            state.write_delay
        });

        sleep(delay).await;

        self.with(|state| {
            state.in_flight -= 1;
            if *handle != state.session {
                return Err(DeviceError::Transport(String::from("stale session")));
            }
            if let Some(err) = state.write_failures.pop_front() {
                return Err(err);
            }
            state.writes.push((characteristic, data.to_vec()));
            Ok(())
        })
    }

    async fn notifications(&self, _handle: &u32) -> Result<FrameStream, DeviceError> {
        self.with(|state| state.pending_stream.take())
            .map(|receiver| receiver.boxed())
            .ok_or_else(|| DeviceError::Transport(String::from("notifications already taken")))
    }
}

pub fn test_config() -> ScaleConfig {
    ScaleConfig {
        address: ADDRESS.to_string(),
        poll_interval: Duration::from_secs(5),
        command_timeout: Duration::from_secs(1),
        connect_timeout: Duration::from_secs(1),
        ..Default::default()
    }
}

/// A valid Bookoo weight frame reporting `weight` grams.
pub fn weight_frame(weight: f64) -> Vec<u8> {
    let centigrams = (weight.abs() * 100.0).round() as u32;

    let mut frame = vec![0u8; 20];
    frame[0] = 0x03;
    frame[1] = 0x0B;
    frame[6] = if weight < 0.0 { b'-' } else { b'+' };
    frame[7..10].copy_from_slice(&centigrams.to_be_bytes()[1..]);
    frame[10] = b'+';
    frame[13] = 100;
    frame[14..16].copy_from_slice(&5u16.to_be_bytes());
    frame[16] = 3;
    frame[19] = xor_checksum(&frame[..19]);
    frame
}

pub async fn wait_for_event(events: &mut broadcast::Receiver<DeviceEvent>, expected: DeviceEvent) {
    timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(event) if event == expected => return,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {},
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {:?}", expected));
}

pub async fn eventually(mut condition: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never became true");
}
