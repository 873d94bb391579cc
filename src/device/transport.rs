use async_trait::async_trait;
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::error::DeviceError;

/// Raw notification payloads of one session. Ends when the link closes.
pub type FrameStream = BoxStream<'static, Vec<u8>>;

/// The BLE link to a single scale.
///
/// `Handle` identifies one session; it is invalid after `disconnect` or once
/// the notification stream has ended.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Handle: Clone + Send + Sync + 'static;

    async fn connect(&self, address: &str) -> Result<Self::Handle, DeviceError>;

    async fn disconnect(&self, handle: &Self::Handle) -> Result<(), DeviceError>;

    /// Resolves once the transport accepted the write.
    async fn write(&self, handle: &Self::Handle, characteristic: Uuid, data: &[u8]) -> Result<(), DeviceError>;

    /// Whether the link behind `handle` is still up. The notification stream
    /// of some backends stays open after the device went away.
    async fn is_connected(&self, handle: &Self::Handle) -> Result<bool, DeviceError>;

    /// Can be taken once per session.
    async fn notifications(&self, handle: &Self::Handle) -> Result<FrameStream, DeviceError>;
}
