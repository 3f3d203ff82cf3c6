use crate::models::{DetectedDevice, DeviceIdentity, SoapAction, SsdpDevice};
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Answers "is there a SOAP processor at this URL?"
#[async_trait]
pub trait SoapProbe: Send + Sync {
    /// Send `action` (or `GetTransportInfo` when `None`) to `control_url`.
    ///
    /// Returns true for HTTP 200 and HTTP 500; every other outcome,
    /// including transport errors and timeouts, is false.
    async fn probe(&self, control_url: &str, action: Option<&SoapAction>) -> bool;
}

/// Reads descriptive fields (friendly name, model, UDN...) for a device
#[async_trait]
pub trait IdentityFetcher: Send + Sync {
    async fn fetch_identity(&self, base_url: &str, timeout: Duration) -> Result<DeviceIdentity>;
}

/// SSDP-style device discovery
#[async_trait]
pub trait DeviceDiscovery: Send + Sync {
    /// Find candidate description URLs, stopping early when `cancel` fires
    async fn discover(&self, cancel: &CancellationToken) -> Vec<SsdpDevice>;

    /// Fetch the description document behind an announcement and extract
    /// control endpoints, vendor and identity
    async fn fetch_and_detect(&self, device: &SsdpDevice) -> Result<DetectedDevice>;
}

/// Human-in-the-loop gate before trusting cached data or deleting it.
///
/// An interrupted prompt answers false; callers tell a refusal from an
/// interruption by checking their cancellation token.
#[async_trait]
pub trait Confirm: Send + Sync {
    async fn confirm(&self, prompt: &str) -> bool;
}

/// Non-interactive confirmation that always accepts
#[derive(Clone, Copy, Debug, Default)]
pub struct AutoAccept;

#[async_trait]
impl Confirm for AutoAccept {
    async fn confirm(&self, prompt: &str) -> bool {
        tracing::debug!("Auto-accepting: {}", prompt);
        true
    }
}
