//! AVTransport playback control for a resolved renderer
//!
//! Hands the renderer a media URL (SetAVTransportURI), starts it (Play) and
//! stops it again. Vendor quirks only affect the metadata sent along.

use anyhow::Result;
use renderctl_core::{metadata_for_vendor, SoapAction, Target};
use tracing::{debug, info};

use crate::soap::SoapClient;

pub struct AvTransport {
    client: SoapClient,
    control_url: String,
    vendor: String,
}

impl AvTransport {
    pub fn new(client: SoapClient, control_url: impl Into<String>, vendor: impl Into<String>) -> Self {
        Self {
            client,
            control_url: control_url.into(),
            vendor: vendor.into(),
        }
    }

    pub fn control_url(&self) -> &str {
        &self.control_url
    }

    /// Point the renderer at `media_url`; `mime` selects the metadata flavour
    pub async fn set_uri(&self, media_url: &str, mime: &str) -> Result<()> {
        let target = Target::control(self.control_url.as_str()).with_media(media_url);
        let metadata = metadata_for_vendor(&self.vendor, &target, mime);

        info!("Setting AVTransport URI: {}", media_url);
        debug!("Metadata ({}): {}", if self.vendor.is_empty() { "generic" } else { self.vendor.as_str() }, metadata);

        let action = SoapAction::av_transport("SetAVTransportURI")
            .arg("CurrentURI", media_url)
            .arg("CurrentURIMetaData", metadata);
        self.client.call(&self.control_url, &action).await?;
        Ok(())
    }

    pub async fn play(&self) -> Result<()> {
        info!("Starting playback");
        let action = SoapAction::av_transport("Play").arg("Speed", "1");
        self.client.call(&self.control_url, &action).await?;
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        info!("Stopping playback");
        self.client
            .call(&self.control_url, &SoapAction::av_transport("Stop"))
            .await?;
        Ok(())
    }

    /// SetAVTransportURI followed by Play
    pub async fn play_media(&self, media_url: &str, mime: &str) -> Result<()> {
        self.set_uri(media_url, mime).await?;
        self.play().await
    }
}
