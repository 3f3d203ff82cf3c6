use renderctl_core::{Capabilities, SoapProbe};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::protocol_info::fetch_media_protocols;
use crate::scpd::{fetch_actions, validate_actions};
use crate::soap::SoapClient;

/// Learns what a resolved control endpoint can do.
///
/// Every step degrades instead of failing: an unreachable SCPD gives no
/// advertised actions, an unreachable ConnectionManager gives no media.
pub struct Enricher {
    client: SoapClient,
    probe: Arc<dyn SoapProbe>,
}

impl Enricher {
    pub fn new(client: SoapClient, probe: Arc<dyn SoapProbe>) -> Self {
        Self { client, probe }
    }

    pub async fn enrich(
        &self,
        control_url: &str,
        scpd_url: Option<&str>,
        conn_mgr_url: Option<&str>,
    ) -> Capabilities {
        let mut actions = match scpd_url {
            Some(url) => fetch_actions(&self.client, url).await.unwrap_or_else(|e| {
                warn!("SCPD lookup failed for {}: {}", url, e);
                Default::default()
            }),
            None => Default::default(),
        };

        // live results override what the SCPD advertises
        actions.extend(validate_actions(self.probe.as_ref(), control_url).await);

        let media = match conn_mgr_url {
            Some(url) => fetch_media_protocols(&self.client, url).await.unwrap_or_else(|e| {
                warn!("GetProtocolInfo failed for {}: {}", url, e);
                Default::default()
            }),
            None => Default::default(),
        };

        debug!(
            "{}: {} actions ({} confirmed), {} media types",
            control_url,
            actions.len(),
            actions.values().filter(|ok| **ok).count(),
            media.len()
        );

        Capabilities { actions, media }
    }
}
