//! Brute-force AVTransport endpoint discovery over a fixed port × path matrix.

use renderctl_core::{ResolveError, SoapProbe, Target};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Default overall budget for one probe run
pub const DEFAULT_BUDGET: Duration = Duration::from_secs(8);

/// Ports tried in order, outer loop
pub const PROBE_PORTS: &[u16] = &[
    9197,  // Samsung AVTransport
    7678,  // Samsung AllShare
    8187,
    9119,
    8080,
    49152, // common UPnP stack default
];

/// Paths tried on every port unless an expanded search was requested
pub const DEFAULT_PATHS: &[&str] = &[
    "/dmr/upnp/control/AVTransport1",
    "/upnp/control/AVTransport",
    "/MediaRenderer/AVTransport/Control",
    "/AVTransport/control",
];

/// Vendor-specific path catalogue for deep searches
pub const EXPANDED_PATHS: &[&str] = &[
    // common
    "/upnp/control/AVTransport",
    "/AVTransport/control",
    "/MediaRenderer/AVTransport/Control",
    "/dmr/upnp/control/AVTransport1",
    // samsung
    "/smp_7_/AVTransport",
    "/smp_9_/AVTransport",
    "/smp_15_/AVTransport",
    "/upnp/control/AVTransport1",
    // sony
    "/sony/AVTransport",
    "/upnp/control/AVTransport/1",
    // lg
    "/upnp/control/avtransport",
    "/upnp/control/avtransport1",
    // generic renderers
    "/renderer/control/AVTransport",
    "/device/AVTransport/control",
    "/control/AVTransport",
    // case quirks
    "/AVTransport/Control",
    "/avtransport/control",
    "/MediaRenderer/AVTransport/control",
];

/// Walks the probe matrix for a single host
pub struct ProbeScanner {
    probe: Arc<dyn SoapProbe>,
    ports: Vec<u16>,
}

impl ProbeScanner {
    pub fn new(probe: Arc<dyn SoapProbe>) -> Self {
        Self {
            probe,
            ports: PROBE_PORTS.to_vec(),
        }
    }

    /// Replace the port list (local stubs listen on ephemeral ports)
    pub fn with_ports(mut self, ports: Vec<u16>) -> Self {
        self.ports = ports;
        self
    }

    pub fn paths(expanded: bool) -> &'static [&'static str] {
        if expanded {
            EXPANDED_PATHS
        } else {
            DEFAULT_PATHS
        }
    }

    /// Every control URL the matrix would try, in order
    pub fn candidates(&self, ip: &str, expanded: bool) -> Vec<String> {
        let paths = Self::paths(expanded);
        self.ports
            .iter()
            .flat_map(|port| paths.iter().map(move |path| format!("http://{}:{}{}", ip, port, path)))
            .collect()
    }

    /// Return the first control URL that answers `GetTransportInfo`.
    ///
    /// The budget is checked before every attempt; running out yields
    /// [`ResolveError::ProbeTimeout`], trying everything without a hit
    /// yields [`ResolveError::NoEndpointFound`]. A fired `cancel` stops the
    /// walk with [`ResolveError::Cancelled`].
    pub async fn probe(
        &self,
        ip: &str,
        budget: Duration,
        expanded: bool,
        cancel: &CancellationToken,
    ) -> Result<Target, ResolveError> {
        let started = Instant::now();
        let candidates = self.candidates(ip, expanded);

        info!("Probing {} AVTransport candidates on {}", candidates.len(), ip);

        for (attempt, control_url) in candidates.into_iter().enumerate() {
            if cancel.is_cancelled() {
                debug!("Probe of {} cancelled after {} attempts", ip, attempt);
                return Err(ResolveError::Cancelled);
            }
            if started.elapsed() >= budget {
                debug!("Probe budget spent after {} attempts on {}", attempt, ip);
                return Err(ResolveError::ProbeTimeout(budget));
            }

            if self.probe.probe(&control_url, None).await {
                if cancel.is_cancelled() {
                    return Err(ResolveError::Cancelled);
                }
                info!("AVTransport endpoint found: {}", control_url);
                return Ok(Target::control(control_url));
            }
        }

        Err(ResolveError::NoEndpointFound(ip.to_string()))
    }
}
