use renderctl_core::{Resolution, ResolveError};
use renderctl_persistence::DeviceCache;
use std::net::Ipv4Addr;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::orchestrator::Resolver;

/// Largest block a subnet scan accepts (a /16)
pub const MIN_PREFIX: u8 = 16;

/// Outcome of a subnet scan
#[derive(Debug, Default)]
pub struct ScanReport {
    pub cidr: String,
    pub hosts: usize,
    pub probed: usize,
    pub found: Vec<Resolution>,
    pub timed_out: usize,
    pub cancelled: bool,
}

/// Every usable host of an IPv4 CIDR block, network and broadcast
/// addresses excluded
pub fn expand_cidr(cidr: &str) -> Result<Vec<Ipv4Addr>, ResolveError> {
    let invalid = |reason: &str| ResolveError::InvalidSubnet {
        cidr: cidr.to_string(),
        reason: reason.to_string(),
    };

    let (addr, prefix) = cidr
        .trim()
        .split_once('/')
        .ok_or_else(|| invalid("expected a.b.c.d/prefix"))?;
    let addr: Ipv4Addr = addr.parse().map_err(|_| invalid("only IPv4 CIDR supported"))?;
    let prefix: u8 = prefix.parse().map_err(|_| invalid("prefix is not a number"))?;

    if prefix > 32 {
        return Err(invalid("prefix must be at most 32"));
    }
    if prefix < MIN_PREFIX {
        return Err(invalid("block too large to scan"));
    }

    let mask = u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0);
    let network = u32::from(addr) & mask;
    let broadcast = network | !mask;

    // /31 and /32 have no host range
    if broadcast.saturating_sub(network) <= 1 {
        return Ok(Vec::new());
    }

    Ok((network + 1..broadcast).map(Ipv4Addr::from).collect())
}

impl Resolver {
    /// Probe every host of `cidr` in order. Per-host failures are counted,
    /// not returned; playback is never started. Cancellation ends the scan
    /// early with `cancelled` set, keeping what was found so far.
    pub async fn scan_subnet(
        &self,
        cache: &mut DeviceCache,
        cidr: &str,
        cancel: &CancellationToken,
    ) -> Result<ScanReport, ResolveError> {
        let hosts = expand_cidr(cidr)?;
        info!("Scanning subnet {} ({} hosts)", cidr, hosts.len());

        let mut report = ScanReport {
            cidr: cidr.to_string(),
            hosts: hosts.len(),
            ..Default::default()
        };

        for host in hosts {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let ip = host.to_string();
            report.probed += 1;

            match self.probe_device(cache, &ip, cancel).await {
                Ok(resolution) => {
                    info!("AVTransport found at {}", ip);
                    report.found.push(resolution);
                }
                Err(ResolveError::Cancelled) => {
                    report.cancelled = true;
                    break;
                }
                Err(ResolveError::ProbeTimeout(budget)) => {
                    debug!("{} timed out after {:?}", ip, budget);
                    report.timed_out += 1;
                }
                Err(e) => debug!("{}: {}", ip, e),
            }
        }

        info!(
            "Subnet scan completed: {} of {} hosts probed, {} renderer(s)",
            report.probed,
            report.hosts,
            report.found.len()
        );
        Ok(report)
    }
}
