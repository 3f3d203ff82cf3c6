use renderctl_core::{
    Capabilities, Confirm, DetectedDevice, DeviceDiscovery, DeviceIdentity, DeviceUpdate,
    IdentityFetcher, Resolution, ResolutionSource, ResolveError,
};
use renderctl_persistence::DeviceCache;
use renderctl_upnp::{detect_vendor, host_of, origin, Enricher, ProbeScanner};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Knobs for one resolution run
#[derive(Clone, Debug)]
pub struct ResolverOptions {
    /// Try SSDP before anything else
    pub ssdp: bool,
    /// Read and write the device cache
    pub use_cache: bool,
    /// Overall budget for one host's probe matrix
    pub probe_budget: Duration,
    /// Use the expanded vendor path list when probing
    pub deep_search: bool,
    pub identity_timeout: Duration,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            ssdp: true,
            use_cache: true,
            probe_budget: renderctl_upnp::probe::DEFAULT_BUDGET,
            deep_search: false,
            identity_timeout: Duration::from_secs(3),
        }
    }
}

/// Fallback chain SSDP -> cache -> probe, and the building blocks the
/// subnet scanner reuses
pub struct Resolver {
    discovery: Arc<dyn DeviceDiscovery>,
    scanner: ProbeScanner,
    enricher: Enricher,
    identity: Arc<dyn IdentityFetcher>,
    confirm: Arc<dyn Confirm>,
    options: ResolverOptions,
}

impl Resolver {
    pub fn new(
        discovery: Arc<dyn DeviceDiscovery>,
        scanner: ProbeScanner,
        enricher: Enricher,
        identity: Arc<dyn IdentityFetcher>,
        confirm: Arc<dyn Confirm>,
        options: ResolverOptions,
    ) -> Self {
        Self {
            discovery,
            scanner,
            enricher,
            identity,
            confirm,
            options,
        }
    }

    pub fn options(&self) -> &ResolverOptions {
        &self.options
    }

    /// Find a working control endpoint, optionally for a known IP.
    ///
    /// Strategy failures are logged and fall through to the next strategy;
    /// only [`ResolveError::Exhausted`] or [`ResolveError::Cancelled`] are
    /// returned.
    pub async fn resolve(
        &self,
        cache: &mut DeviceCache,
        target_ip: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Resolution, ResolveError> {
        // 1. SSDP
        if self.options.ssdp {
            match self.try_ssdp(cache, target_ip, cancel).await {
                Ok(resolution) => return Ok(resolution),
                Err(e) => info!("SSDP did not resolve a renderer: {}", e),
            }
        }
        if cancel.is_cancelled() {
            return Err(ResolveError::Cancelled);
        }

        // 2. Cache, only for a known IP
        if self.options.use_cache {
            if let Some(ip) = target_ip {
                match self.try_cache(cache, ip, cancel).await {
                    Ok(resolution) => return Ok(resolution),
                    Err(e) => info!("Cache did not resolve {}: {}", ip, e),
                }
            }
        }
        if cancel.is_cancelled() {
            return Err(ResolveError::Cancelled);
        }

        // 3. Probe
        match target_ip {
            Some(ip) => match self.probe_device(cache, ip, cancel).await {
                Ok(resolution) => {
                    ensure_live(cancel)?;
                    return Ok(resolution);
                }
                Err(ResolveError::Cancelled) => return Err(ResolveError::Cancelled),
                Err(e) => info!("Probe did not resolve {}: {}", ip, e),
            },
            None => debug!("Skipping probe: {}", ResolveError::MissingTarget),
        }

        if cancel.is_cancelled() {
            return Err(ResolveError::Cancelled);
        }
        Err(ResolveError::Exhausted)
    }

    async fn try_ssdp(
        &self,
        cache: &mut DeviceCache,
        target_ip: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Resolution, ResolveError> {
        let announcements = self.discovery.discover(cancel).await;

        let candidates = announcements.iter().filter(|device| match target_ip {
            Some(ip) => host_of(&device.location).as_deref() == Some(ip),
            None => true,
        });

        for announcement in candidates {
            if cancel.is_cancelled() {
                return Err(ResolveError::Cancelled);
            }

            let detected = match self.discovery.fetch_and_detect(announcement).await {
                Ok(detected) => detected,
                Err(e) => {
                    debug!("Skipping {}: {}", announcement.location, e);
                    continue;
                }
            };

            info!("SSDP resolved {} -> {}", detected.ip, detected.control_url);
            return self.adopt_detected(cache, detected, cancel).await;
        }

        Err(ResolveError::NoEndpointFound("no usable SSDP announcement".to_string()))
    }

    /// Enrich an SSDP-detected renderer, remember it and hand it out
    async fn adopt_detected(
        &self,
        cache: &mut DeviceCache,
        detected: DetectedDevice,
        cancel: &CancellationToken,
    ) -> Result<Resolution, ResolveError> {
        let caps = self
            .enricher
            .enrich(
                &detected.control_url,
                detected.avtransport_scpd.as_deref(),
                detected.connection_manager_ctrl.as_deref(),
            )
            .await;

        let identity = if detected.identity.is_empty() {
            self.lookup_identity(&detected.base_url()).await
        } else {
            detected.identity.clone()
        };

        let conn_mgr_url = detected.connection_manager_ctrl.clone().unwrap_or_default();
        let resolution = Resolution {
            ip: detected.ip.clone(),
            control_url: detected.control_url.clone(),
            conn_mgr_url: conn_mgr_url.clone(),
            vendor: detected.vendor.clone(),
            media: caps.media.clone(),
            source: ResolutionSource::Ssdp,
        };

        let mut update = DeviceUpdate::for_endpoint(detected.control_url).with_capabilities(caps);
        update.conn_mgr_url = conn_mgr_url;
        update.vendor = detected.vendor;
        update.identity = identity.into_fields();
        ensure_live(cancel)?;
        self.remember(cache, &detected.ip, update).await;

        Ok(resolution)
    }

    async fn try_cache(
        &self,
        cache: &mut DeviceCache,
        ip: &str,
        cancel: &CancellationToken,
    ) -> Result<Resolution, ResolveError> {
        let device = cache
            .get(ip)
            .ok_or_else(|| ResolveError::NoEndpointFound(format!("{} is not cached", ip)))?;
        let endpoint = device
            .primary_endpoint()
            .ok_or_else(|| ResolveError::NoEndpointFound(format!("{} has no playable endpoint", ip)))?;

        info!(
            "Cached device {} ({}): {}",
            ip,
            if device.vendor.is_empty() { "generic" } else { device.vendor.as_str() },
            endpoint.control_url
        );

        if !self.confirm.confirm("Use cached AVTransport endpoint?").await {
            ensure_live(cancel)?;
            return Err(ResolveError::UserDeclined);
        }

        let control_url = endpoint.control_url.clone();
        let conn_mgr_url = endpoint.conn_mgr_url.clone();
        let cached_media = endpoint.media.clone();
        let vendor = device.vendor.clone();

        let caps = self
            .enricher
            .enrich(&control_url, None, Some(conn_mgr_url.as_str()).filter(|u| !u.is_empty()))
            .await;
        if !caps.actions.values().any(|ok| *ok) {
            warn!("Cached endpoint {} no longer answers; using it anyway", control_url);
        }

        let media = if caps.media.is_empty() { cached_media } else { caps.media.clone() };

        let update = DeviceUpdate::for_endpoint(control_url.clone()).with_capabilities(caps);
        ensure_live(cancel)?;
        self.remember(cache, ip, update).await;

        Ok(Resolution {
            ip: ip.to_string(),
            control_url,
            conn_mgr_url,
            vendor,
            media,
            source: ResolutionSource::Cache,
        })
    }

    /// Probe one host, enrich whatever answered and remember it. Nothing is
    /// written once `cancel` has fired.
    pub async fn probe_device(
        &self,
        cache: &mut DeviceCache,
        ip: &str,
        cancel: &CancellationToken,
    ) -> Result<Resolution, ResolveError> {
        info!("Probing AVTransport directly: {}", ip);

        let target = self
            .scanner
            .probe(ip, self.options.probe_budget, self.options.deep_search, cancel)
            .await?;

        let caps: Capabilities = self.enricher.enrich(&target.control_url, None, None).await;

        let base_url = origin(&target.control_url).unwrap_or_else(|| format!("http://{}", ip));
        let identity = self.lookup_identity(&base_url).await;
        let vendor = detect_vendor(&identity.vendor_hints());

        let resolution = Resolution {
            ip: ip.to_string(),
            control_url: target.control_url.clone(),
            conn_mgr_url: String::new(),
            vendor: vendor.clone(),
            media: caps.media.clone(),
            source: ResolutionSource::Probe,
        };

        let mut update = DeviceUpdate::for_endpoint(target.control_url).with_capabilities(caps);
        update.vendor = vendor;
        update.identity = identity.into_fields();
        ensure_live(cancel)?;
        self.remember(cache, ip, update).await;

        Ok(resolution)
    }

    /// Announced renderers with their description decoded; touches neither
    /// the cache nor playback
    pub async fn survey_ssdp(&self, cancel: &CancellationToken) -> Vec<DetectedDevice> {
        let mut detected = Vec::new();
        for announcement in self.discovery.discover(cancel).await {
            if cancel.is_cancelled() {
                break;
            }
            match self.discovery.fetch_and_detect(&announcement).await {
                Ok(device) => detected.push(device),
                Err(e) => debug!("Skipping {}: {}", announcement.location, e),
            }
        }
        detected
    }

    /// Identity lookup that never fails the caller
    async fn lookup_identity(&self, base_url: &str) -> DeviceIdentity {
        match self
            .identity
            .fetch_identity(base_url, self.options.identity_timeout)
            .await
        {
            Ok(identity) => identity,
            Err(e) => {
                debug!("Identity lookup failed for {}: {}", base_url, e);
                DeviceIdentity::default()
            }
        }
    }

    async fn remember(&self, cache: &mut DeviceCache, ip: &str, update: DeviceUpdate) {
        if !self.options.use_cache {
            return;
        }
        cache.store_update(ip, update);
        if let Err(e) = cache.save().await {
            warn!("Failed to persist device cache: {}", e);
        }
    }
}

fn ensure_live(cancel: &CancellationToken) -> Result<(), ResolveError> {
    if cancel.is_cancelled() {
        Err(ResolveError::Cancelled)
    } else {
        Ok(())
    }
}

/// Turn the cache entry at `index` into a resolution, no network involved
pub fn select_cached(cache: &DeviceCache, index: usize) -> Result<Resolution, ResolveError> {
    let entry = cache
        .by_index(index)
        .ok_or_else(|| ResolveError::NoEndpointFound(format!("no cached device at index {}", index)))?;
    let endpoint = entry.primary().ok_or_else(|| {
        ResolveError::NoEndpointFound(format!("cached device {} has no playable endpoint", entry.ip))
    })?;

    Ok(Resolution {
        ip: entry.ip.to_string(),
        control_url: endpoint.control_url.clone(),
        conn_mgr_url: endpoint.conn_mgr_url.clone(),
        vendor: entry.device.vendor.clone(),
        media: endpoint.media.clone(),
        source: ResolutionSource::Cache,
    })
}
