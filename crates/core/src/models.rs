use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Action name -> supported
pub type ActionMap = BTreeMap<String, bool>;

/// MIME type -> DLNA profiles, in the order the renderer reported them
pub type MediaMap = BTreeMap<String, Vec<String>>;

/// Where to send control commands and what the renderer should pull
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Target {
    pub control_url: String,
    pub media_url: String,
}

impl Target {
    pub fn control(control_url: impl Into<String>) -> Self {
        Self {
            control_url: control_url.into(),
            media_url: String::new(),
        }
    }

    pub fn with_media(mut self, media_url: impl Into<String>) -> Self {
        self.media_url = media_url.into();
        self
    }
}

/// Capabilities learned during one enrichment pass
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Capabilities {
    pub actions: ActionMap,
    pub media: MediaMap,
}

/// A single AVTransport control endpoint of a cached device
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub control_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub conn_mgr_url: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub actions: ActionMap,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub media: MediaMap,
    pub seen_at: DateTime<Utc>,
}

impl Endpoint {
    pub fn new(control_url: impl Into<String>, seen_at: DateTime<Utc>) -> Self {
        Self {
            control_url: control_url.into(),
            conn_mgr_url: String::new(),
            actions: ActionMap::new(),
            media: MediaMap::new(),
            seen_at,
        }
    }

    /// True when at least one action has been confirmed as supported
    pub fn is_playable(&self) -> bool {
        self.actions.values().any(|supported| *supported)
    }

    /// Names of confirmed actions, sorted
    pub fn supported_actions(&self) -> Vec<&str> {
        self.actions
            .iter()
            .filter(|(_, supported)| **supported)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// Everything known about one renderer, keyed by IP in the [`Store`]
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CachedDevice {
    #[serde(default)]
    pub vendor: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub identity: BTreeMap<String, String>,
    #[serde(default)]
    pub endpoints: BTreeMap<String, Endpoint>,
}

impl CachedDevice {
    /// Deterministic primary endpoint: the lowest control URL among the
    /// endpoints with a confirmed action.
    pub fn primary_endpoint(&self) -> Option<&Endpoint> {
        // BTreeMap iterates keys in ascending order
        self.endpoints.values().find(|ep| ep.is_playable())
    }

    pub fn friendly_name(&self) -> Option<&str> {
        self.identity
            .get(IDENTITY_FRIENDLY_NAME)
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }
}

/// Full persisted cache, keyed by device IP
pub type Store = BTreeMap<String, CachedDevice>;

pub const IDENTITY_FRIENDLY_NAME: &str = "friendly_name";
pub const IDENTITY_MANUFACTURER: &str = "manufacturer";
pub const IDENTITY_MODEL_NAME: &str = "model_name";
pub const IDENTITY_MODEL_NUMBER: &str = "model_number";
pub const IDENTITY_UDN: &str = "udn";
pub const IDENTITY_PRESENTATION: &str = "presentation";

/// Descriptive fields read from a device description document
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub friendly_name: String,
    pub manufacturer: String,
    pub model_name: String,
    pub model_number: String,
    pub udn: String,
    pub presentation: String,
}

impl DeviceIdentity {
    pub fn is_empty(&self) -> bool {
        self.friendly_name.is_empty()
            && self.manufacturer.is_empty()
            && self.model_name.is_empty()
            && self.model_number.is_empty()
            && self.udn.is_empty()
            && self.presentation.is_empty()
    }

    /// Fields that usually name the vendor
    pub fn vendor_hints(&self) -> [&str; 3] {
        [
            self.manufacturer.as_str(),
            self.friendly_name.as_str(),
            self.model_name.as_str(),
        ]
    }

    /// Flatten into the open identity map stored in the cache. Empty
    /// fields are left out so they can never mask a known value.
    pub fn into_fields(self) -> BTreeMap<String, String> {
        [
            (IDENTITY_FRIENDLY_NAME, self.friendly_name),
            (IDENTITY_MANUFACTURER, self.manufacturer),
            (IDENTITY_MODEL_NAME, self.model_name),
            (IDENTITY_MODEL_NUMBER, self.model_number),
            (IDENTITY_UDN, self.udn),
            (IDENTITY_PRESENTATION, self.presentation),
        ]
        .into_iter()
        .filter(|(_, v)| !v.trim().is_empty())
        .map(|(k, v)| (k.to_string(), v.trim().to_string()))
        .collect()
    }
}

/// A partial observation about a device, merged into the cache
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeviceUpdate {
    pub control_url: String,
    pub conn_mgr_url: String,
    pub vendor: String,
    pub identity: BTreeMap<String, String>,
    pub actions: ActionMap,
    pub media: MediaMap,
}

impl DeviceUpdate {
    pub fn for_endpoint(control_url: impl Into<String>) -> Self {
        Self {
            control_url: control_url.into(),
            ..Default::default()
        }
    }

    pub fn with_capabilities(mut self, caps: Capabilities) -> Self {
        self.actions = caps.actions;
        self.media = caps.media;
        self
    }
}

/// Headers of interest from an SSDP NOTIFY or M-SEARCH response
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SsdpDevice {
    pub location: String,
    pub server: String,
    pub usn: String,
}

/// Result of fetching and parsing a device description document
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DetectedDevice {
    pub ip: String,
    pub port: u16,
    /// Absolute AVTransport control URL
    pub control_url: String,
    pub vendor: String,
    pub connection_manager_ctrl: Option<String>,
    pub avtransport_scpd: Option<String>,
    pub identity: DeviceIdentity,
}

impl DetectedDevice {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.ip, self.port)
    }
}

/// UPnP services this tool talks to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpnpService {
    AvTransport,
    ConnectionManager,
}

impl UpnpService {
    pub fn urn(&self) -> &'static str {
        match self {
            UpnpService::AvTransport => "urn:schemas-upnp-org:service:AVTransport:1",
            UpnpService::ConnectionManager => "urn:schemas-upnp-org:service:ConnectionManager:1",
        }
    }
}

/// A SOAP action to wrap in an envelope. Arguments keep insertion order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SoapAction {
    pub service: UpnpService,
    pub name: String,
    pub args: Vec<(String, String)>,
}

impl SoapAction {
    pub fn new(service: UpnpService, name: impl Into<String>) -> Self {
        Self {
            service,
            name: name.into(),
            args: Vec::new(),
        }
    }

    /// AVTransport action with the usual `InstanceID=0` argument
    pub fn av_transport(name: impl Into<String>) -> Self {
        Self::new(UpnpService::AvTransport, name).instance_id()
    }

    /// The default probe action
    pub fn transport_info() -> Self {
        Self::av_transport("GetTransportInfo")
    }

    pub fn arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.push((key.into(), value.into()));
        self
    }

    pub fn instance_id(self) -> Self {
        self.arg("InstanceID", "0")
    }

    /// Value of the `SOAPAction` header, quotes included
    pub fn header_value(&self) -> String {
        format!("\"{}#{}\"", self.service.urn(), self.name)
    }
}

/// Which strategy produced a resolution
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResolutionSource {
    Ssdp,
    Cache,
    Probe,
    Manual,
}

impl std::fmt::Display for ResolutionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolutionSource::Ssdp => write!(f, "ssdp"),
            ResolutionSource::Cache => write!(f, "cache"),
            ResolutionSource::Probe => write!(f, "probe"),
            ResolutionSource::Manual => write!(f, "manual"),
        }
    }
}

/// A working control endpoint handed to playback
#[derive(Clone, Debug, PartialEq)]
pub struct Resolution {
    pub ip: String,
    pub control_url: String,
    pub conn_mgr_url: String,
    pub vendor: String,
    pub media: MediaMap,
    pub source: ResolutionSource,
}
