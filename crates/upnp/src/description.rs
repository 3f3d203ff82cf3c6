//! UPnP device description parsing and vendor detection
//!
//! Turns the XML behind an SSDP `LOCATION` into a [`DetectedDevice`]: the
//! AVTransport control and SCPD URLs, the ConnectionManager control URL and
//! the descriptive identity fields.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use renderctl_core::{DetectedDevice, DeviceIdentity, IdentityFetcher, SsdpDevice};
use reqwest::Url;
use std::time::Duration;
use tracing::{debug, info};

use crate::soap::SoapClient;

/// Where renderers commonly serve their description document
pub const DESCRIPTION_PATHS: &[&str] = &[
    "/description.xml",
    "/dmr",
    "/rootDesc.xml",
    "/DeviceDescription.xml",
    "/upnp/desc.xml",
    "/dd.xml",
];

/// Vendor name and the lowercase tokens that identify it
const VENDOR_HINTS: &[(&str, &[&str])] = &[
    ("samsung", &["samsung", "tizen"]),
    ("lg", &["lg", "webos"]),
    ("sony", &["sony", "bravia"]),
    ("philips", &["philips"]),
];

/// A service entry of a description document, URLs still unresolved
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceInfo {
    pub service_type: String,
    pub control_url: String,
    pub scpd_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceDescription {
    pub identity: DeviceIdentity,
    pub url_base: Option<String>,
    pub services: Vec<ServiceInfo>,
}

impl DeviceDescription {
    /// First service whose type names `service` (e.g. "AVTransport")
    pub fn service(&self, service: &str) -> Option<&ServiceInfo> {
        let needle = format!(":service:{}:", service);
        self.services.iter().find(|s| s.service_type.contains(&needle))
    }
}

/// Parse a description document.
///
/// Identity comes from the root device only; services are collected from
/// the root and every embedded device.
pub fn parse_description(xml: &str) -> Result<DeviceDescription> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut description = DeviceDescription::default();
    let mut path: Vec<String> = Vec::new();
    let mut text = String::new();
    let mut current_service = ServiceInfo::default();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if name == "service" {
                    current_service = ServiceInfo::default();
                }
                path.push(name);
                text.clear();
            }
            Ok(Event::Text(e)) => {
                text.push_str(&e.unescape().unwrap_or_default());
            }
            Ok(Event::End(_)) => {
                let name = path.pop().unwrap_or_default();
                let parent = path.last().map(String::as_str).unwrap_or("");
                let device_depth = path.iter().filter(|p| *p == "device").count();
                let value = text.trim().to_string();

                match (parent, name.as_str()) {
                    ("root", "URLBase") if !value.is_empty() => description.url_base = Some(value),
                    ("device", field) if device_depth == 1 => {
                        let identity = &mut description.identity;
                        match field {
                            "friendlyName" => identity.friendly_name = value,
                            "manufacturer" => identity.manufacturer = value,
                            "modelName" => identity.model_name = value,
                            "modelNumber" => identity.model_number = value,
                            "UDN" => identity.udn = value,
                            "presentationURL" => identity.presentation = value,
                            _ => {}
                        }
                    }
                    ("service", "serviceType") => current_service.service_type = value,
                    ("service", "controlURL") => current_service.control_url = value,
                    ("service", "SCPDURL") => current_service.scpd_url = value,
                    ("serviceList", "service") => {
                        if !current_service.service_type.is_empty() {
                            description.services.push(std::mem::take(&mut current_service));
                        }
                    }
                    _ => {}
                }
                text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(anyhow!(
                    "XML parsing error at position {}: {}",
                    reader.buffer_position(),
                    e
                ));
            }
            _ => {}
        }
    }

    Ok(description)
}

/// Resolve a possibly relative URL against `base`
pub fn resolve_url(base: &str, url: &str) -> String {
    if url.is_empty() {
        return String::new();
    }
    match Url::parse(base).and_then(|base| base.join(url)) {
        Ok(resolved) => resolved.to_string(),
        Err(_) => url.to_string(),
    }
}

/// `http://host:port` of an absolute URL
pub fn origin(url: &str) -> Option<String> {
    let url = Url::parse(url).ok()?;
    let host = url.host_str()?;
    let port = url.port_or_known_default()?;
    Some(format!("{}://{}:{}", url.scheme(), host, port))
}

/// Host part of an absolute URL
pub fn host_of(url: &str) -> Option<String> {
    Url::parse(url).ok()?.host_str().map(str::to_string)
}

/// Guess the vendor from any descriptive strings available.
///
/// Returns "samsung", "lg", "sony", "philips" or an empty string.
pub fn detect_vendor(hints: &[&str]) -> String {
    let haystack = hints.join(" ").to_lowercase();
    let tokens: Vec<&str> = haystack
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();

    VENDOR_HINTS
        .iter()
        .find(|(_, keys)| keys.iter().any(|key| tokens.contains(key)))
        .map(|(vendor, _)| vendor.to_string())
        .unwrap_or_default()
}

/// GET and parse a description document
pub async fn fetch_description(client: &SoapClient, location: &str, timeout: Duration) -> Result<DeviceDescription> {
    debug!("Fetching device description from {}", location);
    let xml = client.get_text(location, timeout).await?;
    parse_description(&xml)
}

/// Fetch the description behind an SSDP announcement and extract what the
/// resolver needs. Fails when the device has no AVTransport service.
pub async fn fetch_and_detect(client: &SoapClient, device: &SsdpDevice) -> Result<DetectedDevice> {
    let location = device.location.as_str();
    let description = fetch_description(client, location, client.fetch_timeout()).await?;

    let url = Url::parse(location)?;
    let ip = url
        .host_str()
        .ok_or_else(|| anyhow!("description URL {} has no host", location))?
        .to_string();
    let port = url.port_or_known_default().unwrap_or(80);

    let base = description.url_base.clone().unwrap_or_else(|| location.to_string());

    let av = description
        .service("AVTransport")
        .ok_or_else(|| anyhow!("{} exposes no AVTransport service", location))?;
    let control_url = resolve_url(&base, &av.control_url);
    if control_url.is_empty() {
        return Err(anyhow!("{} has an AVTransport service without controlURL", location));
    }
    let avtransport_scpd = Some(resolve_url(&base, &av.scpd_url)).filter(|u| !u.is_empty());

    let connection_manager_ctrl = description
        .service("ConnectionManager")
        .map(|cm| resolve_url(&base, &cm.control_url))
        .filter(|u| !u.is_empty());

    let mut identity = description.identity;
    if !identity.presentation.is_empty() {
        identity.presentation = resolve_url(&base, &identity.presentation);
    }

    let vendor = detect_vendor(&[
        identity.manufacturer.as_str(),
        identity.friendly_name.as_str(),
        identity.model_name.as_str(),
        device.server.as_str(),
    ]);

    info!(
        "Detected {} at {}:{} ({})",
        if identity.friendly_name.is_empty() { "renderer" } else { identity.friendly_name.as_str() },
        ip,
        port,
        if vendor.is_empty() { "generic" } else { vendor.as_str() }
    );

    Ok(DetectedDevice {
        ip,
        port,
        control_url,
        vendor,
        connection_manager_ctrl,
        avtransport_scpd,
        identity,
    })
}

/// Identity lookup that tries the usual description paths under a base URL
#[derive(Clone, Debug)]
pub struct HttpIdentityFetcher {
    client: SoapClient,
}

impl HttpIdentityFetcher {
    pub fn new(client: SoapClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl IdentityFetcher for HttpIdentityFetcher {
    async fn fetch_identity(&self, base_url: &str, timeout: Duration) -> Result<DeviceIdentity> {
        let base = base_url.trim_end_matches('/');

        let lookup = async {
            for path in DESCRIPTION_PATHS {
                let url = format!("{}{}", base, path);
                match fetch_description(&self.client, &url, timeout).await {
                    Ok(description) if !description.identity.is_empty() => {
                        let mut identity = description.identity;
                        if !identity.presentation.is_empty() {
                            identity.presentation = resolve_url(&url, &identity.presentation);
                        }
                        return Some(identity);
                    }
                    Ok(_) => debug!("{} has no identity fields", url),
                    Err(e) => debug!("No description at {}: {}", url, e),
                }
            }
            None
        };

        match tokio::time::timeout(timeout, lookup).await {
            Ok(Some(identity)) => Ok(identity),
            Ok(None) => Err(anyhow!("no device description found under {}", base)),
            Err(_) => Err(anyhow!("identity lookup on {} timed out after {:?}", base, timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESCRIPTION: &str = r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
  <specVersion><major>1</major><minor>0</minor></specVersion>
  <device>
    <deviceType>urn:schemas-upnp-org:device:MediaRenderer:1</deviceType>
    <friendlyName>[TV] Living Room</friendlyName>
    <manufacturer>Samsung Electronics</manufacturer>
    <modelName>QE55Q60</modelName>
    <modelNumber>AllShare1.0</modelNumber>
    <UDN>uuid:0c4e2b9c-1234</UDN>
    <serviceList>
      <service>
        <serviceType>urn:schemas-upnp-org:service:RenderingControl:1</serviceType>
        <controlURL>/upnp/control/RenderingControl1</controlURL>
        <SCPDURL>/RenderingControl_1.xml</SCPDURL>
      </service>
      <service>
        <serviceType>urn:schemas-upnp-org:service:ConnectionManager:1</serviceType>
        <controlURL>/upnp/control/ConnectionManager1</controlURL>
        <SCPDURL>/ConnectionManager_1.xml</SCPDURL>
      </service>
      <service>
        <serviceType>urn:schemas-upnp-org:service:AVTransport:1</serviceType>
        <controlURL>/upnp/control/AVTransport1</controlURL>
        <SCPDURL>AVTransport_1.xml</SCPDURL>
      </service>
    </serviceList>
    <deviceList>
      <device>
        <friendlyName>Embedded</friendlyName>
      </device>
    </deviceList>
  </device>
</root>"#;

    #[test]
    fn test_parse_description() {
        let description = parse_description(DESCRIPTION).unwrap();

        assert_eq!(description.identity.friendly_name, "[TV] Living Room");
        assert_eq!(description.identity.manufacturer, "Samsung Electronics");
        assert_eq!(description.identity.model_number, "AllShare1.0");
        assert_eq!(description.identity.udn, "uuid:0c4e2b9c-1234");
        assert_eq!(description.services.len(), 3);

        let av = description.service("AVTransport").unwrap();
        assert_eq!(av.control_url, "/upnp/control/AVTransport1");
        assert!(description.service("ContentDirectory").is_none());
    }

    #[test]
    fn test_resolve_url() {
        let base = "http://192.168.1.100:8080/dmr/device.xml";

        assert_eq!(resolve_url(base, "/control"), "http://192.168.1.100:8080/control");
        assert_eq!(resolve_url(base, "service.xml"), "http://192.168.1.100:8080/dmr/service.xml");
        assert_eq!(resolve_url(base, "http://other.com/path"), "http://other.com/path");
        assert_eq!(resolve_url(base, ""), "");
    }

    #[test]
    fn test_origin() {
        assert_eq!(
            origin("http://10.0.0.5:9197/dmr/upnp/control/AVTransport1").as_deref(),
            Some("http://10.0.0.5:9197")
        );
        assert_eq!(origin("http://10.0.0.5/x").as_deref(), Some("http://10.0.0.5:80"));
        assert!(origin("not a url").is_none());
        assert_eq!(host_of("http://10.0.0.5:9197/dmr").as_deref(), Some("10.0.0.5"));
    }

    #[test]
    fn test_detect_vendor() {
        assert_eq!(detect_vendor(&["Samsung Electronics", ""]), "samsung");
        assert_eq!(detect_vendor(&["LG Electronics."]), "lg");
        assert_eq!(detect_vendor(&["", "Linux/3.0 UPnP/1.0 WebOS/4.0"]), "lg");
        assert_eq!(detect_vendor(&["Sony Corporation", "BRAVIA"]), "sony");
        assert_eq!(detect_vendor(&["Philips"]), "philips");
        assert_eq!(detect_vendor(&["Digital Media Renderer"]), "");
        assert_eq!(detect_vendor(&[]), "");
    }
}
