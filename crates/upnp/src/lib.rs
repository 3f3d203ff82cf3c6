//! UPnP plumbing: SOAP, endpoint probing, capability enrichment, SSDP and
//! device description parsing.

pub mod avtransport;
pub mod description;
pub mod enrich;
pub mod probe;
pub mod protocol_info;
pub mod scpd;
pub mod soap;
pub mod ssdp;

pub use avtransport::AvTransport;
pub use description::{detect_vendor, fetch_and_detect, host_of, origin, parse_description, HttpIdentityFetcher};
pub use enrich::Enricher;
pub use probe::ProbeScanner;
pub use soap::SoapClient;
pub use ssdp::{SsdpConfig, SsdpDiscovery};
