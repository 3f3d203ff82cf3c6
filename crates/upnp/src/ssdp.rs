//! SSDP discovery of AVTransport renderers.
//!
//! Two modes share the parsing code:
//!
//! - **Passive**: join 239.255.255.250:1900 and keep `ssdp:alive` NOTIFY
//!   announcements for a bounded window.
//! - **Active**: send `M-SEARCH` for each search target in turn and stop at
//!   the first target that produced a device.
//!
//! Both stop early when the shared cancellation token fires.

use anyhow::Result;
use async_trait::async_trait;
use renderctl_core::{DetectedDevice, DeviceDiscovery, SsdpDevice};
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::HashSet;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::description;
use crate::soap::SoapClient;

pub const SSDP_MULTICAST: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);
pub const SSDP_PORT: u16 = 1900;
const SSDP_ADDR: &str = "239.255.255.250:1900";
const SSDP_MX: u8 = 3;

/// Each M-SEARCH is sent this many times to survive packet loss
const SEND_REPEATS: usize = 2;

/// Search targets, most specific first
pub const SEARCH_TARGETS: &[&str] = &[
    "urn:schemas-upnp-org:device:MediaRenderer:1",
    "urn:schemas-upnp-org:device:MediaRenderer:2",
    "urn:schemas-upnp-org:service:AVTransport:1",
    "urn:schemas-upnp-org:service:RenderingControl:1",
    "urn:schemas-upnp-org:service:ConnectionManager:1",
    "urn:dial-multiscreen-org:service:dial:1",
    "urn:schemas-upnp-org:device:MediaServer:1",
    "ssdp:all",
];

#[derive(Debug, Clone)]
pub struct SsdpConfig {
    /// How long to listen for NOTIFY announcements
    pub listen_window: Duration,
    /// How long to collect responses for each search target
    pub search_window: Duration,
    /// Gap between repeated M-SEARCH packets
    pub resend_delay: Duration,
}

impl Default for SsdpConfig {
    fn default() -> Self {
        Self {
            listen_window: Duration::from_secs(3),
            search_window: Duration::from_secs(3),
            resend_delay: Duration::from_millis(150),
        }
    }
}

pub fn build_msearch(search_target: &str) -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: {}\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: {}\r\n\
         ST: {}\r\n\r\n",
        SSDP_ADDR, SSDP_MX, search_target
    )
}

/// Value of `name:` on a header line, ASCII case-insensitive
fn header_value<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let (key, value) = line.split_once(':')?;
    key.trim()
        .eq_ignore_ascii_case(name)
        .then(|| value.trim())
}

/// Extract LOCATION, SERVER and USN from a NOTIFY or search response
pub fn parse_ssdp(message: &str) -> SsdpDevice {
    let mut device = SsdpDevice::default();

    for line in message.lines() {
        if let Some(v) = header_value(line, "LOCATION") {
            device.location = v.to_string();
        } else if let Some(v) = header_value(line, "SERVER") {
            device.server = v.to_string();
        } else if let Some(v) = header_value(line, "USN") {
            device.usn = v.to_string();
        }
    }

    device
}

/// True for `NOTIFY` messages announcing `ssdp:alive`
pub fn is_alive_notify(message: &str) -> bool {
    let first = message.lines().next().unwrap_or("");
    first.len() >= 6
        && first.as_bytes()[..6].eq_ignore_ascii_case(b"NOTIFY")
        && message
            .lines()
            .filter_map(|line| header_value(line, "NTS"))
            .any(|nts| nts.eq_ignore_ascii_case("ssdp:alive"))
}

/// Socket joined to the SSDP multicast group on port 1900
fn multicast_listener() -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, SSDP_PORT));
    socket.bind(&addr.into())?;
    socket.join_multicast_v4(&SSDP_MULTICAST, &Ipv4Addr::UNSPECIFIED)?;
    socket.set_nonblocking(true)?;

    UdpSocket::from_std(socket.into())
}

/// Ephemeral socket for M-SEARCH; replies come back unicast
fn search_socket() -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_multicast_ttl_v4(2)?;

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0));
    socket.bind(&addr.into())?;
    socket.set_nonblocking(true)?;

    UdpSocket::from_std(socket.into())
}

/// Read datagrams until `deadline` or cancellation, keeping devices the
/// filter accepts and whose LOCATION is new
async fn collect(
    socket: &UdpSocket,
    deadline: Instant,
    cancel: &CancellationToken,
    accept: fn(&str) -> bool,
    seen: &mut HashSet<String>,
    found: &mut Vec<SsdpDevice>,
) {
    let mut buf = [0u8; 2048];

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("SSDP collection cancelled");
                return;
            }
            _ = sleep_until(deadline) => return,
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, from)) => {
                    let message = String::from_utf8_lossy(&buf[..len]);
                    trace!("SSDP datagram from {} ({} bytes)", from, len);
                    if !accept(&message) {
                        continue;
                    }
                    let device = parse_ssdp(&message);
                    if device.location.is_empty() {
                        continue;
                    }
                    if seen.insert(device.location.clone()) {
                        info!("SSDP device: {}", device.location);
                        found.push(device);
                    }
                }
                Err(e) => {
                    warn!("SSDP receive error: {}", e);
                    return;
                }
            }
        }
    }
}

/// Passive listen for `ssdp:alive` announcements
pub async fn listen_notify(window: Duration, cancel: &CancellationToken) -> io::Result<Vec<SsdpDevice>> {
    info!("Listening for SSDP NOTIFY ({:?})", window);

    let socket = multicast_listener()?;
    let mut seen = HashSet::new();
    let mut found = Vec::new();

    collect(&socket, Instant::now() + window, cancel, is_alive_notify, &mut seen, &mut found).await;

    info!("SSDP NOTIFY finished, {} device(s)", found.len());
    Ok(found)
}

/// Active M-SEARCH over [`SEARCH_TARGETS`], in order, stopping at the first
/// target that yields a device
pub async fn search(config: &SsdpConfig, cancel: &CancellationToken) -> io::Result<Vec<SsdpDevice>> {
    let socket = search_socket()?;
    let group = SocketAddr::from((SSDP_MULTICAST, SSDP_PORT));
    Ok(search_on(&socket, group, config, cancel).await)
}

async fn search_on(
    socket: &UdpSocket,
    dest: SocketAddr,
    config: &SsdpConfig,
    cancel: &CancellationToken,
) -> Vec<SsdpDevice> {
    let mut seen = HashSet::new();
    let mut found = Vec::new();

    for st in SEARCH_TARGETS {
        if cancel.is_cancelled() {
            break;
        }

        debug!("M-SEARCH for {}", st);
        let message = build_msearch(st);
        for attempt in 0..SEND_REPEATS {
            if let Err(e) = socket.send_to(message.as_bytes(), dest).await {
                warn!("Failed to send M-SEARCH ({}/{}) for {}: {}", attempt + 1, SEND_REPEATS, st, e);
            }
            sleep(config.resend_delay).await;
        }

        let deadline = Instant::now() + config.search_window;
        collect(socket, deadline, cancel, |_| true, &mut seen, &mut found).await;

        if !found.is_empty() {
            debug!("SSDP search satisfied by {}", st);
            break;
        }
    }

    info!("SSDP search finished, {} unique device(s)", found.len());
    found
}

/// [`DeviceDiscovery`] over the real network
pub struct SsdpDiscovery {
    config: SsdpConfig,
    client: SoapClient,
}

impl SsdpDiscovery {
    pub fn new(config: SsdpConfig, client: SoapClient) -> Self {
        Self { config, client }
    }
}

#[async_trait]
impl DeviceDiscovery for SsdpDiscovery {
    async fn discover(&self, cancel: &CancellationToken) -> Vec<SsdpDevice> {
        let notified = match listen_notify(self.config.listen_window, cancel).await {
            Ok(devices) => devices,
            Err(e) => {
                warn!("SSDP listen unavailable: {}", e);
                Vec::new()
            }
        };
        if !notified.is_empty() || cancel.is_cancelled() {
            return notified;
        }

        info!("No NOTIFY announcements, trying M-SEARCH");
        match search(&self.config, cancel).await {
            Ok(devices) => devices,
            Err(e) => {
                warn!("SSDP search unavailable: {}", e);
                Vec::new()
            }
        }
    }

    async fn fetch_and_detect(&self, device: &SsdpDevice) -> Result<DetectedDevice> {
        description::fetch_and_detect(&self.client, device).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    const NOTIFY: &str = "NOTIFY * HTTP/1.1\r\n\
        HOST: 239.255.255.250:1900\r\n\
        CACHE-CONTROL: max-age=1800\r\n\
        Location: http://192.168.1.20:9197/dmr\r\n\
        NT: urn:schemas-upnp-org:device:MediaRenderer:1\r\n\
        NTS: ssdp:alive\r\n\
        SERVER: Samsung-Linux/4.1, UPnP/1.0, Samsung_UPnP_SDK/1.0\r\n\
        USN: uuid:abc::urn:schemas-upnp-org:device:MediaRenderer:1\r\n\r\n";

    #[test]
    fn test_build_msearch() {
        let msg = build_msearch("ssdp:all");
        assert!(msg.starts_with("M-SEARCH * HTTP/1.1\r\n"));
        assert!(msg.contains("MAN: \"ssdp:discover\"\r\n"));
        assert!(msg.contains("MX: 3\r\n"));
        assert!(msg.ends_with("ST: ssdp:all\r\n\r\n"));
    }

    #[test]
    fn test_parse_ssdp_headers_case_insensitive() {
        let device = parse_ssdp(NOTIFY);
        assert_eq!(device.location, "http://192.168.1.20:9197/dmr");
        assert!(device.server.starts_with("Samsung-Linux"));
        assert_eq!(device.usn, "uuid:abc::urn:schemas-upnp-org:device:MediaRenderer:1");
    }

    #[test]
    fn test_alive_filter() {
        assert!(is_alive_notify(NOTIFY));
        assert!(!is_alive_notify(&NOTIFY.replace("ssdp:alive", "ssdp:byebye")));

        let response = "HTTP/1.1 200 OK\r\nLOCATION: http://h/d.xml\r\nST: ssdp:all\r\n\r\n";
        assert!(!is_alive_notify(response));
        assert_eq!(parse_ssdp(response).location, "http://h/d.xml");
    }

    #[test]
    fn test_search_target_order() {
        assert_eq!(SEARCH_TARGETS.len(), 8);
        assert_eq!(SEARCH_TARGETS[0], "urn:schemas-upnp-org:device:MediaRenderer:1");
        assert_eq!(SEARCH_TARGETS[7], "ssdp:all");
    }

    async fn loopback() -> UdpSocket {
        UdpSocket::bind("127.0.0.1:0").await.unwrap()
    }

    #[tokio::test]
    async fn test_collect_keeps_alive_and_dedupes_location() {
        let receiver = loopback().await;
        let sender = loopback().await;
        let to = receiver.local_addr().unwrap();

        let other = NOTIFY.replace("192.168.1.20:9197/dmr", "192.168.1.30:7678/desc.xml");
        let byebye = NOTIFY.replace("ssdp:alive", "ssdp:byebye").replace("192.168.1.20", "192.168.1.40");
        for message in [NOTIFY, NOTIFY, byebye.as_str(), other.as_str(), "garbage"] {
            sender.send_to(message.as_bytes(), to).await.unwrap();
        }

        let mut seen = HashSet::new();
        let mut found = Vec::new();
        let deadline = Instant::now() + Duration::from_millis(300);
        collect(&receiver, deadline, &CancellationToken::new(), is_alive_notify, &mut seen, &mut found).await;

        let locations: Vec<&str> = found.iter().map(|d| d.location.as_str()).collect();
        assert_eq!(
            locations,
            vec!["http://192.168.1.20:9197/dmr", "http://192.168.1.30:7678/desc.xml"]
        );
    }

    #[tokio::test]
    async fn test_collect_returns_on_cancel() {
        let receiver = loopback().await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut seen = HashSet::new();
        let mut found = Vec::new();
        let started = Instant::now();
        collect(&receiver, started + Duration::from_secs(30), &cancel, |_| true, &mut seen, &mut found).await;

        assert!(found.is_empty());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_search_stops_at_first_answered_target() {
        let renderer = loopback().await;
        let renderer_addr = renderer.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));

        // answers only MediaRenderer:2, twice with the same LOCATION
        let log = received.clone();
        tokio::spawn(async move {
            let mut buf = [0u8; 2048];
            while let Ok((len, from)) = renderer.recv_from(&mut buf).await {
                let message = String::from_utf8_lossy(&buf[..len]).to_string();
                let st = message
                    .lines()
                    .find_map(|line| header_value(line, "ST"))
                    .unwrap_or_default()
                    .to_string();
                log.lock().unwrap().push(st.clone());
                if st == SEARCH_TARGETS[1] {
                    let reply = format!(
                        "HTTP/1.1 200 OK\r\nST: {}\r\nLOCATION: http://127.0.0.1:8080/desc.xml\r\nUSN: uuid:tv\r\n\r\n",
                        st
                    );
                    let _ = renderer.send_to(reply.as_bytes(), from).await;
                }
            }
        });

        let config = SsdpConfig {
            listen_window: Duration::from_millis(50),
            search_window: Duration::from_millis(300),
            resend_delay: Duration::from_millis(10),
        };
        let socket = loopback().await;
        let found = search_on(&socket, renderer_addr, &config, &CancellationToken::new()).await;

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].location, "http://127.0.0.1:8080/desc.xml");

        let sent = received.lock().unwrap().clone();
        assert_eq!(
            sent,
            vec![SEARCH_TARGETS[0], SEARCH_TARGETS[0], SEARCH_TARGETS[1], SEARCH_TARGETS[1]]
        );
    }

    #[test]
    fn test_header_value_keeps_colons() {
        assert_eq!(
            header_value("location: http://10.0.0.1:80/x", "LOCATION"),
            Some("http://10.0.0.1:80/x")
        );
        assert_eq!(header_value("no header here", "LOCATION"), None);
    }
}
