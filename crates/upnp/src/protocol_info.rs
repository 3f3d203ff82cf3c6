//! ConnectionManager `GetProtocolInfo`: what media a renderer will accept.

use anyhow::{anyhow, Result};
use quick_xml::events::Event;
use quick_xml::Reader;
use renderctl_core::{MediaMap, SoapAction, UpnpService};
use tracing::debug;

use crate::soap::SoapClient;

/// Turn a `Sink` value into `mime -> [profile...]`.
///
/// Each comma-separated entry is `protocol:network:mime:additional-info`;
/// entries with fewer than four fields are skipped. Profiles keep the
/// order the renderer reported them in.
pub fn parse_sink(sink: &str) -> MediaMap {
    let mut media = MediaMap::new();

    for entry in sink.split(',') {
        let fields: Vec<&str> = entry.trim().splitn(4, ':').collect();
        if fields.len() < 4 {
            continue;
        }
        let mime = fields[2].trim();
        if mime.is_empty() {
            continue;
        }
        media
            .entry(mime.to_string())
            .or_default()
            .push(fields[3].trim().to_string());
    }

    media
}

/// Pull the `Sink` text out of a `GetProtocolInfoResponse` envelope
pub fn parse_protocol_info_response(xml: &str) -> Result<String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut in_sink = false;
    let mut sink = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                in_sink = e.local_name().as_ref() == b"Sink";
                if in_sink {
                    sink = Some(String::new());
                }
            }
            Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"Sink" {
                    sink = Some(String::new());
                }
            }
            Ok(Event::Text(e)) if in_sink => {
                if let Some(sink) = sink.as_mut() {
                    sink.push_str(&e.unescape().unwrap_or_default());
                }
            }
            Ok(Event::End(_)) => in_sink = false,
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(anyhow!(
                    "ProtocolInfo parse error at position {}: {}",
                    reader.buffer_position(),
                    e
                ));
            }
            _ => {}
        }
    }

    sink.ok_or_else(|| anyhow!("GetProtocolInfo response has no Sink element"))
}

/// Ask the ConnectionManager what it can render
pub async fn fetch_media_protocols(client: &SoapClient, conn_mgr_url: &str) -> Result<MediaMap> {
    let action = SoapAction::new(UpnpService::ConnectionManager, "GetProtocolInfo");
    let body = client.call(conn_mgr_url, &action).await?;
    let sink = parse_protocol_info_response(&body)?;
    let media = parse_sink(&sink);
    debug!("{} reports {} sink MIME types", conn_mgr_url, media.len());
    Ok(media)
}
