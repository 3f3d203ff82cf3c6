//! AVTransport action discovery (SCPD) and live action validation.

use anyhow::{anyhow, Result};
use quick_xml::events::Event;
use quick_xml::Reader;
use renderctl_core::{ActionMap, SoapAction, SoapProbe};
use tracing::debug;

use crate::soap::SoapClient;

/// Side-effect-free (or trivially reversible) AVTransport actions
pub const SAFE_ACTIONS: &[&str] = &[
    // status
    "GetTransportInfo",
    "GetPositionInfo",
    "GetMediaInfo",
    "GetDeviceCapabilities",
    // settings
    "GetTransportSettings",
    // reversible control
    "Stop",
    "Pause",
];

/// Decode `actionList/action/name` from an SCPD document.
///
/// Argument names (`argumentList/argument/name`) are ignored.
pub fn parse_scpd(xml: &str) -> Result<ActionMap> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut actions = ActionMap::new();
    let mut path: Vec<String> = Vec::new();
    let mut text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                path.push(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
                text.clear();
            }
            Ok(Event::Text(e)) => {
                text.push_str(&e.unescape().unwrap_or_default());
            }
            Ok(Event::End(_)) => {
                let in_action_name = path.len() >= 3
                    && path[path.len() - 1] == "name"
                    && path[path.len() - 2] == "action"
                    && path[path.len() - 3] == "actionList";
                if in_action_name && !text.trim().is_empty() {
                    actions.insert(text.trim().to_string(), true);
                }
                path.pop();
                text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(anyhow!(
                    "SCPD parse error at position {}: {}",
                    reader.buffer_position(),
                    e
                ));
            }
            _ => {}
        }
    }

    Ok(actions)
}

/// Fetch and decode the AVTransport SCPD
pub async fn fetch_actions(client: &SoapClient, scpd_url: &str) -> Result<ActionMap> {
    let xml = client.get_text(scpd_url, client.fetch_timeout()).await?;
    let actions = parse_scpd(&xml)?;
    debug!("SCPD {} lists {} actions", scpd_url, actions.len());
    Ok(actions)
}

/// Run every [`SAFE_ACTIONS`] entry against `control_url`, recording pass/fail
pub async fn validate_actions(probe: &dyn SoapProbe, control_url: &str) -> ActionMap {
    let mut results = ActionMap::new();

    for name in SAFE_ACTIONS {
        let action = SoapAction::av_transport(*name);
        let ok = probe.probe(control_url, Some(&action)).await;
        debug!("Action {} on {}: {}", name, control_url, if ok { "ok" } else { "failed" });
        results.insert(name.to_string(), ok);
    }

    results
}
