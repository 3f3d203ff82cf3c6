//! SOAP 1.1 over HTTP for AVTransport and ConnectionManager.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use renderctl_core::{escape_xml, SoapAction, SoapProbe};
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, trace};

/// Per-request timeout for presence probes
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Per-request timeout for SCPD, ProtocolInfo and control calls
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Wrap an action in a SOAP 1.1 envelope. Argument values are escaped.
pub fn build_envelope(action: &SoapAction) -> String {
    let mut args = String::new();
    for (key, value) in &action.args {
        args.push_str(&format!("<{key}>{}</{key}>", escape_xml(value)));
    }

    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/">
  <s:Body>
    <u:{name} xmlns:u="{urn}">{args}</u:{name}>
  </s:Body>
</s:Envelope>"#,
        name = action.name,
        urn = action.service.urn(),
        args = args,
    )
}

/// A SOAP fault (500) still proves a SOAP processor is listening
pub fn is_present(status: StatusCode) -> bool {
    status == StatusCode::OK || status == StatusCode::INTERNAL_SERVER_ERROR
}

/// HTTP client for SOAP calls and the XML documents around them
#[derive(Clone, Debug)]
pub struct SoapClient {
    client: reqwest::Client,
    probe_timeout: Duration,
    fetch_timeout: Duration,
}

impl SoapClient {
    pub fn new(probe_timeout: Duration, fetch_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            probe_timeout,
            fetch_timeout,
        })
    }

    pub fn with_defaults() -> Result<Self> {
        Self::new(DEFAULT_PROBE_TIMEOUT, DEFAULT_FETCH_TIMEOUT)
    }

    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }

    async fn post(
        &self,
        control_url: &str,
        action: &SoapAction,
        timeout: Duration,
    ) -> reqwest::Result<reqwest::Response> {
        let body = build_envelope(action);
        trace!("SOAP {} -> {}: {}", action.name, control_url, body);

        self.client
            .post(control_url)
            .timeout(timeout)
            .header("Content-Type", "text/xml; charset=utf-8")
            .header("SOAPAction", action.header_value())
            .body(body)
            .send()
            .await
    }

    /// Invoke `action` and return the response body; faults are errors
    pub async fn call(&self, control_url: &str, action: &SoapAction) -> Result<String> {
        debug!("Sending SOAP action {} to {}", action.name, control_url);

        let response = self.post(control_url, action, self.fetch_timeout).await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(anyhow!(
                "SOAP action {} failed with status {}: {}",
                action.name,
                status,
                body
            ));
        }

        Ok(body)
    }

    /// GET a document (SCPD, device description) as text
    pub async fn get_text(&self, url: &str, timeout: Duration) -> Result<String> {
        let response = self.client.get(url).timeout(timeout).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("GET {} returned {}", url, status));
        }
        Ok(response.text().await?)
    }
}

#[async_trait]
impl SoapProbe for SoapClient {
    async fn probe(&self, control_url: &str, action: Option<&SoapAction>) -> bool {
        let default_action;
        let action = match action {
            Some(action) => action,
            None => {
                default_action = SoapAction::transport_info();
                &default_action
            }
        };

        match self.post(control_url, action, self.probe_timeout).await {
            Ok(response) => {
                let status = response.status();
                trace!("Probe {} {} -> {}", action.name, control_url, status);
                is_present(status)
            }
            Err(e) => {
                trace!("Probe {} unreachable: {}", control_url, e);
                false
            }
        }
    }
}
