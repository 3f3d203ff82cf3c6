use std::time::Duration;
use thiserror::Error;

/// Failures of a resolution attempt or one of its strategies.
///
/// Only [`ResolveError::Exhausted`] is meant to reach the user as a failed
/// resolution; the other variants describe why a single strategy gave up.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// A single probe could not reach its URL
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    /// A strategy ran to completion without finding a control endpoint
    #[error("no AVTransport endpoint found: {0}")]
    NoEndpointFound(String),

    /// The probe matrix ran out of time before being exhausted
    #[error("AVTransport probe timed out after {0:?}")]
    ProbeTimeout(Duration),

    /// An SCPD, ProtocolInfo or description document could not be decoded
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The cache file exists but could not be read or decoded
    #[error("device cache unreadable: {0}")]
    CacheCorrupt(String),

    /// Interactive confirmation was rejected
    #[error("declined by user")]
    UserDeclined,

    /// Probing needs an IP and none was given or discovered
    #[error("probe requires a target IP")]
    MissingTarget,

    #[error("invalid subnet {cidr}: {reason}")]
    InvalidSubnet { cidr: String, reason: String },

    /// Interrupted by the shared cancellation token
    #[error("resolution cancelled")]
    Cancelled,

    /// SSDP, cache and probe all failed
    #[error("unable to resolve an AVTransport endpoint")]
    Exhausted,
}

impl ResolveError {
    /// Machine-readable code, stable across message changes
    pub fn code(&self) -> &'static str {
        match self {
            Self::NetworkUnreachable(_) => "network_unreachable",
            Self::NoEndpointFound(_) => "no_endpoint_found",
            Self::ProbeTimeout(_) => "probe_timeout",
            Self::MalformedResponse(_) => "malformed_response",
            Self::CacheCorrupt(_) => "cache_corrupt",
            Self::UserDeclined => "user_declined",
            Self::MissingTarget => "missing_target",
            Self::InvalidSubnet { .. } => "invalid_subnet",
            Self::Cancelled => "cancelled",
            Self::Exhausted => "exhausted",
        }
    }

    /// True when the error only ends the current strategy
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::Exhausted | Self::Cancelled | Self::InvalidSubnet { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_distinct_from_not_found() {
        let timeout = ResolveError::ProbeTimeout(Duration::from_secs(8));
        let missing = ResolveError::NoEndpointFound("10.0.0.2".into());
        assert_ne!(timeout.code(), missing.code());
        assert!(timeout.is_recoverable());
        assert!(!ResolveError::Exhausted.is_recoverable());
    }
}
