use thiserror::Error;

/// Failures of the discovery source. None of these reach the registry; the
/// bridge only sees the resulting `SourceState`.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Failed to create mDNS daemon: {0}")]
    DaemonInit(String),

    #[error("Failed to configure interface '{interface}': {reason}")]
    Interface { interface: String, reason: String },

    #[error("Failed to browse for '{service_type}' after {attempts} attempts: {reason}")]
    Browse {
        service_type: String,
        attempts: u32,
        reason: String,
    },

    #[error("mDNS event channel disconnected")]
    Disconnected,
}
