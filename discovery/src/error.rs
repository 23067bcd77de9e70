use crate::transport::ssdp::SsdpError;
use crate::xml::XmlParseError;

/// Errors surfaced by the discovery engine
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("Socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Description parsing failed: {0}")]
    Xml(#[from] XmlParseError),

    #[error("Malformed SSDP message: {0}")]
    Ssdp(#[from] SsdpError),

    #[error("Invalid discovery configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Discovery service is no longer running")]
    ChannelClosed,
}

impl From<reqwest::Error> for DiscoveryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DiscoveryError::Http(format!("timed out: {}", err))
        } else {
            DiscoveryError::Http(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, DiscoveryError>;
