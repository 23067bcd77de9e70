use std::collections::BTreeMap;

use serde::Serialize;
use tokio::time::Instant;

const UUID_PREFIX: &str = "uuid:";

/// Stable device identifier derived from an SSDP USN
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DeviceId(String);

impl DeviceId {
    /// Creates a new DeviceId, stripping the "uuid:" prefix (any case) if present
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let normalized = match id.get(..UUID_PREFIX.len()) {
            Some(prefix) if prefix.eq_ignore_ascii_case(UUID_PREFIX) => &id[UUID_PREFIX.len()..],
            _ => id.as_str(),
        };
        Self(normalized.to_string())
    }

    /// Derive the id from a USN such as
    /// `uuid:RINCON_000E58A0123456::urn:schemas-upnp-org:device:ZonePlayer:1`.
    ///
    /// Everything from the first `::` on is the service/device type and is
    /// dropped, so every USN a device advertises maps to the same id.
    pub fn from_usn(usn: &str) -> Option<Self> {
        let udn = usn.split("::").next().unwrap_or(usn).trim();
        let id = Self::new(udn);
        if id.0.is_empty() {
            None
        } else {
            Some(id)
        }
    }

    /// Returns the ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for DeviceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A discovered device as held by the registry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Device {
    pub id: DeviceId,
    /// Location of the device description document
    pub info_url: String,
    /// Control URL of the media transport service, when the description has one
    pub media_state_url: Option<String>,
    /// When the description was last fetched successfully
    #[serde(skip)]
    pub last_updated: Instant,
    /// Descriptive fields from the description document, keyed by element name
    pub attributes: BTreeMap<String, String>,
}

impl Device {
    pub fn friendly_name(&self) -> Option<&str> {
        self.attributes.get("friendlyName").map(String::as_str)
    }

    pub fn model_name(&self) -> Option<&str> {
        self.attributes.get("modelName").map(String::as_str)
    }
}
