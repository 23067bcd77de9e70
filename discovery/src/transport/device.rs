use std::collections::BTreeMap;

use reqwest::Url;
use tokio::time::Instant;

use crate::models::{Device, DeviceId};
use crate::xml::{self, XmlDocument, XmlParseError, XmlParseResult};

/// Root device element of a UPnP description document
const DEVICE_PATH: &str = "/root/device";

/// Root-device fields copied into [`Device::attributes`]
const DESCRIPTIVE_FIELDS: &[&str] = &[
    "deviceType",
    "friendlyName",
    "manufacturer",
    "modelName",
    "modelNumber",
    "modelDescription",
    "serialNumber",
    "UDN",
    "roomName",
];

/// Service lists searched for the media transport service, root device first
const SERVICE_PATHS: &[&str] = &[
    "/root/device/serviceList/service",
    "/root/device/deviceList/device/serviceList/service",
];

const MEDIA_STATE_SERVICE: &str = "urn:schemas-upnp-org:service:AVTransport:";

/// Fields extracted from a device description document
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceDescription {
    pub attributes: BTreeMap<String, String>,
    pub media_state_url: Option<String>,
}

impl DeviceDescription {
    /// Parse a description document fetched from `location`
    pub fn from_xml(xml: &str, location: &str) -> XmlParseResult<Self> {
        let document = xml::parse(xml)?;
        Self::from_document(&document, location)
    }

    pub fn from_document(document: &XmlDocument, location: &str) -> XmlParseResult<Self> {
        let device = document
            .query(DEVICE_PATH)
            .into_iter()
            .next()
            .ok_or_else(|| XmlParseError::MissingElement {
                element: DEVICE_PATH.to_string(),
            })?;

        let attributes: BTreeMap<String, String> = DESCRIPTIVE_FIELDS
            .iter()
            .filter_map(|field| {
                device
                    .child_text(field)
                    .map(|value| (field.to_string(), value.trim().to_string()))
            })
            .collect();

        let base = document.query_text("/root/URLBase").unwrap_or(location);
        let media_state_url = SERVICE_PATHS
            .iter()
            .flat_map(|path| document.query(path))
            .find(|service| {
                service
                    .child_text("serviceType")
                    .is_some_and(|st| st.trim().starts_with(MEDIA_STATE_SERVICE))
            })
            .and_then(|service| service.child_text("controlURL"))
            .and_then(|control| resolve_url(base, control.trim()));

        Ok(Self {
            attributes,
            media_state_url,
        })
    }

    /// Build the registry entry for this description
    pub fn into_device(self, id: DeviceId, info_url: String, fetched_at: Instant) -> Device {
        Device {
            id,
            info_url,
            media_state_url: self.media_state_url,
            last_updated: fetched_at,
            attributes: self.attributes,
        }
    }
}

/// Resolve a possibly relative service URL against the description base
pub fn resolve_url(base: &str, path: &str) -> Option<String> {
    match Url::parse(base).and_then(|base| base.join(path)) {
        Ok(url) => Some(url.to_string()),
        Err(e) => {
            log::debug!("Cannot resolve {} against {}: {}", path, base, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCATION: &str = "http://192.168.1.100:1400/xml/device_description.xml";

    #[test]
    fn test_description_from_xml() {
        let xml = include_str!("../../tests/fixtures/sonos_one_device.xml");

        let description = DeviceDescription::from_xml(xml, LOCATION).unwrap();

        assert_eq!(description.attributes["friendlyName"], "192.168.1.100 - Sonos One");
        assert_eq!(description.attributes["manufacturer"], "Sonos, Inc.");
        assert_eq!(description.attributes["modelName"], "Sonos One");
        assert_eq!(description.attributes["UDN"], "uuid:RINCON_000E58A0123456");
        assert_eq!(description.attributes["roomName"], "Living Room");
        assert_eq!(
            description.media_state_url.as_deref(),
            Some("http://192.168.1.100:1400/MediaRenderer/AVTransport/Control")
        );
    }

    #[test]
    fn test_description_prefers_url_base() {
        let xml = include_str!("../../tests/fixtures/media_renderer_device.xml");

        let description = DeviceDescription::from_xml(xml, "http://10.0.0.9:49152/desc.xml").unwrap();

        assert_eq!(description.attributes["friendlyName"], "Kitchen Renderer");
        assert!(!description.attributes.contains_key("roomName"));
        assert_eq!(
            description.media_state_url.as_deref(),
            Some("http://10.0.0.9:8200/upnp/control/avt")
        );
    }

    #[test]
    fn test_description_without_transport_service() {
        let xml = "<root><device><friendlyName>Router</friendlyName>\
            <serviceList><service><serviceType>urn:schemas-upnp-org:service:Layer3Forwarding:1</serviceType>\
            <controlURL>/ctl</controlURL></service></serviceList></device></root>";

        let description = DeviceDescription::from_xml(xml, LOCATION).unwrap();
        assert_eq!(description.attributes["friendlyName"], "Router");
        assert_eq!(description.media_state_url, None);
    }

    #[test]
    fn test_description_missing_device_is_error() {
        let result = DeviceDescription::from_xml("<root><specVersion/></root>", LOCATION);
        assert_eq!(
            result,
            Err(XmlParseError::MissingElement {
                element: "/root/device".to_string()
            })
        );
        assert!(DeviceDescription::from_xml("not valid xml", LOCATION).is_err());
    }

    #[test]
    fn test_into_device_carries_location() {
        let xml = include_str!("../../tests/fixtures/sonos_one_device.xml");
        let now = Instant::now();

        let device = DeviceDescription::from_xml(xml, LOCATION)
            .unwrap()
            .into_device(DeviceId::new("RINCON_000E58A0123456"), LOCATION.to_string(), now);

        assert_eq!(device.info_url, LOCATION);
        assert_eq!(device.last_updated, now);
        assert_eq!(device.friendly_name(), Some("192.168.1.100 - Sonos One"));
        assert_eq!(device.model_name(), Some("Sonos One"));
    }

    #[test]
    fn test_resolve_url() {
        assert_eq!(
            resolve_url(LOCATION, "/MediaRenderer/AVTransport/Control").as_deref(),
            Some("http://192.168.1.100:1400/MediaRenderer/AVTransport/Control")
        );
        assert_eq!(
            resolve_url(LOCATION, "http://other:1/x").as_deref(),
            Some("http://other:1/x")
        );
        assert_eq!(resolve_url("not a url", "/x"), None);
    }
}
