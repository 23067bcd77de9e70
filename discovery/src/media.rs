use std::collections::BTreeMap;

use crate::models::DeviceId;
use crate::xml::{self, XmlDocument, XmlParseError, XmlParseResult};
use crate::xml_decode::decode_payload;

const BODY_PATH: &str = "/Envelope/Body";

/// Decoded media-state response for one device.
///
/// The SOAP request itself is issued elsewhere; this only reads the
/// response body. `fields` holds the children of the action response
/// element (for example `CurrentURI` under `GetMediaInfoResponse`).
#[derive(Debug, Clone, PartialEq)]
pub struct MediaInfo {
    pub device_id: DeviceId,
    pub action: String,
    pub fields: BTreeMap<String, String>,
}

impl MediaInfo {
    pub fn from_response(device_id: DeviceId, body: &str) -> XmlParseResult<Self> {
        let document = xml::parse(body)?;

        let response = document
            .query(BODY_PATH)
            .into_iter()
            .find_map(|body| body.children().next())
            .ok_or_else(|| XmlParseError::MissingElement {
                element: format!("{}/*", BODY_PATH),
            })?;

        if response.name() == "Fault" {
            let reason = response
                .child_text("faultstring")
                .unwrap_or("unspecified fault");
            return Err(XmlParseError::InvalidStructure(format!(
                "SOAP fault: {}",
                reason
            )));
        }

        let fields = response
            .children()
            .map(|field| {
                (
                    field.name().to_string(),
                    field.text().unwrap_or_default().to_string(),
                )
            })
            .collect();

        Ok(Self {
            device_id,
            action: response.name().to_string(),
            fields,
        })
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Parse an embedded metadata document such as `CurrentURIMetaData`.
    ///
    /// Values that already look like markup are parsed as they are; anything
    /// else is assumed to be double-encoded and goes through
    /// [`decode_payload`] first. Empty and `NOT_IMPLEMENTED` values yield
    /// `None`.
    pub fn metadata(&self, name: &str) -> Option<XmlParseResult<XmlDocument>> {
        let raw = self.field(name)?.trim();
        if raw.is_empty() || raw == "NOT_IMPLEMENTED" {
            return None;
        }

        if raw.starts_with('<') {
            Some(xml::parse(raw))
        } else {
            Some(xml::parse(&decode_payload(raw)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEDIA_INFO_RESPONSE: &str = r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/"><s:Body><u:GetMediaInfoResponse xmlns:u="urn:schemas-upnp-org:service:AVTransport:1"><NrTracks>12</NrTracks><MediaDuration>NOT_IMPLEMENTED</MediaDuration><CurrentURI>x-rincon-queue:RINCON_000E58A0123456#0</CurrentURI><CurrentURIMetaData>&lt;DIDL-Lite xmlns:dc=&quot;http://purl.org/dc/elements/1.1/&quot;&gt;&lt;item&gt;&lt;dc:title&gt;Queue&lt;/dc:title&gt;&lt;/item&gt;&lt;/DIDL-Lite&gt;</CurrentURIMetaData><NextURI></NextURI><NextURIMetaData>%26lt%3BDIDL-Lite%26gt%3B%26lt%3Bitem%26gt%3B%26lt%3Btitle%26gt%3BNext%26lt%3B%2Ftitle%26gt%3B%26lt%3B%2Fitem%26gt%3B%26lt%3B%2FDIDL-Lite%26gt%3B</NextURIMetaData><PlayMedium>NETWORK</PlayMedium></u:GetMediaInfoResponse></s:Body></s:Envelope>"#;

    #[test]
    fn test_from_response_reads_action_fields() {
        let info = MediaInfo::from_response(DeviceId::new("RINCON_1"), MEDIA_INFO_RESPONSE).unwrap();

        assert_eq!(info.action, "GetMediaInfoResponse");
        assert_eq!(info.field("NrTracks"), Some("12"));
        assert_eq!(info.field("CurrentURI"), Some("x-rincon-queue:RINCON_000E58A0123456#0"));
        assert_eq!(info.field("NextURI"), Some(""));
        assert_eq!(info.field("Missing"), None);
    }

    #[test]
    fn test_metadata_from_escaped_markup() {
        let info = MediaInfo::from_response(DeviceId::new("RINCON_1"), MEDIA_INFO_RESPONSE).unwrap();

        let didl = info.metadata("CurrentURIMetaData").unwrap().unwrap();
        assert_eq!(didl.query_text("/DIDL-Lite/item/title"), Some("Queue"));
    }

    #[test]
    fn test_metadata_from_double_encoded_payload() {
        let info = MediaInfo::from_response(DeviceId::new("RINCON_1"), MEDIA_INFO_RESPONSE).unwrap();

        let didl = info.metadata("NextURIMetaData").unwrap().unwrap();
        assert_eq!(didl.query_text("/DIDL-Lite/item/title"), Some("Next"));
    }

    #[test]
    fn test_metadata_skips_placeholders() {
        let info = MediaInfo::from_response(DeviceId::new("RINCON_1"), MEDIA_INFO_RESPONSE).unwrap();

        assert!(info.metadata("NextURI").is_none());
        assert!(info.metadata("MediaDuration").is_none());
        assert!(info.metadata("Missing").is_none());
    }

    #[test]
    fn test_from_response_soap_fault() {
        let fault = r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body><s:Fault><faultcode>s:Client</faultcode><faultstring>UPnPError</faultstring></s:Fault></s:Body></s:Envelope>"#;

        let result = MediaInfo::from_response(DeviceId::new("RINCON_1"), fault);
        assert_eq!(
            result,
            Err(XmlParseError::InvalidStructure("SOAP fault: UPnPError".to_string()))
        );
    }

    #[test]
    fn test_from_response_without_body() {
        let result = MediaInfo::from_response(DeviceId::new("RINCON_1"), "<Envelope/>");
        assert!(matches!(result, Err(XmlParseError::MissingElement { .. })));
    }
}
