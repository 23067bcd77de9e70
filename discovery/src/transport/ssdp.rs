use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::Bytes;

use crate::models::DeviceId;

/// Reasons a datagram was not accepted as an SSDP message
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SsdpError {
    #[error("datagram is not valid UTF-8")]
    NotUtf8,

    #[error("unexpected start line: {0:?}")]
    UnexpectedStartLine(String),

    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    #[error("unknown advertisement subtype: {0}")]
    UnknownAdvertisement(String),
}

/// Notification subtype carried in the NTS header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdvertisementType {
    Alive,
    Update,
    Goodbye,
}

impl AdvertisementType {
    fn from_nts(value: &str) -> Result<Self, SsdpError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ssdp:alive" => Ok(AdvertisementType::Alive),
            "ssdp:update" => Ok(AdvertisementType::Update),
            "ssdp:byebye" => Ok(AdvertisementType::Goodbye),
            _ => Err(SsdpError::UnknownAdvertisement(value.trim().to_string())),
        }
    }

    pub fn as_nts(&self) -> &'static str {
        match self {
            AdvertisementType::Alive => "ssdp:alive",
            AdvertisementType::Update => "ssdp:update",
            AdvertisementType::Goodbye => "ssdp:byebye",
        }
    }
}

/// Header block of an SSDP message; names compare case-insensitively
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Headers {
    values: HashMap<String, String>,
}

impl Headers {
    /// Parse `Name: Value` lines. Lines without a colon are skipped; a
    /// repeated header keeps its first value.
    pub fn parse<'a>(lines: impl Iterator<Item = &'a str>) -> Self {
        let mut values = HashMap::new();
        for line in lines {
            if let Some((name, value)) = line.split_once(':') {
                let name = name.trim();
                if name.is_empty() {
                    continue;
                }
                values
                    .entry(name.to_ascii_uppercase())
                    .or_insert_with(|| value.trim().to_string());
            }
        }
        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .get(&name.to_ascii_uppercase())
            .map(String::as_str)
    }

    /// Like [`get`](Self::get) but treats blank values as absent
    fn require(&self, name: &'static str) -> Result<&str, SsdpError> {
        self.get(name)
            .filter(|value| !value.is_empty())
            .ok_or(SsdpError::MissingHeader(name))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Reply to a discovery request
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResponse {
    pub headers: Headers,
    pub id: DeviceId,
    pub location: String,
}

impl SearchResponse {
    pub fn search_target(&self) -> Option<&str> {
        self.headers.get("ST")
    }
}

/// Unsolicited multicast advertisement
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub headers: Headers,
    pub id: DeviceId,
    pub advertisement: AdvertisementType,
    /// Always present for alive and update; goodbyes usually omit it
    pub location: Option<String>,
}

impl Notification {
    pub fn notification_type(&self) -> Option<&str> {
        self.headers.get("NT")
    }
}

/// Build an M-SEARCH request addressed to the multicast group
pub fn build_discovery_request(multicast: SocketAddr, search_target: &str, max_wait_secs: u8) -> Bytes {
    let request = format!(
        "M-SEARCH * HTTP/1.1\r\n\
        HOST: {}\r\n\
        MAN: \"ssdp:discover\"\r\n\
        MX: {}\r\n\
        ST: {}\r\n\
        \r\n",
        multicast, max_wait_secs, search_target
    );
    Bytes::from(request)
}

/// Parse a unicast reply to a discovery request
pub fn parse_response(datagram: &[u8]) -> Result<SearchResponse, SsdpError> {
    let (start_line, headers) = split_message(datagram)?;
    if !start_line.to_ascii_uppercase().starts_with("HTTP/1.1 200") {
        return Err(SsdpError::UnexpectedStartLine(start_line.to_string()));
    }

    let id = device_id(&headers)?;
    let location = headers.require("LOCATION")?.to_string();

    Ok(SearchResponse {
        headers,
        id,
        location,
    })
}

/// Parse a NOTIFY datagram received on the multicast group
pub fn parse_notification(datagram: &[u8]) -> Result<Notification, SsdpError> {
    let (start_line, headers) = split_message(datagram)?;
    if !start_line.to_ascii_uppercase().starts_with("NOTIFY ") {
        return Err(SsdpError::UnexpectedStartLine(start_line.to_string()));
    }

    let id = device_id(&headers)?;
    let advertisement = AdvertisementType::from_nts(headers.require("NTS")?)?;
    let location = match advertisement {
        AdvertisementType::Goodbye => headers
            .get("LOCATION")
            .filter(|value| !value.is_empty())
            .map(str::to_string),
        AdvertisementType::Alive | AdvertisementType::Update => {
            Some(headers.require("LOCATION")?.to_string())
        }
    };

    Ok(Notification {
        headers,
        id,
        advertisement,
        location,
    })
}

fn split_message(datagram: &[u8]) -> Result<(&str, Headers), SsdpError> {
    let text = std::str::from_utf8(datagram).map_err(|_| SsdpError::NotUtf8)?;
    let mut lines = text.lines().map(str::trim);
    let start_line = lines.next().unwrap_or_default();
    let headers = Headers::parse(lines.take_while(|line| !line.is_empty()));
    Ok((start_line, headers))
}

fn device_id(headers: &Headers) -> Result<DeviceId, SsdpError> {
    headers
        .get("USN")
        .and_then(DeviceId::from_usn)
        .ok_or(SsdpError::MissingHeader("USN"))
}
