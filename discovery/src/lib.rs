pub mod config;
pub mod error;
pub mod events;
pub mod media;
pub mod models;
pub mod registry;
pub mod transport;
pub mod xml;
pub mod xml_decode;

// Re-export key types for easier access
pub use config::DiscoveryConfig;
pub use error::{DiscoveryError, Result};
pub use events::{DiscoveryEvent, EventPublisher};
pub use media::MediaInfo;
pub use models::{Device, DeviceId};
pub use registry::DeviceRegistry;
pub use transport::device::DeviceDescription;
pub use transport::discovery::{Discovery, DiscoveryState};
pub use transport::{DatagramSocket, NetTransport, Transport};
pub use xml::{parse, query, XmlDocument, XmlNode, XmlParseError};
pub use xml_decode::decode_payload;
