use tokio::sync::mpsc;

use crate::media::MediaInfo;
use crate::models::Device;

/// Notifications fanned out to the rest of the application
#[derive(Debug, Clone, PartialEq)]
pub enum DiscoveryEvent {
    /// The set of known devices changed; carries the full roster
    DevicesChanged(Vec<Device>),
    /// A media-state response was decoded for a known device
    MediaInfoReceived(MediaInfo),
}

impl DiscoveryEvent {
    /// Topic name used on the event bus
    pub fn topic(&self) -> &'static str {
        match self {
            DiscoveryEvent::DevicesChanged(_) => "device-roster-changed",
            DiscoveryEvent::MediaInfoReceived(_) => "media-info-received",
        }
    }
}

/// Event bus the discovery engine publishes to
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: DiscoveryEvent);
}

impl EventPublisher for mpsc::UnboundedSender<DiscoveryEvent> {
    fn publish(&self, event: DiscoveryEvent) {
        if self.send(event).is_err() {
            log::debug!("Event receiver dropped, discarding discovery event");
        }
    }
}

impl EventPublisher for mpsc::Sender<DiscoveryEvent> {
    fn publish(&self, event: DiscoveryEvent) {
        if let Err(e) = self.try_send(event) {
            log::warn!("Failed to publish {} event: {}", topic_of(&e), e);
        }
    }
}

fn topic_of(err: &mpsc::error::TrySendError<DiscoveryEvent>) -> &'static str {
    match err {
        mpsc::error::TrySendError::Full(event) | mpsc::error::TrySendError::Closed(event) => {
            event.topic()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topics() {
        assert_eq!(
            DiscoveryEvent::DevicesChanged(vec![]).topic(),
            "device-roster-changed"
        );
    }

    #[test]
    fn test_unbounded_sender_publishes() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.publish(DiscoveryEvent::DevicesChanged(vec![]));
        assert_eq!(rx.try_recv().unwrap(), DiscoveryEvent::DevicesChanged(vec![]));
    }

    #[test]
    fn test_publish_to_closed_channel_is_silent() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        tx.publish(DiscoveryEvent::DevicesChanged(vec![]));
    }
}
