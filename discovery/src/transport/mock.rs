use std::collections::HashMap;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};

use super::{DatagramSocket, Transport};
use crate::error::{DiscoveryError, Result};

/// A datagram recorded by a mock socket
#[derive(Debug, Clone)]
pub(crate) struct SentDatagram {
    pub socket: usize,
    pub payload: Vec<u8>,
    pub target: SocketAddr,
    pub at: Instant,
}

type Inbox = (
    mpsc::UnboundedSender<Vec<u8>>,
    tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
);

fn inbox() -> Inbox {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, tokio::sync::Mutex::new(rx))
}

struct MockState {
    sockets_available: bool,
    sent: Mutex<Vec<SentDatagram>>,
    descriptions: Mutex<HashMap<String, String>>,
    fetches: Mutex<Vec<String>>,
    http_delay: Mutex<Duration>,
    multicast_inbox: Inbox,
    unicast_inbox: Inbox,
    unicast_opened: AtomicUsize,
    multicast_joined: AtomicBool,
}

/// In-memory transport for exercising the discovery loop
#[derive(Clone)]
pub(crate) struct MockTransport {
    state: Arc<MockState>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::with_sockets(true)
    }

    pub fn without_sockets() -> Self {
        Self::with_sockets(false)
    }

    fn with_sockets(sockets_available: bool) -> Self {
        Self {
            state: Arc::new(MockState {
                sockets_available,
                sent: Mutex::new(Vec::new()),
                descriptions: Mutex::new(HashMap::new()),
                fetches: Mutex::new(Vec::new()),
                http_delay: Mutex::new(Duration::ZERO),
                multicast_inbox: inbox(),
                unicast_inbox: inbox(),
                unicast_opened: AtomicUsize::new(0),
                multicast_joined: AtomicBool::new(false),
            }),
        }
    }

    /// Serve `body` for GET requests to `url`
    pub fn serve(&self, url: &str, body: &str) {
        self.state
            .descriptions
            .lock()
            .unwrap()
            .insert(url.to_string(), body.to_string());
    }

    pub fn set_http_delay(&self, delay: Duration) {
        *self.state.http_delay.lock().unwrap() = delay;
    }

    /// Deliver a datagram to the multicast listener
    pub fn deliver_multicast(&self, datagram: &str) {
        self.state
            .multicast_inbox
            .0
            .send(datagram.as_bytes().to_vec())
            .unwrap();
    }

    /// Deliver a datagram to whichever search socket is listening
    pub fn deliver_unicast(&self, datagram: &str) {
        self.state
            .unicast_inbox
            .0
            .send(datagram.as_bytes().to_vec())
            .unwrap();
    }

    pub fn sent(&self) -> Vec<SentDatagram> {
        self.state.sent.lock().unwrap().clone()
    }

    pub fn fetches(&self) -> Vec<String> {
        self.state.fetches.lock().unwrap().clone()
    }

    pub fn unicast_opened(&self) -> usize {
        self.state.unicast_opened.load(Ordering::SeqCst)
    }

    pub fn multicast_joined(&self) -> bool {
        self.state.multicast_joined.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Copy)]
enum SocketKind {
    Multicast,
    Unicast,
}

struct MockSocket {
    index: usize,
    kind: SocketKind,
    state: Arc<MockState>,
}

#[async_trait]
impl DatagramSocket for MockSocket {
    async fn send_to(&self, payload: &[u8], target: SocketAddr) -> io::Result<usize> {
        self.state.sent.lock().unwrap().push(SentDatagram {
            socket: self.index,
            payload: payload.to_vec(),
            target,
            at: Instant::now(),
        });
        Ok(payload.len())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let inbox = match self.kind {
            SocketKind::Multicast => &self.state.multicast_inbox,
            SocketKind::Unicast => &self.state.unicast_inbox,
        };
        let datagram = inbox
            .1
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| io::Error::from(io::ErrorKind::BrokenPipe))?;

        buf[..datagram.len()].copy_from_slice(&datagram);
        Ok((datagram.len(), SocketAddr::from(([192, 168, 1, 100], 1900))))
    }

    fn leave_multicast(&self, _group: Ipv4Addr) -> io::Result<()> {
        self.state.multicast_joined.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn supports_sockets(&self) -> bool {
        self.state.sockets_available
    }

    async fn open_multicast(&self, _group: Ipv4Addr, _port: u16) -> io::Result<Arc<dyn DatagramSocket>> {
        self.state.multicast_joined.store(true, Ordering::SeqCst);
        Ok(Arc::new(MockSocket {
            index: 0,
            kind: SocketKind::Multicast,
            state: self.state.clone(),
        }))
    }

    async fn open_unicast(&self) -> io::Result<Arc<dyn DatagramSocket>> {
        let index = self.state.unicast_opened.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Arc::new(MockSocket {
            index,
            kind: SocketKind::Unicast,
            state: self.state.clone(),
        }))
    }

    async fn http_get(&self, url: &str) -> Result<String> {
        self.state.fetches.lock().unwrap().push(url.to_string());

        let delay = *self.state.http_delay.lock().unwrap();
        if !delay.is_zero() {
            time::sleep(delay).await;
        }

        self.state
            .descriptions
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| DiscoveryError::Http(format!("GET {} failed with status: 404 Not Found", url)))
    }
}
