//! Discovery lifecycle.
//!
//! A single actor task owns the [`DeviceRegistry`] and the multicast
//! listener. API calls, received datagrams, description fetch completions
//! and timers all reach it as messages on one channel, so registry
//! mutations are serialized without locks.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use super::device::DeviceDescription;
use super::ssdp::{self, AdvertisementType, SsdpError};
use super::{DatagramSocket, Transport};
use crate::config::DiscoveryConfig;
use crate::error::{DiscoveryError, Result};
use crate::events::{DiscoveryEvent, EventPublisher};
use crate::media::MediaInfo;
use crate::models::{Device, DeviceId};
use crate::registry::DeviceRegistry;

/// Largest datagram read from a socket
const MAX_DATAGRAM: usize = 8192;

/// Lifecycle state of the discovery engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryState {
    Stopped,
    Starting,
    Running,
}

enum Message {
    Start(oneshot::Sender<Result<()>>),
    Stop(oneshot::Sender<()>),
    Discover,
    ScheduledBurst {
        run: u64,
    },
    Devices(oneshot::Sender<Vec<Device>>),
    State(oneshot::Sender<DiscoveryState>),
    LastError(oneshot::Sender<Option<String>>),
    MediaInfo {
        id: DeviceId,
        body: String,
    },
    Notification(Vec<u8>),
    SearchResponse(Vec<u8>),
    DetailFetched {
        id: DeviceId,
        location: String,
        token: u64,
        outcome: Result<String>,
        fetched_at: Instant,
    },
    Sweep {
        run: u64,
    },
    Shutdown,
}

/// Handle to a running discovery engine.
///
/// Cheap to call from any task; every method is a message to the engine.
/// Dropping the handle shuts the engine down.
///
/// ```no_run
/// use upnp_discovery::{Discovery, DiscoveryConfig, DiscoveryEvent, NetTransport};
///
/// # async fn run() -> upnp_discovery::Result<()> {
/// let config = DiscoveryConfig::default();
/// let transport = NetTransport::new(config.http_timeout)?;
/// let (events, mut rx) = tokio::sync::mpsc::unbounded_channel();
///
/// let discovery = Discovery::new(config, transport, events)?;
/// discovery.start().await?;
///
/// while let Some(DiscoveryEvent::DevicesChanged(devices)) = rx.recv().await {
///     println!("{} device(s)", devices.len());
/// }
/// # Ok(())
/// # }
/// ```
pub struct Discovery {
    tx: mpsc::UnboundedSender<Message>,
}

impl Discovery {
    /// Create the engine in the `Stopped` state. Must be called within a
    /// tokio runtime.
    pub fn new<T, P>(config: DiscoveryConfig, transport: T, publisher: P) -> Result<Self>
    where
        T: Transport,
        P: EventPublisher + 'static,
    {
        config
            .validate()
            .map_err(DiscoveryError::InvalidConfiguration)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let publisher: Arc<dyn EventPublisher> = Arc::new(publisher);

        let engine = Engine {
            registry: DeviceRegistry::new(config.max_lifetime, publisher.clone()),
            publisher,
            transport: Arc::new(transport),
            config,
            tx: tx.clone(),
            state: DiscoveryState::Stopped,
            run: 0,
            active_run: Arc::new(AtomicU64::new(0)),
            multicast: None,
            pending: HashMap::new(),
            next_fetch: 0,
            sweep_armed: false,
            last_error: None,
        };
        tokio::spawn(engine.run(rx));

        Ok(Self { tx })
    }

    /// Join the multicast group and begin discovery.
    ///
    /// Publishes the current roster, then issues the configured bursts.
    /// Starting an engine that is already running does nothing.
    pub async fn start(&self) -> Result<()> {
        self.request(Message::Start).await?
    }

    /// Leave the multicast group. Results that arrive afterwards are ignored.
    pub async fn stop(&self) -> Result<()> {
        self.request(Message::Stop).await
    }

    /// Issue one discovery burst now
    pub fn discover(&self) -> Result<()> {
        self.send(Message::Discover)
    }

    /// Snapshot of the known devices in discovery order
    pub async fn devices(&self) -> Result<Vec<Device>> {
        self.request(Message::Devices).await
    }

    pub async fn state(&self) -> Result<DiscoveryState> {
        self.request(Message::State).await
    }

    /// Reason the last start attempt failed, if it did
    pub async fn last_error(&self) -> Result<Option<String>> {
        self.request(Message::LastError).await
    }

    /// Hand over a media-state response body for a known device.
    ///
    /// The decoded [`MediaInfo`] is published as
    /// [`DiscoveryEvent::MediaInfoReceived`].
    pub fn media_info_received(&self, id: DeviceId, body: impl Into<String>) -> Result<()> {
        self.send(Message::MediaInfo {
            id,
            body: body.into(),
        })
    }

    fn send(&self, message: Message) -> Result<()> {
        self.tx
            .send(message)
            .map_err(|_| DiscoveryError::ChannelClosed)
    }

    async fn request<R>(&self, message: impl FnOnce(oneshot::Sender<R>) -> Message) -> Result<R> {
        let (reply, rx) = oneshot::channel();
        self.send(message(reply))?;
        rx.await.map_err(|_| DiscoveryError::ChannelClosed)
    }
}

impl Drop for Discovery {
    fn drop(&mut self) {
        let _ = self.tx.send(Message::Shutdown);
    }
}

struct MulticastListener {
    socket: Arc<dyn DatagramSocket>,
    task: JoinHandle<()>,
}

/// Timing of one discovery burst
#[derive(Clone, Copy)]
struct BurstPlan {
    target: SocketAddr,
    count: u32,
    interval: Duration,
    listen_for: Duration,
}

/// Fetch tokens issued for one id since its last goodbye
#[derive(Clone, Copy)]
struct FetchWindow {
    first: u64,
    latest: u64,
}

struct Engine {
    config: DiscoveryConfig,
    transport: Arc<dyn Transport>,
    publisher: Arc<dyn EventPublisher>,
    registry: DeviceRegistry,
    tx: mpsc::UnboundedSender<Message>,
    state: DiscoveryState,
    /// Incremented on every start; timers carry the run that scheduled them
    run: u64,
    /// Run whose bursts may keep sending, 0 while stopped
    active_run: Arc<AtomicU64>,
    multicast: Option<MulticastListener>,
    /// Ids with a description fetch in flight
    pending: HashMap<DeviceId, FetchWindow>,
    next_fetch: u64,
    sweep_armed: bool,
    last_error: Option<String>,
}

impl Engine {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Message>) {
        log::debug!("Discovery engine started");

        while let Some(message) = rx.recv().await {
            if let Message::Shutdown = message {
                self.stop();
                break;
            }
            self.handle(message).await;
        }

        log::debug!("Discovery engine terminated");
    }

    async fn handle(&mut self, message: Message) {
        match message {
            Message::Start(reply) => {
                let result = self.start().await;
                let _ = reply.send(result);
            }
            Message::Stop(reply) => {
                self.stop();
                let _ = reply.send(());
            }
            Message::Discover => self.discover(),
            Message::ScheduledBurst { run } => {
                if run == self.run {
                    self.discover();
                } else {
                    log::trace!("Ignoring burst scheduled by an earlier run");
                }
            }
            Message::Devices(reply) => {
                let _ = reply.send(self.registry.snapshot());
            }
            Message::State(reply) => {
                let _ = reply.send(self.state);
            }
            Message::LastError(reply) => {
                let _ = reply.send(self.last_error.clone());
            }
            Message::MediaInfo { id, body } => self.handle_media_info(id, &body),
            Message::Notification(datagram) => self.handle_notification(&datagram),
            Message::SearchResponse(datagram) => self.handle_search_response(&datagram),
            Message::DetailFetched {
                id,
                location,
                token,
                outcome,
                fetched_at,
            } => self.handle_detail_fetched(id, location, token, outcome, fetched_at),
            Message::Sweep { run } => {
                if run == self.run {
                    self.sweep();
                }
            }
            Message::Shutdown => {}
        }
    }

    fn is_running(&self) -> bool {
        self.state == DiscoveryState::Running
    }

    async fn start(&mut self) -> Result<()> {
        if self.state != DiscoveryState::Stopped {
            log::debug!("Discovery already running");
            return Ok(());
        }

        if !self.transport.supports_sockets() {
            return Err(self.fail_start(DiscoveryError::TransportUnavailable(
                "transport cannot open UDP sockets".to_string(),
            )));
        }

        self.state = DiscoveryState::Starting;
        let group = self.config.multicast_group;
        let port = self.config.multicast_port;

        let socket = match self.transport.open_multicast(group, port).await {
            Ok(socket) => socket,
            Err(e) => {
                self.state = DiscoveryState::Stopped;
                return Err(self.fail_start(DiscoveryError::TransportUnavailable(format!(
                    "failed to join {}:{}: {}",
                    group, port, e
                ))));
            }
        };

        let task = tokio::spawn(listen_multicast(socket.clone(), self.tx.clone()));
        self.multicast = Some(MulticastListener { socket, task });
        self.run += 1;
        self.active_run.store(self.run, Ordering::SeqCst);
        self.state = DiscoveryState::Running;
        self.last_error = None;
        log::info!(
            "Discovery started for {} on {}:{}",
            self.config.search_target,
            group,
            port
        );

        self.publisher
            .publish(DiscoveryEvent::DevicesChanged(self.registry.snapshot()));

        // Devices kept across a restart still need to decay
        if !self.registry.is_empty() {
            self.arm_sweep();
        }

        for delay in self.config.burst_delays.clone() {
            if delay.is_zero() {
                self.discover();
            } else {
                self.schedule(delay, Message::ScheduledBurst { run: self.run });
            }
        }

        Ok(())
    }

    fn fail_start(&mut self, error: DiscoveryError) -> DiscoveryError {
        log::error!("Cannot start discovery: {}", error);
        self.last_error = Some(error.to_string());
        error
    }

    fn stop(&mut self) {
        if self.state == DiscoveryState::Stopped {
            return;
        }

        self.active_run.store(0, Ordering::SeqCst);
        self.state = DiscoveryState::Stopped;
        self.pending.clear();
        self.sweep_armed = false;

        if let Some(listener) = self.multicast.take() {
            if let Err(e) = listener.socket.leave_multicast(self.config.multicast_group) {
                log::debug!("Failed to leave multicast group: {}", e);
            }
            listener.task.abort();
        }

        log::info!("Discovery stopped");
    }

    fn discover(&self) {
        if !self.is_running() {
            log::debug!("Skipping discovery burst, engine not running");
            return;
        }

        let payload = ssdp::build_discovery_request(
            self.config.multicast_addr(),
            &self.config.search_target,
            self.config.max_wait_secs,
        );
        let plan = BurstPlan {
            target: self.config.multicast_addr(),
            count: self.config.burst_count,
            interval: self.config.burst_interval,
            listen_for: self.config.search_socket_timeout,
        };

        tokio::spawn(run_burst(
            self.transport.clone(),
            payload,
            plan,
            self.run,
            self.active_run.clone(),
            self.tx.clone(),
        ));
    }

    fn handle_search_response(&mut self, datagram: &[u8]) {
        if !self.is_running() {
            return;
        }

        let response = match ssdp::parse_response(datagram) {
            Ok(response) => response,
            Err(e) => {
                log::debug!("Dropping search response: {}", e);
                return;
            }
        };

        if self.registry.contains(&response.id) || self.pending.contains_key(&response.id) {
            log::trace!("Already tracking {}", response.id);
            return;
        }

        log::debug!("Search response from {} at {}", response.id, response.location);
        self.fetch_details(response.id, response.location);
        self.arm_sweep();
    }

    fn handle_notification(&mut self, datagram: &[u8]) {
        if !self.is_running() {
            return;
        }

        let notification = match ssdp::parse_notification(datagram) {
            Ok(notification) => notification,
            Err(SsdpError::UnknownAdvertisement(kind)) => {
                log::warn!("Dropping notification with unknown subtype {}", kind);
                return;
            }
            Err(e) => {
                log::trace!("Dropping multicast datagram: {}", e);
                return;
            }
        };

        match notification.advertisement {
            AdvertisementType::Goodbye => {
                self.pending.remove(&notification.id);
                if self.registry.remove(&notification.id).is_none() {
                    log::trace!("Goodbye from unknown device {}", notification.id);
                }
            }
            AdvertisementType::Alive | AdvertisementType::Update => {
                if !self.config.accepts(notification.notification_type()) {
                    return;
                }
                if let Some(location) = notification.location {
                    log::debug!(
                        "{} from {}, refreshing description",
                        notification.advertisement.as_nts(),
                        notification.id
                    );
                    self.fetch_details(notification.id, location);
                }
            }
        }
    }

    fn fetch_details(&mut self, id: DeviceId, location: String) {
        self.next_fetch += 1;
        let token = self.next_fetch;
        self.pending
            .entry(id.clone())
            .and_modify(|window| window.latest = token)
            .or_insert(FetchWindow {
                first: token,
                latest: token,
            });

        let transport = self.transport.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let outcome = transport.http_get(&location).await;
            let _ = tx.send(Message::DetailFetched {
                id,
                location,
                token,
                outcome,
                fetched_at: Instant::now(),
            });
        });
    }

    fn handle_detail_fetched(
        &mut self,
        id: DeviceId,
        location: String,
        token: u64,
        outcome: Result<String>,
        fetched_at: Instant,
    ) {
        if !self.is_running() {
            log::debug!("Discarding description for {} received after stop", id);
            return;
        }

        // A goodbye, or a newer completion, closes the window on older fetches
        let window = match self.pending.get(&id) {
            Some(window) if token >= window.first => *window,
            _ => {
                log::debug!("Discarding superseded description fetch for {}", id);
                return;
            }
        };
        if token == window.latest {
            self.pending.remove(&id);
        }

        let body = match outcome {
            Ok(body) => body,
            Err(e) => {
                log::warn!("Failed to fetch description for {} from {}: {}", id, location, e);
                return;
            }
        };

        match DeviceDescription::from_xml(&body, &location) {
            Ok(description) => {
                self.registry
                    .upsert(description.into_device(id, location, fetched_at));
                self.arm_sweep();
            }
            Err(e) => log::warn!("Malformed description for {} at {}: {}", id, location, e),
        }
    }

    /// Make sure a decay sweep is due within one max-lifetime
    fn arm_sweep(&mut self) {
        if !self.sweep_armed {
            self.sweep_armed = true;
            self.schedule(self.config.max_lifetime, Message::Sweep { run: self.run });
        }
    }

    fn sweep(&mut self) {
        self.sweep_armed = false;
        if !self.is_running() {
            return;
        }

        for (id, info_url) in self.registry.sweep_decayed(Instant::now()) {
            self.fetch_details(id, info_url);
        }

        if !self.registry.is_empty() || !self.pending.is_empty() {
            self.arm_sweep();
        }
    }

    fn handle_media_info(&mut self, id: DeviceId, body: &str) {
        if !self.is_running() {
            return;
        }

        if !self.registry.contains(&id) {
            log::debug!("Ignoring media info for unknown device {}", id);
            return;
        }

        match MediaInfo::from_response(id, body) {
            Ok(info) => self
                .publisher
                .publish(DiscoveryEvent::MediaInfoReceived(info)),
            Err(e) => log::warn!("Malformed media info response: {}", e),
        }
    }

    fn schedule(&self, delay: Duration, message: Message) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            time::sleep(delay).await;
            let _ = tx.send(message);
        });
    }
}

async fn listen_multicast(socket: Arc<dyn DatagramSocket>, tx: mpsc::UnboundedSender<Message>) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, from)) => {
                log::trace!("Received {} bytes on multicast from {}", len, from);
                if tx.send(Message::Notification(buf[..len].to_vec())).is_err() {
                    break;
                }
            }
            Err(e) => {
                log::debug!("Multicast socket closed: {}", e);
                break;
            }
        }
    }
}

async fn run_burst(
    transport: Arc<dyn Transport>,
    payload: Bytes,
    plan: BurstPlan,
    run: u64,
    active_run: Arc<AtomicU64>,
    tx: mpsc::UnboundedSender<Message>,
) {
    let socket = match transport.open_unicast().await {
        Ok(socket) => socket,
        Err(e) => {
            log::warn!("Failed to open search socket: {}", e);
            return;
        }
    };

    // Replies arrive on the sending socket; keep listening after the last send
    tokio::spawn(listen_search_responses(socket.clone(), plan.listen_for, tx));

    for attempt in 0..plan.count {
        if attempt > 0 {
            time::sleep(plan.interval).await;
        }
        if active_run.load(Ordering::SeqCst) != run {
            log::debug!("Discovery stopped, abandoning burst");
            break;
        }
        if let Err(e) = socket.send_to(&payload, plan.target).await {
            log::debug!("Failed to send discovery request: {}", e);
        }
    }
}

async fn listen_search_responses(
    socket: Arc<dyn DatagramSocket>,
    listen_for: Duration,
    tx: mpsc::UnboundedSender<Message>,
) {
    let deadline = Instant::now() + listen_for;
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        match time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
            Err(_) => break,
            Ok(Ok((len, from))) => {
                log::trace!("Received {} byte search response from {}", len, from);
                if tx.send(Message::SearchResponse(buf[..len].to_vec())).is_err() {
                    break;
                }
            }
            Ok(Err(e)) => {
                log::debug!("Search socket closed: {}", e);
                break;
            }
        }
    }
}
