//! LAN broadcast mirror.
//!
//! Every locally routed data frame is republished as a UDP datagram to a
//! broadcast address; every datagram received on the mirror port is routed
//! as if a local client had sent it. This lets several relays on one network
//! segment converge without a broker.
//!
//! Datagrams are not authenticated. The mirror is off by default and only
//! meant for a trusted private network. Each packet carries the publishing
//! node's id so a node ignores its own broadcasts when they loop back.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use parley_core::Frame;
use parley_settings::MirrorSettings;
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::MirrorError;
use crate::metrics::{MIRROR_ERRORS_TOTAL, MIRROR_PUBLISHED_TOTAL, MIRROR_RECEIVED_TOTAL};
use crate::websocket::dispatcher::Dispatcher;

/// Largest payload a UDP datagram over IPv4 can carry.
const MAX_UDP_PAYLOAD: usize = 65_507;

/// First pause after a failed receive; doubles per consecutive failure.
const RECV_BACKOFF_BASE: Duration = Duration::from_millis(10);
/// Longest pause between receive attempts.
const RECV_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Socket addresses and limits for the mirror.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MirrorConfig {
    /// Where to listen for datagrams.
    pub bind: SocketAddr,
    /// Where to send datagrams (normally a broadcast address).
    pub target: SocketAddr,
    /// Outbound channel capacity.
    pub channel_capacity: usize,
    /// Largest encoded packet that will be sent.
    pub max_datagram_bytes: usize,
}

impl MirrorConfig {
    /// Resolve addresses from settings.
    pub fn from_settings(settings: &MirrorSettings) -> Result<Self, MirrorError> {
        Ok(Self {
            bind: parse_addr(&settings.bind_host, settings.port)?,
            target: parse_addr(&settings.target_host, settings.port)?,
            channel_capacity: settings.channel_capacity,
            max_datagram_bytes: settings.max_datagram_bytes.min(MAX_UDP_PAYLOAD),
        })
    }
}

fn parse_addr(host: &str, port: u16) -> Result<SocketAddr, MirrorError> {
    host.parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, port))
        .map_err(|_| MirrorError::Address(format!("{host}:{port}")))
}

/// On-the-wire mirror datagram.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorPacket {
    /// Node that published the frame.
    pub origin: Uuid,
    /// The raw client frame.
    pub frame: Frame,
}

impl MirrorPacket {
    fn encode(&self, limit: usize) -> Result<Vec<u8>, MirrorError> {
        let bytes = serde_json::to_vec(self)?;
        if bytes.len() > limit {
            return Err(MirrorError::Oversized {
                size: bytes.len(),
                limit,
            });
        }
        Ok(bytes)
    }

    fn decode(bytes: &[u8]) -> Result<Self, MirrorError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Publishing side of the mirror, shared with every session.
#[derive(Debug)]
pub struct BroadcastMirror {
    node_id: Uuid,
    tx: Option<mpsc::Sender<Frame>>,
}

/// A running mirror and its background tasks.
pub struct MirrorHandle {
    /// Publisher to hand to sessions.
    pub mirror: Arc<BroadcastMirror>,
    /// Address the receive socket is bound to.
    pub local_addr: SocketAddr,
    /// Send and receive tasks.
    pub tasks: Vec<JoinHandle<()>>,
}

impl BroadcastMirror {
    /// A mirror that publishes nothing.
    pub fn disabled() -> Self {
        Self {
            node_id: Uuid::now_v7(),
            tx: None,
        }
    }

    /// Bind sockets and spawn the send and receive tasks.
    ///
    /// Received frames are routed through `dispatcher`. Both tasks stop when
    /// `cancel` fires.
    pub async fn start(
        config: MirrorConfig,
        dispatcher: Arc<Dispatcher>,
        cancel: CancellationToken,
    ) -> Result<MirrorHandle, MirrorError> {
        let node_id = Uuid::now_v7();

        let recv_socket = UdpSocket::bind(config.bind).await?;
        let local_addr = recv_socket.local_addr()?;

        let send_bind = match config.target.ip() {
            IpAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            IpAddr::V6(_) => SocketAddr::new(IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED), 0),
        };
        let send_socket = UdpSocket::bind(send_bind).await?;
        send_socket.set_broadcast(true)?;

        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
        let mirror = Arc::new(Self {
            node_id,
            tx: Some(tx),
        });

        let send_task = tokio::spawn(send_loop(
            send_socket,
            rx,
            node_id,
            config.target,
            config.max_datagram_bytes,
            cancel.clone(),
        ));
        let recv_task = tokio::spawn(recv_loop(recv_socket, node_id, dispatcher, cancel));

        info!(%node_id, %local_addr, target = %config.target, "broadcast mirror started");
        Ok(MirrorHandle {
            mirror,
            local_addr,
            tasks: vec![send_task, recv_task],
        })
    }

    /// This node's id, stamped on every published packet.
    pub fn node_id(&self) -> Uuid {
        self.node_id
    }

    /// Whether frames are actually being published.
    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Queue `frame` for broadcast. Waits if the channel is full.
    pub async fn publish(&self, frame: Frame) {
        let Some(tx) = &self.tx else { return };
        if tx.send(frame).await.is_err() {
            counter!(MIRROR_ERRORS_TOTAL).increment(1);
            debug!("mirror send task gone, frame not published");
        }
    }
}

async fn send_loop(
    socket: UdpSocket,
    mut rx: mpsc::Receiver<Frame>,
    origin: Uuid,
    target: SocketAddr,
    limit: usize,
    cancel: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
            () = cancel.cancelled() => break,
        };
        let packet = MirrorPacket { origin, frame };
        let bytes = match packet.encode(limit) {
            Ok(bytes) => bytes,
            Err(e) => {
                counter!(MIRROR_ERRORS_TOTAL).increment(1);
                warn!(error = %e, "mirror packet not sent");
                continue;
            }
        };
        match socket.send_to(&bytes, target).await {
            Ok(_) => counter!(MIRROR_PUBLISHED_TOTAL).increment(1),
            Err(e) => {
                counter!(MIRROR_ERRORS_TOTAL).increment(1);
                warn!(error = %e, %target, "mirror send failed");
            }
        }
    }
    debug!("mirror send loop stopped");
}

/// Capped exponential pause between failing receives.
#[derive(Debug, Default)]
struct RecvBackoff {
    failures: u32,
}

impl RecvBackoff {
    /// Record a failure and return how long to wait before the next attempt.
    fn failed(&mut self) -> Duration {
        let delay = RECV_BACKOFF_BASE
            .saturating_mul(1 << self.failures.min(16))
            .min(RECV_BACKOFF_MAX);
        self.failures = self.failures.saturating_add(1);
        delay
    }

    fn reset(&mut self) {
        self.failures = 0;
    }
}

async fn recv_loop(
    socket: UdpSocket,
    node_id: Uuid,
    dispatcher: Arc<Dispatcher>,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; MAX_UDP_PAYLOAD];
    let mut backoff = RecvBackoff::default();
    loop {
        let (len, from) = tokio::select! {
            res = socket.recv_from(&mut buf) => match res {
                Ok(received) => received,
                Err(e) => {
                    counter!(MIRROR_ERRORS_TOTAL).increment(1);
                    let delay = backoff.failed();
                    warn!(error = %e, failures = backoff.failures, ?delay, "mirror receive failed");
                    tokio::select! {
                        () = tokio::time::sleep(delay) => continue,
                        () = cancel.cancelled() => break,
                    }
                }
            },
            () = cancel.cancelled() => break,
        };
        backoff.reset();
        let packet = match MirrorPacket::decode(&buf[..len]) {
            Ok(packet) => packet,
            Err(e) => {
                counter!(MIRROR_ERRORS_TOTAL).increment(1);
                debug!(error = %e, %from, "ignoring malformed mirror datagram");
                continue;
            }
        };
        if packet.origin == node_id {
            continue;
        }
        counter!(MIRROR_RECEIVED_TOTAL).increment(1);
        if let Err(e) = dispatcher.route_frame(packet.frame).await {
            warn!(error = %e, %from, origin = %packet.origin, "undecodable mirrored frame");
        }
    }
    debug!("mirror receive loop stopped");
}
