//! WebSocket session lifecycle: one authenticated client from upgrade
//! through teardown.

use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::Message;
use futures::{Sink, SinkExt, Stream, StreamExt};
use metrics::{counter, gauge, histogram};
use parley_core::{Clock, Envelope, Frame};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::{CloseReason, Connection};
use super::dispatcher::Dispatcher;
use super::registry::Registry;
use crate::auth::Identity;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DECODE_FAILURES_TOTAL, WS_DISCONNECTIONS_TOTAL, WS_DISPLACED_TOTAL,
};
use crate::mirror::BroadcastMirror;
use crate::presence::PresenceStore;

/// How long teardown waits for the outbound loop to flush and send Close.
const OUTBOUND_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Everything a session needs besides its socket.
pub struct SessionContext {
    /// Live connections.
    pub registry: Arc<dyn Registry>,
    /// Router for data frames.
    pub dispatcher: Arc<Dispatcher>,
    /// Presence records.
    pub presence: Arc<dyn PresenceStore>,
    /// LAN mirror publisher.
    pub mirror: Arc<BroadcastMirror>,
    /// Time source for heartbeats.
    pub clock: Arc<dyn Clock>,
    /// Outbound queue capacity per connection.
    pub queue_capacity: usize,
    /// Presence record lifetime.
    pub presence_ttl: Duration,
    /// Server-wide shutdown signal.
    pub shutdown: CancellationToken,
}

/// Run a session for an authenticated client.
///
/// 1. Builds the connection and registers it, closing any connection it displaces
/// 2. Records presence
/// 3. Forwards queued frames to the socket from a separate task
/// 4. Reads inbound frames until the peer leaves, a read fails or the
///    connection is closed from elsewhere (sweep, displacement, shutdown)
/// 5. Removes itself from the registry if still current
#[instrument(skip_all, fields(user_id = %identity.user_id))]
pub async fn run_session<Tx, Rx, E>(
    sink: Tx,
    mut stream: Rx,
    identity: Identity,
    remote_addr: SocketAddr,
    ctx: Arc<SessionContext>,
) where
    Tx: Sink<Message> + Unpin + Send + 'static,
    Tx::Error: Display + Send,
    Rx: Stream<Item = Result<Message, E>> + Unpin + Send,
    E: Display + Send,
{
    let started = Instant::now();
    let (conn, rx) = Connection::new(identity, remote_addr, ctx.queue_capacity, ctx.clock.now());
    let conn = Arc::new(conn);
    let user_id = conn.owner();

    if let Some(previous) = ctx.registry.register(user_id, conn.clone()) {
        if previous.close(CloseReason::Replaced) {
            counter!(WS_DISPLACED_TOTAL).increment(1);
            info!(%user_id, previous = %previous.id(), "closing displaced connection");
        }
    }
    let _ = conn.mark_open();

    if let Err(e) = ctx
        .presence
        .set_online(user_id, &remote_addr.to_string(), ctx.presence_ttl)
        .await
    {
        warn!(%user_id, error = %e, "failed to record presence");
    }

    info!(%user_id, %remote_addr, connection_id = %conn.id(), "client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let outbound = tokio::spawn(outbound_loop(sink, rx, conn.clone()));

    loop {
        tokio::select! {
            () = conn.closed() => break,
            () = ctx.shutdown.cancelled() => {
                let _ = conn.close(CloseReason::Shutdown);
                break;
            }
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    handle_frame(&ctx, &conn, Frame::from(text.as_str())).await;
                }
                Some(Ok(Message::Binary(bytes))) => match Frame::from_bytes(&bytes) {
                    Ok(frame) => handle_frame(&ctx, &conn, frame).await,
                    Err(e) => {
                        counter!(WS_DECODE_FAILURES_TOTAL).increment(1);
                        warn!(%user_id, len = bytes.len(), error = %e, "dropping binary frame");
                    }
                },
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) | None => {
                    let _ = conn.close(CloseReason::PeerClosed);
                    break;
                }
                Some(Err(e)) => {
                    debug!(%user_id, error = %e, "read failed");
                    let _ = conn.close(CloseReason::ReadError);
                    break;
                }
            }
        }
    }

    let abort = outbound.abort_handle();
    if tokio::time::timeout(OUTBOUND_FLUSH_TIMEOUT, outbound).await.is_err() {
        abort.abort();
    }

    let removed = ctx.registry.remove_if_current(&conn);
    let reason = conn.mark_closed();
    info!(%user_id, %reason, removed, dropped = conn.drop_count(), "client disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL, "reason" => reason.as_str()).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
}

/// Write queued frames in order until the connection closes or a write fails.
///
/// On close, frames already queued are flushed before the Close frame.
async fn outbound_loop<Tx>(mut sink: Tx, mut rx: mpsc::Receiver<Frame>, conn: Arc<Connection>)
where
    Tx: Sink<Message> + Unpin,
    Tx::Error: Display,
{
    loop {
        tokio::select! {
            biased;
            () = conn.closed() => break,
            frame = rx.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = sink.send(text_message(&frame)).await {
                    debug!(user_id = %conn.owner(), error = %e, "write failed");
                    let _ = conn.close(CloseReason::WriteError);
                    return;
                }
            }
        }
    }

    rx.close();
    while let Ok(frame) = rx.try_recv() {
        if sink.send(text_message(&frame)).await.is_err() {
            return;
        }
    }
    let _ = sink.send(Message::Close(None)).await;
}

fn text_message(frame: &Frame) -> Message {
    Message::Text(frame.to_string().into())
}

async fn handle_frame(ctx: &SessionContext, conn: &Connection, frame: Frame) {
    let envelope = match Envelope::decode_frame(&frame) {
        Ok(envelope) => envelope,
        Err(e) => {
            counter!(WS_DECODE_FAILURES_TOTAL).increment(1);
            warn!(user_id = %conn.owner(), error = %e, "dropping malformed frame");
            return;
        }
    };

    // Liveness belongs to the socket that carried the frame, whatever it claims.
    if envelope.is_heartbeat() {
        conn.heartbeat(ctx.clock.now());
        return;
    }

    if envelope.sender_id() != conn.owner() {
        counter!(WS_DECODE_FAILURES_TOTAL).increment(1);
        warn!(
            user_id = %conn.owner(),
            claimed = %envelope.sender_id(),
            "dropping frame with foreign sender id"
        );
        return;
    }

    let outcome = ctx.dispatcher.route(&envelope, &frame).await;
    debug!(
        user_id = %conn.owner(),
        kind = envelope.kind().as_str(),
        queued = outcome.queued(),
        offline = outcome.offline(),
        score = ?outcome.score,
        "routed"
    );
    ctx.mirror.publish(frame).await;
}

#[cfg(test)]
mod tests {
    use futures::channel::mpsc as fmpsc;
    use parley_core::{GroupId, HistoryKey, ManualClock, UserId};
    use parley_history::{HistoryStore, MemoryHistoryStore, RangeOrder, TtlPolicy};
    use parley_logging::capture_logs;
    use tokio::task::JoinHandle;
    use tokio::time::timeout;

    use super::*;
    use crate::membership::StaticGroupMembership;
    use crate::presence::MemoryPresenceStore;
    use crate::websocket::connection::ConnectionState;
    use crate::websocket::registry::ConnectionRegistry;

    const TIMEOUT: Duration = Duration::from_secs(5);

    struct Harness {
        ctx: Arc<SessionContext>,
        registry: Arc<ConnectionRegistry>,
        history: Arc<MemoryHistoryStore>,
        presence: Arc<MemoryPresenceStore>,
        groups: Arc<StaticGroupMembership>,
        clock: Arc<ManualClock>,
    }

    /// A fake socket: frames pushed into `inbound` are read by the session,
    /// frames the session writes show up on `outbound`.
    struct Client {
        inbound: fmpsc::UnboundedSender<Result<Message, String>>,
        outbound: fmpsc::UnboundedReceiver<Message>,
        task: JoinHandle<()>,
    }

    impl Client {
        fn send(&self, envelope: &Envelope) {
            let text = envelope.encode().unwrap().to_string();
            self.inbound
                .unbounded_send(Ok(Message::Text(text.into())))
                .unwrap();
        }

        async fn recv(&mut self) -> Message {
            timeout(TIMEOUT, self.outbound.next()).await.unwrap().unwrap()
        }

        async fn recv_text(&mut self) -> String {
            match self.recv().await {
                Message::Text(text) => text.to_string(),
                other => panic!("expected text frame, got {other:?}"),
            }
        }
    }

    fn harness() -> Harness {
        let clock = Arc::new(ManualClock::default());
        let registry = Arc::new(ConnectionRegistry::new());
        let history = Arc::new(MemoryHistoryStore::with_clock(
            TtlPolicy::default(),
            clock.clone(),
        ));
        let groups = Arc::new(StaticGroupMembership::new());
        let presence = Arc::new(MemoryPresenceStore::new(clock.clone()));
        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            history.clone(),
            groups.clone(),
        ));
        let ctx = Arc::new(SessionContext {
            registry: registry.clone(),
            dispatcher,
            presence: presence.clone(),
            mirror: Arc::new(BroadcastMirror::disabled()),
            clock: clock.clone(),
            queue_capacity: 8,
            presence_ttl: Duration::from_secs(60),
            shutdown: CancellationToken::new(),
        });
        Harness {
            ctx,
            registry,
            history,
            presence,
            groups,
            clock,
        }
    }

    impl Harness {
        async fn connect(&self, user: i64) -> Client {
            let (in_tx, in_rx) = fmpsc::unbounded();
            let (out_tx, out_rx) = fmpsc::unbounded();
            let identity = Identity {
                user_id: UserId::new(user),
                username: format!("user{user}"),
            };
            let addr = SocketAddr::from(([10, 0, 0, 1], 50_000));
            let previous = self.registry.lookup(UserId::new(user)).map(|c| c.id());
            let task = tokio::spawn(run_session(out_tx, in_rx, identity, addr, self.ctx.clone()));
            timeout(TIMEOUT, async {
                while !self
                    .registry
                    .lookup(UserId::new(user))
                    .is_some_and(|c| Some(c.id()) != previous && c.state() == ConnectionState::Open)
                {
                    tokio::task::yield_now().await;
                }
            })
            .await
            .unwrap();
            Client {
                inbound: in_tx,
                outbound: out_rx,
                task,
            }
        }
    }

    #[tokio::test]
    async fn registers_and_records_presence() {
        let h = harness();
        let _client = h.connect(5).await;
        assert_eq!(h.registry.len(), 1);
        assert_eq!(
            h.presence.get_online(UserId::new(5)).await.unwrap().as_deref(),
            Some("10.0.0.1:50000")
        );
    }

    #[tokio::test]
    async fn direct_message_reaches_target_and_history() {
        let h = harness();
        let sender = h.connect(5).await;
        let mut target = h.connect(7).await;

        sender.send(&Envelope::direct(UserId::new(5), UserId::new(7), "hi"));
        let got = Envelope::decode(&target.recv_text().await).unwrap();
        assert_eq!(got.content(), "hi");
        assert_eq!(got.sender_id(), UserId::new(5));

        let key = HistoryKey::direct(UserId::new(5), UserId::new(7));
        let stored = h.history.range(&key, 0, -1, RangeOrder::Ascending).await.unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[tokio::test]
    async fn group_message_echoes_to_sender() {
        let h = harness();
        h.groups
            .set_members(GroupId::new(3), [UserId::new(1), UserId::new(2)]);
        let mut a = h.connect(1).await;
        let mut b = h.connect(2).await;

        a.send(&Envelope::group(UserId::new(1), GroupId::new(3), "team"));
        assert_eq!(Envelope::decode(&a.recv_text().await).unwrap().content(), "team");
        assert_eq!(Envelope::decode(&b.recv_text().await).unwrap().content(), "team");
    }

    #[tokio::test]
    async fn heartbeat_updates_liveness_only() {
        let h = harness();
        let client = h.connect(5).await;
        let conn = h.registry.lookup(UserId::new(5)).unwrap();

        h.clock.advance(Duration::from_secs(20));
        client.send(&Envelope::heartbeat(UserId::new(5)));
        let expected = h.clock.now();
        timeout(TIMEOUT, async {
            while conn.last_heartbeat_at() != expected {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(h.history.key_count(), 0);
    }

    #[tokio::test]
    async fn heartbeat_without_sender_id_still_counts() {
        let h = harness();
        let client = h.connect(5).await;
        let conn = h.registry.lookup(UserId::new(5)).unwrap();

        for raw in [
            r#"{"Type":3}"#,
            r#"{"UserId":0,"TargetId":-1,"Type":3,"Media":-1}"#,
            r#"{"UserId":8,"Type":3}"#,
        ] {
            h.clock.advance(Duration::from_secs(20));
            let expected = h.clock.now();
            client
                .inbound
                .unbounded_send(Ok(Message::Text(raw.into())))
                .unwrap();
            timeout(TIMEOUT, async {
                while conn.last_heartbeat_at() != expected {
                    tokio::task::yield_now().await;
                }
            })
            .await
            .unwrap();
        }
        assert!(!conn.is_closing());
        assert_eq!(h.history.key_count(), 0);
    }

    #[tokio::test]
    async fn malformed_frame_does_not_end_session() {
        let (logs, _guard) = capture_logs();
        let h = harness();
        let bad = h.connect(5).await;
        let mut target = h.connect(7).await;

        bad.inbound
            .unbounded_send(Ok(Message::Text("not json".into())))
            .unwrap();
        bad.send(&Envelope::direct(UserId::new(5), UserId::new(7), "after"));
        assert_eq!(
            Envelope::decode(&target.recv_text().await).unwrap().content(),
            "after"
        );
        assert!(logs.has_event(tracing::Level::WARN, "dropping malformed frame"));
    }

    #[tokio::test]
    async fn spoofed_sender_is_dropped() {
        let h = harness();
        let liar = h.connect(5).await;
        let mut target = h.connect(7).await;

        liar.send(&Envelope::direct(UserId::new(6), UserId::new(7), "fake"));
        liar.send(&Envelope::direct(UserId::new(5), UserId::new(7), "real"));
        assert_eq!(
            Envelope::decode(&target.recv_text().await).unwrap().content(),
            "real"
        );
        assert_eq!(h.history.key_count(), 1);
    }

    #[tokio::test]
    async fn peer_close_tears_down() {
        let h = harness();
        let mut client = h.connect(5).await;
        let conn = h.registry.lookup(UserId::new(5)).unwrap();

        client
            .inbound
            .unbounded_send(Ok(Message::Close(None)))
            .unwrap();
        timeout(TIMEOUT, &mut client.task).await.unwrap().unwrap();
        assert!(h.registry.is_empty());
        assert_eq!(conn.state(), ConnectionState::Closed(CloseReason::PeerClosed));
    }

    #[tokio::test]
    async fn read_error_tears_down() {
        let h = harness();
        let mut client = h.connect(5).await;
        let conn = h.registry.lookup(UserId::new(5)).unwrap();

        client.inbound.unbounded_send(Err("reset".into())).unwrap();
        timeout(TIMEOUT, &mut client.task).await.unwrap().unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed(CloseReason::ReadError));
        assert!(h.registry.is_empty());
    }

    #[tokio::test]
    async fn eviction_sends_close_and_tears_down() {
        let h = harness();
        let mut client = h.connect(5).await;
        let conn = h.registry.lookup(UserId::new(5)).unwrap();

        let _ = conn.close(CloseReason::SweepEviction);
        assert!(matches!(client.recv().await, Message::Close(_)));
        timeout(TIMEOUT, &mut client.task).await.unwrap().unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed(CloseReason::SweepEviction));
        assert!(h.registry.is_empty());
    }

    #[tokio::test]
    async fn reconnect_displaces_previous_connection() {
        let h = harness();
        let mut first = h.connect(5).await;
        let old = h.registry.lookup(UserId::new(5)).unwrap();
        let _second = h.connect(5).await;
        let new = h.registry.lookup(UserId::new(5)).unwrap();
        assert!(!Arc::ptr_eq(&old, &new));

        timeout(TIMEOUT, &mut first.task).await.unwrap().unwrap();
        assert_eq!(old.state(), ConnectionState::Closed(CloseReason::Replaced));
        assert_eq!(h.registry.len(), 1);
        assert!(Arc::ptr_eq(&h.registry.lookup(UserId::new(5)).unwrap(), &new));
    }

    #[tokio::test]
    async fn shutdown_closes_session() {
        let h = harness();
        let mut client = h.connect(5).await;
        let conn = h.registry.lookup(UserId::new(5)).unwrap();

        h.ctx.shutdown.cancel();
        timeout(TIMEOUT, &mut client.task).await.unwrap().unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed(CloseReason::Shutdown));
    }

    #[tokio::test]
    async fn write_failure_closes_connection() {
        let h = harness();
        let sender = h.connect(5).await;
        let mut target = h.connect(7).await;
        let conn = h.registry.lookup(UserId::new(7)).unwrap();

        target.outbound.close();
        sender.send(&Envelope::direct(UserId::new(5), UserId::new(7), "lost"));
        timeout(TIMEOUT, &mut target.task).await.unwrap().unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed(CloseReason::WriteError));
    }
}
