//! Routing of decoded envelopes to recipients and history.

use std::sync::Arc;

use metrics::counter;
use parley_core::{DecodeError, Envelope, Frame, GroupId, HistoryKey, MessageKind, UserId};
use parley_history::HistoryStore;
use tracing::{debug, warn};

use super::connection::Connection;
use super::registry::Registry;
use crate::errors::EnqueueError;
use crate::membership::GroupMembership;
use crate::metrics::{
    DELIVERIES_TOTAL, HISTORY_APPENDS_TOTAL, HISTORY_ERRORS_TOTAL, MEMBERSHIP_ERRORS_TOTAL,
    MESSAGES_ROUTED_TOTAL,
};

/// What happened to one recipient.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// Placed on the recipient's outbound queue.
    Queued,
    /// The recipient has no live connection here.
    Offline,
    /// The recipient's queue refused the frame.
    Dropped(EnqueueError),
}

impl Delivery {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Offline => "offline",
            Self::Dropped(EnqueueError::QueueFull) => "queue_full",
            Self::Dropped(EnqueueError::Closed) => "closed",
        }
    }
}

/// Result of routing one envelope.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RouteOutcome {
    /// Per-recipient delivery results, in fanout order.
    pub deliveries: Vec<(UserId, Delivery)>,
    /// History score assigned, if the append succeeded.
    pub score: Option<u64>,
}

impl RouteOutcome {
    /// Recipients whose queue accepted the frame.
    pub fn queued(&self) -> usize {
        self.count(Delivery::Queued)
    }

    /// Recipients that were not connected.
    pub fn offline(&self) -> usize {
        self.count(Delivery::Offline)
    }

    fn count(&self, wanted: Delivery) -> usize {
        self.deliveries.iter().filter(|(_, d)| *d == wanted).count()
    }
}

/// Routes data envelopes: direct delivery, group fanout, history append.
pub struct Dispatcher {
    registry: Arc<dyn Registry>,
    history: Arc<dyn HistoryStore>,
    groups: Arc<dyn GroupMembership>,
}

impl Dispatcher {
    /// Dispatcher over the given collaborators.
    pub fn new(
        registry: Arc<dyn Registry>,
        history: Arc<dyn HistoryStore>,
        groups: Arc<dyn GroupMembership>,
    ) -> Self {
        Self {
            registry,
            history,
            groups,
        }
    }

    /// Route a decoded envelope whose raw form is `frame`.
    ///
    /// Heartbeats are filtered before this point; one that slips through is
    /// ignored.
    pub async fn route(&self, envelope: &Envelope, frame: &Frame) -> RouteOutcome {
        counter!(MESSAGES_ROUTED_TOTAL, "kind" => envelope.kind().as_str()).increment(1);
        match envelope.kind() {
            MessageKind::Direct => self.route_direct(envelope, frame).await,
            MessageKind::Group => self.route_group(envelope, frame).await,
            MessageKind::Heartbeat => RouteOutcome::default(),
        }
    }

    /// Decode and route a raw frame, as received from the mirror.
    pub async fn route_frame(&self, frame: Frame) -> Result<RouteOutcome, DecodeError> {
        let envelope = Envelope::decode_frame(&frame)?;
        if envelope.is_heartbeat() {
            return Ok(RouteOutcome::default());
        }
        Ok(self.route(&envelope, &frame).await)
    }

    async fn route_direct(&self, envelope: &Envelope, frame: &Frame) -> RouteOutcome {
        let target = envelope.target_user();
        let delivery = self.deliver(target, frame, None);
        let key = HistoryKey::direct(envelope.sender_id(), target);
        let score = self.append(&key, frame).await;
        RouteOutcome {
            deliveries: vec![(target, delivery)],
            score,
        }
    }

    async fn route_group(&self, envelope: &Envelope, frame: &Frame) -> RouteOutcome {
        let group = envelope.target_group();
        let members = match self.groups.members_of(group).await {
            Ok(members) => members,
            Err(e) => {
                counter!(MEMBERSHIP_ERRORS_TOTAL).increment(1);
                warn!(group_id = %group, error = %e, "group membership lookup failed");
                Vec::new()
            }
        };

        let score = self.append(&HistoryKey::group(group), frame).await;

        let deliveries = members
            .into_iter()
            .map(|member| (member, self.deliver(member, frame, Some(group))))
            .collect();
        RouteOutcome { deliveries, score }
    }

    fn deliver(&self, user: UserId, frame: &Frame, group: Option<GroupId>) -> Delivery {
        let delivery = match self.registry.lookup(user) {
            Some(conn) => Self::enqueue(&conn, frame, group),
            None => Delivery::Offline,
        };
        counter!(DELIVERIES_TOTAL, "outcome" => delivery.as_str()).increment(1);
        debug!(user_id = %user, outcome = delivery.as_str(), "delivery");
        delivery
    }

    fn enqueue(conn: &Connection, frame: &Frame, group: Option<GroupId>) -> Delivery {
        if let Some(group) = group {
            conn.remember_group(group);
        }
        match conn.enqueue(frame.clone()) {
            Ok(()) => Delivery::Queued,
            Err(e) => Delivery::Dropped(e),
        }
    }

    async fn append(&self, key: &HistoryKey, frame: &Frame) -> Option<u64> {
        match self.history.append(key, frame.clone()).await {
            Ok(score) => {
                counter!(HISTORY_APPENDS_TOTAL).increment(1);
                Some(score)
            }
            Err(e) => {
                counter!(HISTORY_ERRORS_TOTAL).increment(1);
                warn!(key = %key, error = %e, "history append failed");
                None
            }
        }
    }
}
