//! Central hub to exchange application-level events.
//!
//! Many situations cannot be handled locally by a terminal event handler:
//! a doorbell button pressed at the gate has to reach the control-UI
//! terminal inside the space and the physical bell, and a door opened for
//! any reason should light the green LED at the terminal next to it. The
//! handlers involved run on different tasks, so the bus decouples them
//! with per-subscriber queues and lets everyone consume at their own pace.
//!
//! All bus operations (subscribe, unsubscribe, post, flush) are funneled
//! through one capacity-1 operation channel consumed by a single serializer
//! task. Every subscriber therefore observes posts in the same total
//! order, and [`ApplicationBus::flush`] returning means every earlier post
//! has been forwarded to every subscriber that existed at post time.
//!
//! Subscriber queues are bounded. A subscriber that stops draining its
//! queue eventually blocks the serializer and with it all publishers;
//! handlers are expected to drain on every tick.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use earl_core::Clock;

use crate::event::{AppEvent, AppEventKind};

/// Stable handle identifying one subscriber on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

enum BusOp {
    Subscribe {
        id: SubscriberId,
        tx: mpsc::Sender<AppEvent>,
    },
    Unsubscribe {
        id: SubscriberId,
    },
    Post(AppEvent),
    Flush {
        ack: oneshot::Sender<()>,
    },
}

/// Handle to the application bus. Cheap to clone; all clones feed the
/// same serializer task, which exits when the last clone is dropped.
#[derive(Clone)]
pub struct ApplicationBus {
    ops: mpsc::Sender<BusOp>,
    next_id: Arc<AtomicU64>,
    last_events: Arc<Mutex<HashMap<AppEventKind, AppEvent>>>,
    clock: Arc<dyn Clock>,
}

impl ApplicationBus {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        // Capacity 1: posting backpressures as soon as the serializer
        // falls behind, instead of buffering unbounded operations.
        let (ops_tx, ops_rx) = mpsc::channel(1);
        tokio::spawn(serializer(ops_rx));
        ApplicationBus {
            ops: ops_tx,
            next_id: Arc::new(AtomicU64::new(0)),
            last_events: Arc::new(Mutex::new(HashMap::new())),
            clock,
        }
    }

    /// Post an event. Stamps the timestamp if the producer left it unset
    /// and remembers the event as the latest of its kind.
    pub async fn post(&self, mut event: AppEvent) {
        if event.timestamp.is_none() {
            event.timestamp = Some(self.clock.now());
        }
        self.last_events
            .lock()
            .unwrap()
            .insert(event.kind, event.clone());
        if self.ops.send(BusOp::Post(event)).await.is_err() {
            warn!("bus serializer gone, event dropped");
        }
    }

    /// Returns once every post issued before this call has been forwarded
    /// to every subscriber extant at post time.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.ops.send(BusOp::Flush { ack: ack_tx }).await.is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Register a subscriber with a delivery queue of `capacity` events.
    pub async fn subscribe(&self, capacity: usize) -> Subscription {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let _ = self.ops.send(BusOp::Subscribe { id, tx }).await;
        Subscription { id, rx }
    }

    /// Release a subscription. Events already queued stay readable until
    /// the `Subscription` is dropped; nothing new is delivered.
    pub async fn unsubscribe(&self, subscription: &Subscription) {
        let _ = self
            .ops
            .send(BusOp::Unsubscribe {
                id: subscription.id,
            })
            .await;
    }

    /// Latest event seen per kind, oldest first. Used by observers to
    /// replay history to a newly connected client.
    pub fn last_events(&self) -> Vec<AppEvent> {
        let mut events: Vec<AppEvent> =
            self.last_events.lock().unwrap().values().cloned().collect();
        events.sort_by_key(|e| e.timestamp);
        events
    }
}

/// Receiving side of a bus subscription.
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::Receiver<AppEvent>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Await the next event. `None` once unsubscribed (or the bus is gone)
    /// and the queue has drained.
    pub async fn recv(&mut self) -> Option<AppEvent> {
        self.rx.recv().await
    }

    /// Non-blocking drain step, for handlers that consume bus events
    /// inside their tick callback.
    pub fn try_recv(&mut self) -> Option<AppEvent> {
        self.rx.try_recv().ok()
    }
}

async fn serializer(mut ops: mpsc::Receiver<BusOp>) {
    let mut receivers: HashMap<SubscriberId, mpsc::Sender<AppEvent>> = HashMap::new();
    while let Some(op) = ops.recv().await {
        match op {
            BusOp::Subscribe { id, tx } => {
                receivers.insert(id, tx);
            }
            BusOp::Unsubscribe { id } => {
                receivers.remove(&id);
            }
            BusOp::Post(event) => {
                trace!(kind = %event.kind, target = %event.target, "bus post");
                let mut dead = Vec::new();
                for (id, tx) in &receivers {
                    // Blocks on a full queue: backpressure toward
                    // publishers rather than silent loss.
                    if tx.send(event.clone()).await.is_err() {
                        dead.push(*id);
                    }
                }
                for id in dead {
                    debug!(?id, "dropping subscriber with closed queue");
                    receivers.remove(&id);
                }
            }
            BusOp::Flush { ack } => {
                let _ = ack.send(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};
    use earl_core::{ManualClock, Target};

    fn test_bus() -> (ApplicationBus, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at(
            Local.with_ymd_and_hms(2014, 10, 10, 16, 0, 0).unwrap(),
        ));
        (ApplicationBus::new(clock.clone()), clock)
    }

    fn open_request(n: i64) -> AppEvent {
        AppEvent::new(AppEventKind::OpenRequest, Target::new("gate")).value(n)
    }

    #[tokio::test]
    async fn posts_are_delivered_in_order() {
        let (bus, _) = test_bus();
        let mut sub = bus.subscribe(16).await;

        for n in 0..5 {
            bus.post(open_request(n)).await;
        }
        bus.flush().await;

        for n in 0..5 {
            assert_eq!(sub.try_recv().unwrap().value, Some(n));
        }
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn flush_waits_for_prior_posts() {
        let (bus, _) = test_bus();
        let mut sub = bus.subscribe(16).await;

        bus.post(open_request(1)).await;
        bus.flush().await;

        // After flush, the event must already be sitting in our queue.
        assert!(sub.try_recv().is_some());
    }

    #[tokio::test]
    async fn post_stamps_unset_timestamp() {
        let (bus, clock) = test_bus();
        let mut sub = bus.subscribe(4).await;

        bus.post(open_request(0)).await;
        bus.flush().await;
        assert_eq!(sub.try_recv().unwrap().timestamp, Some(clock.now()));

        // A producer-provided timestamp is left alone.
        let stamped = Local.with_ymd_and_hms(2001, 1, 1, 0, 0, 0).unwrap();
        let mut event = open_request(0);
        event.timestamp = Some(stamped);
        bus.post(event).await;
        bus.flush().await;
        assert_eq!(sub.try_recv().unwrap().timestamp, Some(stamped));
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let (bus, _) = test_bus();
        let sub_gone = bus.subscribe(4).await;
        let mut sub_kept = bus.subscribe(4).await;

        bus.unsubscribe(&sub_gone).await;
        bus.post(open_request(7)).await;
        bus.flush().await;

        let mut sub_gone = sub_gone;
        assert!(sub_gone.try_recv().is_none());
        assert_eq!(sub_kept.try_recv().unwrap().value, Some(7));
    }

    #[tokio::test]
    async fn dropped_subscription_does_not_wedge_the_bus() {
        let (bus, _) = test_bus();
        let sub = bus.subscribe(1).await;
        drop(sub);

        for n in 0..3 {
            bus.post(open_request(n)).await;
        }
        // Would hang here if the serializer blocked on the dead queue.
        bus.flush().await;
    }

    #[tokio::test]
    async fn bounded_queue_drains_under_backpressure() {
        let (bus, _) = test_bus();
        let mut sub = bus.subscribe(1).await;

        let publisher = {
            let bus = bus.clone();
            tokio::spawn(async move {
                for n in 0..8 {
                    bus.post(open_request(n)).await;
                }
            })
        };

        for n in 0..8 {
            assert_eq!(sub.recv().await.unwrap().value, Some(n));
        }
        publisher.await.unwrap();
    }

    #[tokio::test]
    async fn historic_cache_keeps_latest_per_kind() {
        let (bus, clock) = test_bus();

        bus.post(open_request(1)).await;
        clock.advance(chrono::TimeDelta::seconds(1));
        bus.post(open_request(2)).await;
        clock.advance(chrono::TimeDelta::seconds(1));
        bus.post(AppEvent::new(AppEventKind::DoorbellTrigger, Target::new("gate"))).await;
        bus.flush().await;

        let history = bus.last_events();
        assert_eq!(history.len(), 2);
        // Oldest first; OpenRequest slot holds the later of the two posts.
        assert_eq!(history[0].kind, AppEventKind::OpenRequest);
        assert_eq!(history[0].value, Some(2));
        assert_eq!(history[1].kind, AppEventKind::DoorbellTrigger);
    }
}
