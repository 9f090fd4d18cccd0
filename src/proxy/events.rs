//! Lifecycle event fan-out to live observers
//!
//! A single run-loop task owns the observer registry. Subscribe, unsubscribe
//! and publish all reach it through channels, so no lock guards the registry.
//! Delivery is best effort: a full observer mailbox drops the event for that
//! observer only, and a full publish queue drops the event entirely.

use crate::providers::canned::OverrideAction;
use crate::proxy::types::{DurationMillis, ExchangeId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Events buffered per observer before further events are dropped for it
pub const OBSERVER_MAILBOX_CAPACITY: usize = 10;

/// Events buffered between publishers and the run loop
pub const PUBLISH_QUEUE_CAPACITY: usize = 100;

/// Named lifecycle event. Serializes to its payload only; the name travels
/// separately as the SSE event type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum GatewayEvent {
    RequestCreated {
        request_id: ExchangeId,
        provider: String,
        endpoint: String,
        method: String,
        created_at: DateTime<Utc>,
    },
    ResponseCreated {
        request_id: ExchangeId,
        status_code: u16,
        duration_ms: DurationMillis,
        is_error: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
    },
    RequestPendingApproval {
        request_id: ExchangeId,
        provider: String,
        endpoint: String,
    },
    RequestApproved {
        request_id: ExchangeId,
    },
    RequestOverridden {
        request_id: ExchangeId,
        action: OverrideAction,
    },
    RequestApprovalTimeout {
        request_id: ExchangeId,
    },
    OverrideModeChanged {
        enabled: bool,
    },
}

impl GatewayEvent {
    pub fn name(&self) -> &'static str {
        match self {
            GatewayEvent::RequestCreated { .. } => "request_created",
            GatewayEvent::ResponseCreated { .. } => "response_created",
            GatewayEvent::RequestPendingApproval { .. } => "request_pending_approval",
            GatewayEvent::RequestApproved { .. } => "request_approved",
            GatewayEvent::RequestOverridden { .. } => "request_overridden",
            GatewayEvent::RequestApprovalTimeout { .. } => "request_approval_timeout",
            GatewayEvent::OverrideModeChanged { .. } => "override_mode_changed",
        }
    }
}

/// Ephemeral identifier of one subscription
pub type ObserverId = u64;

enum Control {
    Subscribe {
        id: ObserverId,
        mailbox: mpsc::Sender<GatewayEvent>,
    },
    Unsubscribe(ObserverId),
}

pub struct EventBroadcaster {
    control: mpsc::UnboundedSender<Control>,
    publish: mpsc::Sender<GatewayEvent>,
    closed: CancellationToken,
    next_id: AtomicU64,
    observers: Arc<AtomicUsize>,
}

impl EventBroadcaster {
    /// Start the run loop on the current runtime
    pub fn spawn() -> Self {
        let (control, control_rx) = mpsc::unbounded_channel();
        let (publish, publish_rx) = mpsc::channel(PUBLISH_QUEUE_CAPACITY);
        let closed = CancellationToken::new();
        let observers = Arc::new(AtomicUsize::new(0));

        tokio::spawn(run_loop(
            control_rx,
            publish_rx,
            closed.clone(),
            Arc::clone(&observers),
        ));

        Self {
            control,
            publish,
            closed,
            next_id: AtomicU64::new(1),
            observers,
        }
    }

    /// Register a new observer. After [`close`](Self::close) the returned
    /// observer is already at end of stream.
    pub fn subscribe(&self) -> Observer {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (mailbox, receiver) = mpsc::channel(OBSERVER_MAILBOX_CAPACITY);
        if self.closed.is_cancelled() {
            drop(mailbox);
        } else {
            let _ = self.control.send(Control::Subscribe { id, mailbox });
        }
        Observer {
            id,
            mailbox: receiver,
            control: self.control.clone(),
        }
    }

    /// Queue an event for fan-out without waiting
    pub fn publish(&self, event: GatewayEvent) {
        if let Err(err) = self.publish.try_send(event) {
            debug!(event = err.into_inner().name(), "Event dropped");
        }
    }

    /// Stop the run loop and disconnect every observer
    pub fn close(&self) {
        if !self.closed.is_cancelled() {
            info!("Closing event broadcaster");
            self.closed.cancel();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Number of observers currently registered with the run loop
    pub fn observer_count(&self) -> usize {
        self.observers.load(Ordering::SeqCst)
    }
}

async fn run_loop(
    mut control: mpsc::UnboundedReceiver<Control>,
    mut publish: mpsc::Receiver<GatewayEvent>,
    closed: CancellationToken,
    observer_count: Arc<AtomicUsize>,
) {
    let mut registry: HashMap<ObserverId, mpsc::Sender<GatewayEvent>> = HashMap::new();

    loop {
        tokio::select! {
            biased;
            _ = closed.cancelled() => break,
            Some(command) = control.recv() => match command {
                Control::Subscribe { id, mailbox } => {
                    registry.insert(id, mailbox);
                    debug!(observer = id, "Observer subscribed");
                }
                Control::Unsubscribe(id) => {
                    registry.remove(&id);
                    debug!(observer = id, "Observer unsubscribed");
                }
            },
            Some(event) = publish.recv() => {
                registry.retain(|id, mailbox| match mailbox.try_send(event.clone()) {
                    Ok(()) => true,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        debug!(observer = *id, event = event.name(), "Observer mailbox full, event dropped");
                        true
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => false,
                });
            },
            else => break,
        }
        observer_count.store(registry.len(), Ordering::SeqCst);
    }

    registry.clear();
    observer_count.store(0, Ordering::SeqCst);
    info!("Event broadcaster stopped");
}

/// A live subscription. Dropping it unsubscribes.
pub struct Observer {
    id: ObserverId,
    mailbox: mpsc::Receiver<GatewayEvent>,
    control: mpsc::UnboundedSender<Control>,
}

impl Observer {
    /// Next event, or `None` once unsubscribed or the broadcaster closed
    pub async fn recv(&mut self) -> Option<GatewayEvent> {
        self.mailbox.recv().await
    }
}

impl Drop for Observer {
    fn drop(&mut self) {
        let _ = self.control.send(Control::Unsubscribe(self.id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    fn toggled(enabled: bool) -> GatewayEvent {
        GatewayEvent::OverrideModeChanged { enabled }
    }

    #[tokio::test]
    async fn test_publish_without_observers_does_not_block() {
        let broadcaster = EventBroadcaster::spawn();
        tokio::time::timeout(Duration::from_millis(100), async {
            broadcaster.publish(toggled(true));
        })
        .await
        .unwrap();
        assert_eq!(broadcaster.observer_count(), 0);
    }

    #[tokio::test]
    async fn test_observer_receives_published_events() {
        let broadcaster = EventBroadcaster::spawn();
        let mut observer = broadcaster.subscribe();
        settle().await;

        broadcaster.publish(toggled(true));
        let event = tokio::time::timeout(Duration::from_secs(1), observer.recv())
            .await
            .unwrap();
        assert_eq!(event, Some(toggled(true)));
    }

    #[tokio::test]
    async fn test_full_mailbox_drops_for_slow_observer_only() {
        let broadcaster = EventBroadcaster::spawn();
        let mut slow = broadcaster.subscribe();
        let mut fast = broadcaster.subscribe();
        settle().await;

        for i in 0..(OBSERVER_MAILBOX_CAPACITY + 5) {
            broadcaster.publish(toggled(i % 2 == 0));
            let received = tokio::time::timeout(Duration::from_millis(200), fast.recv()).await;
            assert!(matches!(received, Ok(Some(_))), "fast observer missed event {i}");
        }
        settle().await;

        let mut delivered = 0;
        while let Ok(Some(_)) = tokio::time::timeout(Duration::from_millis(20), slow.recv()).await {
            delivered += 1;
        }
        assert_eq!(delivered, OBSERVER_MAILBOX_CAPACITY);
    }

    #[tokio::test]
    async fn test_dropping_observer_unsubscribes() {
        let broadcaster = EventBroadcaster::spawn();
        let observer = broadcaster.subscribe();
        settle().await;
        assert_eq!(broadcaster.observer_count(), 1);

        drop(observer);
        broadcaster.publish(toggled(false));
        settle().await;
        assert_eq!(broadcaster.observer_count(), 0);
    }

    #[tokio::test]
    async fn test_close_disconnects_observers() {
        let broadcaster = EventBroadcaster::spawn();
        let mut observer = broadcaster.subscribe();
        settle().await;

        broadcaster.close();
        let next = tokio::time::timeout(Duration::from_secs(1), observer.recv())
            .await
            .unwrap();
        assert_eq!(next, None);

        let mut late = broadcaster.subscribe();
        assert_eq!(late.recv().await, None);
        broadcaster.publish(toggled(true));
    }

    #[test]
    fn test_event_payload_and_name() {
        let event = GatewayEvent::RequestOverridden {
            request_id: ExchangeId::generate(),
            action: OverrideAction::Error400,
        };
        assert_eq!(event.name(), "request_overridden");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["action"], "error_400");
        assert!(json.get("type").is_none());
    }
}
