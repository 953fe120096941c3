//! Output event bus for the instrumentation layer.
//!
//! One [`tokio::sync::broadcast`] channel per lane plus a catch-all channel;
//! a slow reader lags and skips instead of holding back the tick loop.
//! Publishing is synchronous; readers either await
//! ([`TopicReceiver::recv`]) or drain between ticks
//! ([`TopicReceiver::try_recv`]).
//!
//! # Topics
//!
//! | Lane | Payloads |
//! |---|---|
//! | [`Topic::Telemetry`] | `VisualizationDataUpdated` after each series capture |
//! | [`Topic::Alerts`] | `PerformanceAlert` raised by the monitor |
//! | [`Topic::Analysis`] | `AnalysisCompleted`, `RegressionDetected`, `RecommendationReady` |
//! | [`Topic::Optimization`] | `OptimizationCompleted`, `ExperimentCompleted` |

use arbiter_types::{Event, EventPayload};
use tokio::sync::broadcast;
use tracing::{trace, warn};

/// Events buffered per channel before a lagging reader starts skipping.
const DEFAULT_CAPACITY: usize = 256;

/// Routing lanes on the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Telemetry,
    Alerts,
    Analysis,
    Optimization,
}

impl Topic {
    /// The lane an event payload belongs to.
    pub fn for_payload(payload: &EventPayload) -> Topic {
        match payload {
            EventPayload::VisualizationDataUpdated { .. } => Topic::Telemetry,
            EventPayload::PerformanceAlert(_) => Topic::Alerts,
            EventPayload::AnalysisCompleted { .. }
            | EventPayload::RegressionDetected { .. }
            | EventPayload::RecommendationReady { .. } => Topic::Analysis,
            EventPayload::OptimizationCompleted { .. }
            | EventPayload::ExperimentCompleted { .. } => Topic::Optimization,
        }
    }
}

/// Handle to the bus; clones publish into the same channels.
///
/// [`emit`][EventBus::emit] is the only way in.  Readers either take one lane
/// ([`subscribe_to`][EventBus::subscribe_to]) or everything
/// ([`subscribe`][EventBus::subscribe], used by catch-all loggers).
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
    telemetry: broadcast::Sender<Event>,
    alerts: broadcast::Sender<Event>,
    analysis: broadcast::Sender<Event>,
    optimization: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus with the given channel capacity.
    ///
    /// The `capacity` is applied to every topic channel independently.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        let (telemetry, _) = broadcast::channel(capacity);
        let (alerts, _) = broadcast::channel(capacity);
        let (analysis, _) = broadcast::channel(capacity);
        let (optimization, _) = broadcast::channel(capacity);
        Self {
            sender,
            telemetry,
            alerts,
            analysis,
            optimization,
        }
    }

    // -----------------------------------------------------------------------
    // Lanes
    // -----------------------------------------------------------------------

    /// Subscribe to a specific [`Topic`] channel.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    /// Route `event` to its topic lane **and** the global channel.
    ///
    /// Missing subscribers are not an error here: output events are
    /// best-effort and the engine must keep ticking with nobody listening.
    /// Returns the total number of receivers reached.
    pub fn emit(&self, event: Event) -> usize {
        let topic = Topic::for_payload(&event.payload);
        let global = self.sender.send(event.clone()).unwrap_or(0);
        let routed = self.topic_sender(topic).send(event).unwrap_or(0);
        trace!(?topic, receivers = global + routed, "event emitted");
        global + routed
    }

    // -----------------------------------------------------------------------
    // Catch-all
    // -----------------------------------------------------------------------

    /// Subscribe to all events on the global broadcast channel.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Telemetry => &self.telemetry,
            Topic::Alerts => &self.alerts,
            Topic::Analysis => &self.analysis,
            Topic::Optimization => &self.optimization,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Topic-based receiver
// ---------------------------------------------------------------------------

/// A receiver bound to a single [`Topic`] channel.
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Non-blocking receive for consumers that poll between ticks.
    ///
    /// Lagged gaps are skipped with a warning; `None` means nothing is
    /// currently buffered (or the bus is gone).
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!(topic = ?self.topic, lagged_by = n, "TopicReceiver lagged");
                    continue;
                }
                Err(_) => return None,
            }
        }
    }

    /// Drain every buffered event.
    pub fn drain(&mut self) -> Vec<Event> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbiter_types::{Alert, AlertKind, AlertSeverity, TreeId};

    fn viz_event(source: &str) -> Event {
        Event::new(
            source,
            EventPayload::VisualizationDataUpdated {
                tree: TreeId(1),
                points: 3,
            },
        )
    }

    fn alert_event() -> Event {
        Event::new(
            "arbiter-monitor",
            EventPayload::PerformanceAlert(Alert::new(
                AlertKind::LowFps,
                "system",
                AlertSeverity::Medium,
                "fps 20 below 30",
                20.0,
                30.0,
                60,
            )),
        )
    }

    #[test]
    fn emit_without_subscribers_is_not_an_error() {
        let bus = EventBus::default();
        assert_eq!(bus.emit(alert_event()), 0);
    }

    #[test]
    fn emit_routes_by_payload() {
        let bus = EventBus::default();
        let mut alerts = bus.subscribe_to(Topic::Alerts);
        let mut telemetry = bus.subscribe_to(Topic::Telemetry);
        let mut all = bus.subscribe();

        assert_eq!(bus.emit(alert_event()), 2);

        let got = alerts.try_recv().expect("alert lane must receive");
        assert!(matches!(got.payload, EventPayload::PerformanceAlert(_)));
        assert!(telemetry.try_recv().is_none());
        assert!(all.try_recv().is_ok());
    }

    #[test]
    fn drain_returns_everything_buffered() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe_to(Topic::Telemetry);
        for _ in 0..5 {
            bus.emit(viz_event("arbiter-telemetry"));
        }
        assert_eq!(rx.drain().len(), 5);
        assert!(rx.try_recv().is_none());
    }

    #[tokio::test]
    async fn topic_subscriber_does_not_receive_other_topic_events() {
        let bus = EventBus::default();
        let mut analysis = bus.subscribe_to(Topic::Analysis);

        bus.emit(viz_event("arbiter-telemetry"));

        let result =
            tokio::time::timeout(std::time::Duration::from_millis(50), analysis.recv()).await;
        assert!(result.is_err(), "Analysis lane must not receive telemetry");
    }

    #[test]
    fn try_recv_skips_lagged_gap() {
        let bus = EventBus::new(4);
        let mut slow = bus.subscribe_to(Topic::Telemetry);
        for _ in 0..20 {
            bus.emit(viz_event("flood"));
        }
        // Oldest events were overwritten; the receiver recovers and yields
        // what is still buffered.
        assert_eq!(slow.drain().len(), 4);
    }
}
