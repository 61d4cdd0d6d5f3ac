//! Event types for the resilience event system
//!
//! Provides shared event definitions and the EventBus used by every
//! resilience component to reach the host UI.

mod shared_types;

pub use shared_types::{ErrorCategory, ProductionErrorNotice, Severity, WorkerRegistrationInfo};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Resilience event types
///
/// Serialized in the shape of a DOM `CustomEvent`: `{"event": <name>, "detail": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "detail", rename_all = "kebab-case")]
pub enum ResilienceEvent {
    /// User-facing error notification
    ///
    /// Emitted by the error bus at most once per `(category, severity)`
    /// per cooldown window, and only for severity medium or above.
    ///
    /// Triggers:
    /// - Host UI: show a toast
    ProductionError(ProductionErrorNotice),

    /// A new background worker finished installing while another one is in control
    ///
    /// Triggers:
    /// - Host UI: offer "reload to update"
    SwUpdateAvailable {
        /// Registration that received the new worker
        registration: WorkerRegistrationInfo,
    },

    /// A notification sound was bound to its synthetic tone
    SoundFallbackActivated {
        /// Logical sound name
        name: String,
        /// Sub-cause (`decoding-error` or `load-failed`)
        cause: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The live manifest link now points at the in-memory fallback
    ManifestRepaired {
        /// Object URL of the fallback manifest
        href: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl ResilienceEvent {
    /// Get event name as string for filtering
    pub fn event_type(&self) -> &str {
        match self {
            ResilienceEvent::ProductionError(_) => "production-error",
            ResilienceEvent::SwUpdateAvailable { .. } => "sw-update-available",
            ResilienceEvent::SoundFallbackActivated { .. } => "sound-fallback-activated",
            ResilienceEvent::ManifestRepaired { .. } => "manifest-repaired",
        }
    }
}

/// Fan-out of [`ResilienceEvent`]s to the host UI
///
/// Backed by a `tokio::sync::broadcast` channel: emitting never waits on a
/// receiver, and a receiver that falls more than `capacity` events behind
/// sees `RecvError::Lagged` and resumes from the oldest retained event.
///
/// ```
/// use nbhd_common::events::{EventBus, ResilienceEvent, WorkerRegistrationInfo};
///
/// let events = EventBus::new(64);
/// let mut ui = events.subscribe();
///
/// events.emit_lossy(ResilienceEvent::SwUpdateAvailable {
///     registration: WorkerRegistrationInfo {
///         id: 1,
///         scope: "/".to_string(),
///         script_url: "/sw.js".to_string(),
///     },
/// });
///
/// assert_eq!(ui.try_recv().unwrap().event_type(), "sw-update-available");
/// ```
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ResilienceEvent>,
    capacity: usize,
}

impl EventBus {
    /// Bus retaining up to `capacity` undelivered events per receiver (at least one)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, capacity }
    }

    /// Receiver for events emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ResilienceEvent> {
        self.sender.subscribe()
    }

    /// Deliver `event`, returning how many receivers got it
    ///
    /// Fails, handing the event back, when nobody is subscribed.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: ResilienceEvent,
    ) -> Result<usize, broadcast::error::SendError<ResilienceEvent>> {
        self.sender.send(event)
    }

    /// Deliver `event` if anyone is listening
    pub fn emit_lossy(&self, event: ResilienceEvent) {
        if self.sender.send(event).is_err() {
            tracing::trace!("Resilience event dropped: no subscribers");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn notice() -> ResilienceEvent {
        ResilienceEvent::ProductionError(ProductionErrorNotice {
            category: ErrorCategory::Manifest,
            severity: Severity::Medium,
            message: "Installing the app may not be available right now.".to_string(),
            timestamp: Utc::now(),
        })
    }

    #[test]
    fn test_new_bus_has_no_subscribers() {
        let events = EventBus::new(32);
        assert_eq!(events.capacity(), 32);
        assert_eq!(events.subscriber_count(), 0);
    }

    #[test]
    fn test_eventbus_zero_capacity_is_clamped() {
        let bus = EventBus::new(0);
        assert_eq!(bus.capacity(), 1);
    }

    #[test]
    fn test_eventbus_emit_without_subscribers_errors() {
        let events = EventBus::new(8);
        assert!(events.emit(notice()).is_err());
        events.emit_lossy(notice());
    }

    #[test]
    fn test_every_subscriber_receives_each_event() {
        let events = EventBus::new(8);
        let mut toast = events.subscribe();
        let mut logger = events.subscribe();

        assert_eq!(events.emit(notice()).expect("two subscribers"), 2);

        assert_eq!(toast.try_recv().expect("toast receives").event_type(), "production-error");
        assert_eq!(logger.try_recv().expect("logger receives").event_type(), "production-error");
    }

    #[test]
    fn test_production_error_serializes_as_custom_event() {
        let json = serde_json::to_value(notice()).expect("serialization should succeed");

        assert_eq!(json["event"], "production-error");
        assert_eq!(json["detail"]["type"], "manifest");
        assert_eq!(json["detail"]["severity"], "medium");
        assert!(json["detail"]["timestamp"].is_string());
    }

    #[test]
    fn test_category_round_trips_through_wire_name() {
        for category in ErrorCategory::ALL {
            let parsed: ErrorCategory = category.as_str().parse().expect("known category");
            assert_eq!(parsed, category);
        }
        assert!("bogus".parse::<ErrorCategory>().is_err());
    }

    #[test]
    fn test_severity_ordering_and_visibility() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::High < Severity::Critical);
        assert!(!Severity::Low.is_user_visible());
        assert!(Severity::Medium.is_user_visible());
        assert!(Severity::Critical.is_user_visible());
    }
}
