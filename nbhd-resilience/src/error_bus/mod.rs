//! Process-wide error bus
//!
//! Collects categorised error records from every resilience component and
//! from process-wide signals, fans them out to listeners, and raises at most
//! one user-facing `production-error` notification per `(category, severity)`
//! per cooldown window.
//!
//! # Ordering
//!
//! Within one [`ErrorBus::report`] call the collection is updated first,
//! then listeners run in subscription order, then the notification (if any)
//! is emitted. `report` never suspends.
//!
//! # Re-entrancy
//!
//! Listeners run with no bus lock held. A listener that reports again
//! synchronously is tolerated up to [`MAX_DISPATCH_DEPTH`] nested dispatches;
//! deeper records are stored and notified but not dispatched to listeners.

mod classify;
mod global;
mod record;
mod reporter;
mod signals;

pub use classify::{classify_severity, user_message, CHUNK_LOAD_ERROR};
pub use global::{global, install, reset_global};
pub use record::{
    AudioFailureKind, Context, ErrorRecord, ManifestFailureKind, NotificationKey, ReportedError,
    SwFailureKind,
};
pub use reporter::{Clock, ErrorReporter, ManualClock, SystemClock, TracingReporter};
pub use signals::{install_global_handlers, EventPhase, GlobalSignal};

use chrono::{DateTime, Duration, Utc};
use nbhd_common::config::ErrorBusConfig;
use nbhd_common::events::{
    ErrorCategory, EventBus, ProductionErrorNotice, ResilienceEvent, Severity,
};
use serde::Serialize;
use std::cell::Cell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::broadcast;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Nested listener dispatches allowed before listeners are skipped
pub const MAX_DISPATCH_DEPTH: u32 = 4;

/// Number of records returned in [`ErrorSummary::recent`]
pub const RECENT_LIMIT: usize = 10;

thread_local! {
    static DISPATCH_DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// Whether the current thread is inside a listener dispatch
pub(crate) fn is_dispatching() -> bool {
    DISPATCH_DEPTH.with(|d| d.get() > 0)
}

type Listener = Arc<dyn Fn(&ErrorRecord) + Send + Sync>;
type ListenerList = Mutex<Vec<(u64, Listener)>>;

struct BusState {
    errors: VecDeque<ErrorRecord>,
    /// Emission time of each key still inside its cooldown
    notified: HashMap<NotificationKey, DateTime<Utc>>,
}

/// Aggregate view of the collection
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorSummary {
    pub total: usize,
    pub by_category: BTreeMap<ErrorCategory, usize>,
    pub by_severity: BTreeMap<Severity, usize>,
    /// Last [`RECENT_LIMIT`] records, newest first
    pub recent: Vec<ErrorRecord>,
}

/// Handle returned by [`ErrorBus::subscribe`]
#[derive(Debug, Clone)]
pub struct Subscription {
    id: u64,
    listeners: Weak<ListenerList>,
}

impl Subscription {
    /// Remove the listener; later calls are no-ops
    pub fn unsubscribe(&self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.lock().unwrap().retain(|(id, _)| *id != self.id);
        }
    }
}

/// Central error collection and notification throttle
pub struct ErrorBus {
    config: ErrorBusConfig,
    state: Mutex<BusState>,
    listeners: Arc<ListenerList>,
    next_listener: AtomicU64,
    events: EventBus,
    clock: Arc<dyn Clock>,
    reporter: Arc<dyn ErrorReporter>,
}

impl ErrorBus {
    pub fn new(config: ErrorBusConfig) -> Self {
        let max_errors = config.max_errors.max(1);
        Self {
            config: ErrorBusConfig { max_errors, ..config },
            state: Mutex::new(BusState {
                errors: VecDeque::with_capacity(max_errors),
                notified: HashMap::new(),
            }),
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_listener: AtomicU64::new(1),
            events: EventBus::default(),
            clock: Arc::new(SystemClock),
            reporter: Arc::new(TracingReporter),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Publish notifications on an existing event bus
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &ErrorBusConfig {
        &self.config
    }

    /// Event bus carrying `production-error` notifications
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Subscribe to user-facing notifications (and other resilience events)
    pub fn subscribe_events(&self) -> broadcast::Receiver<ResilienceEvent> {
        self.events.subscribe()
    }

    /// Record an error
    ///
    /// Classifies severity, composes the user message, appends the record
    /// (evicting the oldest at capacity), runs listeners, and emits a
    /// notification when the severity warrants one and its key is not
    /// cooling down.
    pub fn report(
        &self,
        category: ErrorCategory,
        error: Option<ReportedError>,
        context: Option<Context>,
    ) -> ErrorRecord {
        let timestamp = self.clock.now();
        let severity = classify_severity(category, error.as_ref());
        let record = ErrorRecord {
            id: Uuid::new_v4(),
            category,
            message: user_message(category, error.as_ref()).to_string(),
            error,
            severity,
            context: context.unwrap_or_default(),
            timestamp,
        };

        let notify = {
            let mut state = self.state.lock().unwrap();
            while state.errors.len() >= self.config.max_errors {
                state.errors.pop_front();
            }
            state.errors.push_back(record.clone());
            self.claim_notification(&mut state, &record)
        };

        debug!(
            id = %record.id,
            category = %record.category,
            severity = %record.severity,
            notify,
            "Error recorded"
        );

        self.dispatch(&record);

        if notify {
            self.events.emit_lossy(ResilienceEvent::ProductionError(ProductionErrorNotice {
                category: record.category,
                severity: record.severity,
                message: record.message.clone(),
                timestamp: record.timestamp,
            }));
        }

        if self.config.is_production {
            self.reporter.report(&record);
        }

        record
    }

    /// Decide whether `record` raises a notification, marking its key if so.
    ///
    /// Keys expire purely by wall clock from first emission.
    fn claim_notification(&self, state: &mut BusState, record: &ErrorRecord) -> bool {
        if !record.severity.is_user_visible() {
            return false;
        }

        let cooldown = Duration::milliseconds(self.config.notification_cooldown_ms as i64);
        let now = record.timestamp;
        state.notified.retain(|_, emitted| now - *emitted < cooldown);

        let key = NotificationKey::from(record);
        if state.notified.contains_key(&key) {
            return false;
        }
        state.notified.insert(key, now);
        true
    }

    fn dispatch(&self, record: &ErrorRecord) {
        let depth = DISPATCH_DEPTH.with(|d| d.get());
        if depth >= MAX_DISPATCH_DEPTH {
            warn!(
                id = %record.id,
                depth,
                "Listener dispatch depth exceeded; listeners must defer re-reporting"
            );
            return;
        }

        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .unwrap()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        DISPATCH_DEPTH.with(|d| d.set(depth + 1));
        for listener in listeners {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener(record))) {
                error!(
                    id = %record.id,
                    "Error listener panicked: {}",
                    signals::panic_message(panic.as_ref())
                );
            }
        }
        DISPATCH_DEPTH.with(|d| d.set(depth));
    }

    /// Add a listener invoked synchronously for every record
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ErrorRecord) + Send + Sync + 'static,
    {
        let id = self.next_listener.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().unwrap().push((id, Arc::new(listener)));
        Subscription { id, listeners: Arc::downgrade(&self.listeners) }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    /// Aggregate counts and the most recent records
    pub fn summary(&self) -> ErrorSummary {
        let state = self.state.lock().unwrap();

        let mut by_category = BTreeMap::new();
        let mut by_severity = BTreeMap::new();
        for record in &state.errors {
            *by_category.entry(record.category).or_insert(0) += 1;
            *by_severity.entry(record.severity).or_insert(0) += 1;
        }

        // Newest insertion first, then a stable sort keeps insertion order among equal timestamps
        let mut recent: Vec<ErrorRecord> = state.errors.iter().rev().cloned().collect();
        recent.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        recent.truncate(RECENT_LIMIT);

        ErrorSummary {
            total: state.errors.len(),
            by_category,
            by_severity,
            recent,
        }
    }

    /// Snapshot of the collection, oldest first
    pub fn errors(&self) -> Vec<ErrorRecord> {
        self.state.lock().unwrap().errors.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Empty the collection and forget every notification key
    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.errors.clear();
        state.notified.clear();
    }

    /// Clear and drop all listeners (test teardown)
    pub fn reset(&self) {
        self.clear();
        self.listeners.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::AtomicUsize;

    fn bus_with_clock(max_errors: usize) -> (ErrorBus, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 1, 1, 8, 0, 0).unwrap()));
        let bus = ErrorBus::new(ErrorBusConfig {
            max_errors,
            notification_cooldown_ms: 300_000,
            is_production: false,
        })
        .with_clock(clock.clone());
        (bus, clock)
    }

    fn named(n: usize) -> Option<ReportedError> {
        Some(ReportedError::named("Error", format!("e{}", n)))
    }

    fn drain(rx: &mut broadcast::Receiver<ResilienceEvent>) -> Vec<ResilienceEvent> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[test]
    fn test_fifo_eviction_keeps_most_recent() {
        let (bus, clock) = bus_with_clock(3);
        for n in 1..=5 {
            bus.report(ErrorCategory::Unknown, named(n), None);
            clock.advance(Duration::seconds(1));
        }

        let messages: Vec<String> = bus
            .errors()
            .into_iter()
            .map(|r| match r.error {
                Some(ReportedError::Named { message, .. }) => message,
                other => panic!("unexpected error {:?}", other),
            })
            .collect();
        assert_eq!(bus.summary().total, 3);
        assert_eq!(messages, vec!["e3", "e4", "e5"]);
    }

    #[test]
    fn test_null_error_produces_well_formed_record() {
        let (bus, _) = bus_with_clock(10);
        let record = bus.report(ErrorCategory::Unknown, None, None);

        assert_eq!(record.severity, Severity::Medium);
        assert_eq!(record.message, classify::MSG_FALLBACK);
        assert!(record.context.is_empty());
        assert!(record.error.is_none());
    }

    #[test]
    fn test_listeners_run_in_order_once_each() {
        let (bus, _) = bus_with_clock(10);
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b", "c"] {
            let order = Arc::clone(&order);
            bus.subscribe(move |_| order.lock().unwrap().push(tag));
        }

        bus.report(ErrorCategory::Network, None, None);
        assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let (bus, _) = bus_with_clock(10);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let subscription = bus.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.report(ErrorCategory::Network, None, None);
        subscription.unsubscribe();
        subscription.unsubscribe();
        bus.report(ErrorCategory::Network, None, None);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn test_panicking_listener_is_contained() {
        let (bus, _) = bus_with_clock(10);
        let calls = Arc::new(AtomicUsize::new(0));

        bus.subscribe(|_| panic!("listener bug"));
        let counter = Arc::clone(&calls);
        bus.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let record = bus.report(ErrorCategory::Unknown, None, None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(bus.errors(), vec![record]);
    }

    #[test]
    fn test_collection_updated_before_listeners() {
        let (bus, _) = bus_with_clock(10);
        let bus = Arc::new(bus);
        let seen = Arc::new(AtomicUsize::new(0));

        let weak = Arc::downgrade(&bus);
        let seen_in_listener = Arc::clone(&seen);
        bus.subscribe(move |_| {
            if let Some(bus) = weak.upgrade() {
                seen_in_listener.store(bus.len(), Ordering::SeqCst);
            }
        });

        bus.report(ErrorCategory::Audio, None, None);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reentrant_listener_is_bounded() {
        let (bus, _) = bus_with_clock(100);
        let bus = Arc::new(bus);
        let weak = Arc::downgrade(&bus);
        bus.subscribe(move |_| {
            if let Some(bus) = weak.upgrade() {
                bus.report(ErrorCategory::Unknown, None, None);
            }
        });

        bus.report(ErrorCategory::Unknown, None, None);
        assert_eq!(bus.len(), MAX_DISPATCH_DEPTH as usize + 1);
    }

    #[test]
    fn test_notification_dedup_within_cooldown() {
        let (bus, clock) = bus_with_clock(10);
        let mut rx = bus.subscribe_events();
        let syntax = || Some(ReportedError::manifest(ManifestFailureKind::SyntaxError, "eof"));

        bus.report(ErrorCategory::Manifest, syntax(), None);
        clock.advance(Duration::seconds(30));
        bus.report(ErrorCategory::Manifest, syntax(), None);

        assert_eq!(drain(&mut rx).len(), 1);
        assert_eq!(bus.summary().recent.len(), 2);
    }

    #[test]
    fn test_cooldown_expires_from_first_emission() {
        let (bus, clock) = bus_with_clock(10);
        let mut rx = bus.subscribe_events();

        bus.report(ErrorCategory::Network, None, None);
        clock.advance(Duration::minutes(4));
        // Re-report inside the window must not extend it
        bus.report(ErrorCategory::Network, None, None);
        clock.advance(Duration::minutes(1));
        bus.report(ErrorCategory::Network, None, None);

        assert_eq!(drain(&mut rx).len(), 2);
    }

    #[test]
    fn test_distinct_keys_notify_independently() {
        let (bus, _) = bus_with_clock(10);
        let mut rx = bus.subscribe_events();

        bus.report(ErrorCategory::Network, None, None);
        bus.report(ErrorCategory::Unknown, None, None);
        bus.report(
            ErrorCategory::Unknown,
            Some(ReportedError::named(CHUNK_LOAD_ERROR, "chunk 9")),
            None,
        );

        let events = drain(&mut rx);
        assert_eq!(events.len(), 3);
        match &events[2] {
            ResilienceEvent::ProductionError(notice) => {
                assert_eq!(notice.severity, Severity::High);
                assert!(notice.message.contains("refresh"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_low_severity_never_notifies() {
        let (bus, _) = bus_with_clock(10);
        let mut rx = bus.subscribe_events();

        bus.report(
            ErrorCategory::ServiceWorker,
            Some(ReportedError::service_worker(SwFailureKind::Network, "offline")),
            None,
        );
        assert!(drain(&mut rx).is_empty());
        assert_eq!(bus.len(), 1);
    }

    #[test]
    fn test_clear_resets_collection_and_keys() {
        let (bus, _) = bus_with_clock(10);
        let mut rx = bus.subscribe_events();

        bus.report(ErrorCategory::Network, None, None);
        bus.clear();
        assert!(bus.is_empty());

        bus.report(ErrorCategory::Network, None, None);
        assert_eq!(drain(&mut rx).len(), 2);
    }

    #[test]
    fn test_summary_counts_and_recent_order() {
        let (bus, clock) = bus_with_clock(50);
        for n in 0..12 {
            let category = if n % 3 == 0 { ErrorCategory::Network } else { ErrorCategory::Unknown };
            bus.report(category, named(n), None);
            clock.advance(Duration::seconds(1));
        }

        let summary = bus.summary();
        assert_eq!(summary.total, 12);
        assert_eq!(summary.by_category[&ErrorCategory::Network], 4);
        assert_eq!(summary.by_category[&ErrorCategory::Unknown], 8);
        assert_eq!(summary.by_severity[&Severity::Medium], 12);
        assert_eq!(summary.recent.len(), RECENT_LIMIT);
        assert!(summary.recent.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));
        assert_eq!(summary.recent[0].error, named(11));
    }

    #[test]
    fn test_production_reporter_receives_records() {
        struct Counting(AtomicUsize);
        impl ErrorReporter for Counting {
            fn report(&self, _record: &ErrorRecord) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let reporter = Arc::new(Counting(AtomicUsize::new(0)));
        let bus = ErrorBus::new(ErrorBusConfig {
            max_errors: 10,
            notification_cooldown_ms: 1000,
            is_production: true,
        })
        .with_reporter(reporter.clone());

        bus.report(ErrorCategory::Audio, None, None);
        bus.report(ErrorCategory::Audio, None, None);
        assert_eq!(reporter.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_summary_serializes_camel_case() {
        let (bus, _) = bus_with_clock(10);
        bus.report(ErrorCategory::ServiceWorker, None, None);
        let json = serde_json::to_value(bus.summary()).expect("serialize");
        assert_eq!(json["total"], 1);
        assert_eq!(json["byCategory"]["service-worker"], 1);
        assert_eq!(json["bySeverity"]["low"], 1);
    }
}
