//! Production reporter sink and clock

use super::record::ErrorRecord;
use chrono::{DateTime, Duration, Utc};
use nbhd_common::events::Severity;
use std::sync::Mutex;
use tracing::{error, warn};

/// Destination for records when running in production
pub trait ErrorReporter: Send + Sync {
    fn report(&self, record: &ErrorRecord);
}

/// Default reporter: one structured log event per record
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, record: &ErrorRecord) {
        let context = serde_json::to_string(&record.context).unwrap_or_default();
        let cause = record.error.as_ref().map(|e| e.to_string()).unwrap_or_default();
        let at = nbhd_common::time::to_iso8601(&record.timestamp);
        match record.severity {
            Severity::High | Severity::Critical => error!(
                id = %record.id,
                category = %record.category,
                severity = %record.severity,
                cause = %cause,
                context = %context,
                at = %at,
                "Production error: {}",
                record.message
            ),
            Severity::Low | Severity::Medium => warn!(
                id = %record.id,
                category = %record.category,
                severity = %record.severity,
                cause = %cause,
                context = %context,
                at = %at,
                "Production error: {}",
                record.message
            ),
        }
    }
}

/// Wall clock used for timestamps and notification cooldowns
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        nbhd_common::time::now()
    }
}

/// Clock that only moves when told to
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
