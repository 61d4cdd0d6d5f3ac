//! Process-wide error signals
//!
//! The host forwards uncaught errors, unhandled rejections, and element load
//! failures as [`GlobalSignal`]s. Panics in this process are turned into
//! script errors by the hook that [`install_global_handlers`] installs.

use super::record::{Context, ErrorRecord, ReportedError};
use super::{global, is_dispatching, ErrorBus};
use crate::context;
use nbhd_common::events::ErrorCategory;
use std::any::Any;
use std::sync::Once;
use tracing::debug;

/// DOM event propagation phase a resource error was observed in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventPhase {
    Capturing,
    AtTarget,
    Bubbling,
}

/// An error the host observed outside any component
#[derive(Debug, Clone, PartialEq)]
pub enum GlobalSignal {
    /// A promise rejected with no handler attached
    UnhandledRejection { reason: Option<ReportedError> },
    /// An uncaught script error
    ScriptError {
        error: Option<ReportedError>,
        message: String,
        filename: Option<String>,
        lineno: Option<u32>,
        colno: Option<u32>,
    },
    /// An element (`img`, `script`, `link`, ...) failed to load its resource
    ResourceError {
        tag_name: String,
        src: Option<String>,
        href: Option<String>,
        phase: EventPhase,
    },
}

impl ErrorBus {
    /// Record a process-wide signal
    ///
    /// Resource errors observed during capture are ignored; the same failure
    /// arrives again at target.
    pub fn handle_signal(&self, signal: GlobalSignal) -> Option<ErrorRecord> {
        match signal {
            GlobalSignal::UnhandledRejection { reason } => Some(self.report(
                ErrorCategory::Unknown,
                reason,
                Some(context! { "source" => "unhandledrejection" }),
            )),
            GlobalSignal::ScriptError { error, message, filename, lineno, colno } => {
                let mut ctx: Context =
                    context! { "source" => "error", "message" => message.clone() };
                if let Some(filename) = filename {
                    ctx.insert("filename".into(), filename.into());
                }
                if let Some(lineno) = lineno {
                    ctx.insert("lineno".into(), lineno.into());
                }
                if let Some(colno) = colno {
                    ctx.insert("colno".into(), colno.into());
                }
                let error = error.unwrap_or_else(|| ReportedError::named("Error", message));
                Some(self.report(ErrorCategory::Unknown, Some(error), Some(ctx)))
            }
            GlobalSignal::ResourceError { phase: EventPhase::Capturing, tag_name, .. } => {
                debug!(tag = %tag_name, "Ignoring capture-phase resource error");
                None
            }
            GlobalSignal::ResourceError { tag_name, src, href, .. } => {
                let element = tag_name.to_lowercase();
                let source = src.or(href).unwrap_or_default();
                let error = ReportedError::named(
                    "ResourceLoadError",
                    format!("Failed to load {} resource {}", element, source),
                );
                Some(self.report(
                    ErrorCategory::Network,
                    Some(error),
                    Some(context! { "element" => element, "source" => source }),
                ))
            }
        }
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

static HANDLERS: Once = Once::new();

/// Install the panic hook that reports into the global bus
///
/// Idempotent. The previous hook still runs afterwards. Panics raised by
/// error listeners are not re-reported.
pub fn install_global_handlers() {
    HANDLERS.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if !is_dispatching() {
                let message = panic_message(info.payload());
                let location = info.location();
                global().handle_signal(GlobalSignal::ScriptError {
                    error: Some(ReportedError::named("Panic", message.clone())),
                    message,
                    filename: location.map(|l| l.file().to_string()),
                    lineno: location.map(|l| l.line()),
                    colno: location.map(|l| l.column()),
                });
            }
            previous(info);
        }));
    });
}
