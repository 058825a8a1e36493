//! ---
//! rp_section: "03-logging"
//! rp_subsection: "module"
//! rp_type: "source"
//! rp_scope: "code"
//! rp_description: "In-memory tracing layer used to assert log output."
//! rp_version: "v0.0.0-prealpha"
//! rp_owner: "tbd"
//! ---
//! A [`Layer`] that keeps every event in memory.
//!
//! Install it for the current thread with [`LogCapture::set_default`]. Events
//! emitted from tasks on other runtime threads are not seen, so tests that use
//! it should stay on a current-thread runtime.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::field::{Field, Visit};
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::prelude::*;
use tracing_subscriber::Registry;

/// One recorded event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedEvent {
    /// Event level.
    pub level: Level,
    /// Target of the callsite (usually the module path).
    pub target: String,
    /// Rendered `message` field.
    pub message: String,
    /// Remaining fields rendered as strings.
    pub fields: BTreeMap<String, String>,
}

impl CapturedEvent {
    /// Look up a recorded field.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

#[derive(Serialize)]
struct EventView<'a> {
    level: String,
    message: &'a str,
    fields: &'a BTreeMap<String, String>,
}

/// Shared handle to the recorded events.
#[derive(Debug, Clone, Default)]
pub struct LogCapture {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl LogCapture {
    /// Create an empty capture.
    pub fn new() -> Self {
        Self::default()
    }

    /// Layer feeding this capture.
    pub fn layer(&self) -> CaptureLayer {
        CaptureLayer {
            events: Arc::clone(&self.events),
        }
    }

    /// Registry with only the capture layer attached.
    pub fn subscriber(&self) -> impl Subscriber + Send + Sync {
        Registry::default().with(self.layer())
    }

    /// Install the capture as the default subscriber for the current thread.
    pub fn set_default(&self) -> DefaultGuard {
        tracing::subscriber::set_default(self.subscriber())
    }

    /// Snapshot of every recorded event, oldest first.
    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events.lock().clone()
    }

    /// `(level, message)` pairs, oldest first.
    pub fn entries(&self) -> Vec<(Level, String)> {
        self.events
            .lock()
            .iter()
            .map(|event| (event.level, event.message.clone()))
            .collect()
    }

    /// Messages recorded at exactly `level`.
    pub fn messages_at(&self, level: Level) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.level == level)
            .map(|event| event.message.clone())
            .collect()
    }

    /// Whether any event message contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.events
            .lock()
            .iter()
            .any(|event| event.message.contains(needle))
    }

    /// Drop every recorded event.
    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Render the recorded events as a JSON array, handy in assertion messages.
    pub fn to_json(&self) -> String {
        let events = self.events.lock();
        let views: Vec<EventView<'_>> = events
            .iter()
            .map(|event| EventView {
                level: event.level.to_string(),
                message: &event.message,
                fields: &event.fields,
            })
            .collect();
        serde_json::to_string_pretty(&views).unwrap_or_default()
    }
}

/// Layer half of [`LogCapture`].
#[derive(Debug, Clone)]
pub struct CaptureLayer {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);
        let metadata = event.metadata();
        self.events.lock().push(CapturedEvent {
            level: *metadata.level(),
            target: metadata.target().to_string(),
            message: visitor.message,
            fields: visitor.fields,
        });
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: String,
    fields: BTreeMap<String, String>,
}

impl FieldVisitor {
    fn store(&mut self, field: &Field, value: String) {
        if field.name() == "message" {
            self.message = value;
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.store(field, value.to_string());
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.store(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.store(field, format!("{value:?}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::{error, info, warn};

    #[test]
    fn records_levels_messages_and_fields() {
        let capture = LogCapture::new();
        let _guard = capture.set_default();
        info!(attempt = 3, "running step [{}]", "Action wait");
        warn!(key = "abc", "lease renewal slow");
        error!("oh no!");

        assert_eq!(
            capture.entries(),
            vec![
                (Level::INFO, "running step [Action wait]".to_string()),
                (Level::WARN, "lease renewal slow".to_string()),
                (Level::ERROR, "oh no!".to_string()),
            ]
        );
        let events = capture.events();
        assert_eq!(events[0].field("attempt"), Some("3"));
        assert_eq!(events[1].field("key"), Some("abc"));
        assert_eq!(capture.messages_at(Level::ERROR), vec!["oh no!".to_string()]);
        assert!(capture.contains("lease renewal"));
    }

    #[test]
    fn captures_are_isolated_and_clearable() {
        let first = LogCapture::new();
        {
            let _guard = first.set_default();
            info!("first");
        }
        let second = LogCapture::new();
        {
            let _guard = second.set_default();
            info!("second");
        }
        assert_eq!(first.entries().len(), 1);
        assert_eq!(second.entries()[0].1, "second");
        first.clear();
        assert!(first.events().is_empty());
        assert!(second.to_json().contains("\"second\""));
    }
}
