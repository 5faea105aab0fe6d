//! Observability for the content store
//!
//! - Lifecycle events, emitted as structured `tracing` records
//! - Monotonic counters
//!
//! Observability is read-only: nothing here changes what the store does.

mod events;
mod metrics;

pub use events::Event;
pub use metrics::{MetricsSnapshot, StorageMetrics};

use tracing::{info, warn};

/// Log a lifecycle event with fields
pub fn log_event_with_fields(event: Event, fields: &[(&str, &str)]) {
    let fields = render_fields(fields);
    if event.is_failure() {
        warn!(event = event.as_str(), fields = %fields);
    } else {
        info!(event = event.as_str(), fields = %fields);
    }
}

/// `key=value` pairs in key order, space separated
fn render_fields(fields: &[(&str, &str)]) -> String {
    let mut sorted: Vec<_> = fields.iter().collect();
    sorted.sort_by_key(|(k, _)| *k);
    sorted
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(" ")
}
