// Telemetry events module entrypoint
pub mod types;   // TelemetryEvent + typed payloads
pub mod buffer;  // capped, deduplicated, newest-first event buffer
pub mod source;  // EventSource trait + HTTP implementation
pub mod poller;  // periodic single-flight polling into the buffer

pub use buffer::{EventBuffer, MergeOutcome};
pub use poller::{BatchCallback, PollBatch, PollOutcome, PollerStats, TelemetryPoller};
pub use source::{EventSource, HttpEventSource};
pub use types::{EventPayload, TelemetryEvent};
