//! NDJSON event vocabulary for `--events-json`. Emission is always
//! best-effort: a sink failure never aborts a migration run.

use std::io::Write;

use serde::Serialize;

use nomad_core::model::Direction;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum Event {
    LockAcquired { key: String, waited_ms: u64 },
    LockReleased { key: String },
    ApplyStart { version: u64, name: String, direction: Direction },
    StmtRun { version: u64, index: usize, total: usize },
    ApplyEnd { version: u64, name: String, direction: Direction, ok: bool },
    VerifyStart,
    VerifyEnd { drift_count: usize },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: &Event);
}

/// Writes one JSON object per line to the given writer.
pub struct NdjsonSink<W: Write + Send + Sync> {
    writer: std::sync::Mutex<W>,
}

impl<W: Write + Send + Sync> NdjsonSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: std::sync::Mutex::new(writer),
        }
    }
}

impl<W: Write + Send + Sync> EventSink for NdjsonSink<W> {
    fn emit(&self, event: &Event) {
        let Ok(line) = serde_json::to_string(event) else {
            return;
        };
        if let Ok(mut w) = self.writer.lock() {
            let _ = writeln!(w, "{line}");
        }
    }
}

pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &Event) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ndjson_sink_writes_one_line_per_event() {
        let buf: Vec<u8> = Vec::new();
        let sink = NdjsonSink::new(buf);
        sink.emit(&Event::VerifyStart);
        sink.emit(&Event::VerifyEnd { drift_count: 0 });
        let written = sink.writer.lock().unwrap();
        let text = String::from_utf8(written.clone()).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.lines().next().unwrap().contains("verify-start"));
    }

    #[test]
    fn null_sink_drops_events_without_panicking() {
        let sink = NullSink;
        sink.emit(&Event::LockReleased { key: "abc".into() });
    }
}
