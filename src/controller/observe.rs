//! Report sinks: where pulse reports go after each invocation.

use crate::report::{PulseReport, PulseStatus};
use std::io::Write;
use tracing::{debug, error, warn};

/// Receives every [`PulseReport`] the controller produces.
pub trait ReportSink: Send {
    fn record(&mut self, report: &PulseReport);
}

/// Structured `tracing` output: one debug line per module, warnings for
/// backpressure and errors, an error line when a module degrades.
#[derive(Debug, Default)]
pub struct TracingReportSink;

impl ReportSink for TracingReportSink {
    fn record(&mut self, report: &PulseReport) {
        for m in &report.modules {
            debug!(
                tick = report.tick,
                module = %m.module,
                kind = %m.kind,
                quota = m.quota,
                consumed = m.consumed,
                produced = m.produced,
                queued = m.queued,
                status = %m.status,
                elapsed_us = m.elapsed.as_micros() as u64,
                "Pulse"
            );
            if m.shortfall > 0 {
                warn!(
                    tick = report.tick,
                    module = %m.module,
                    shortfall = m.shortfall,
                    carried = m.carried,
                    "Backpressure: output buffer full"
                );
            }
            if m.errors > 0 && m.status != PulseStatus::Failed {
                warn!(
                    tick = report.tick,
                    module = %m.module,
                    errors = m.errors,
                    dropped = m.dropped,
                    "Item errors during pulse"
                );
            }
            if let (PulseStatus::Failed, Some(fatal)) = (m.status, &m.fatal) {
                error!(tick = report.tick, module = %m.module, reason = %fatal, "Module went fatal");
            }
        }
        debug!(
            tick = report.tick,
            consumed = report.total_consumed(),
            produced = report.total_produced(),
            elapsed_ms = report.elapsed.as_secs_f64() * 1000.0,
            "Tick complete"
        );
    }
}

/// Writes each report as one JSON object per line.
pub struct JsonLinesSink<W> {
    writer: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl JsonLinesSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> ReportSink for JsonLinesSink<W> {
    fn record(&mut self, report: &PulseReport) {
        let written = serde_json::to_writer(&mut self.writer, report)
            .map_err(std::io::Error::from)
            .and_then(|()| self.writer.write_all(b"\n"))
            .and_then(|()| self.writer.flush());
        if let Err(e) = written {
            warn!(tick = report.tick, "Failed to write JSON report: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::ModuleKind;
    use crate::report::ModuleReport;
    use chrono::Utc;
    use std::time::Duration;

    #[test]
    fn json_lines_one_object_per_report() {
        let mut sink = JsonLinesSink::new(Vec::new());
        for tick in 1..=2 {
            let mut m = ModuleReport::new("source", ModuleKind::Source, 10);
            m.produced = 5;
            m.shortfall = 5;
            m.status = PulseStatus::Blocked;
            sink.record(&PulseReport {
                tick,
                started_at: Utc::now(),
                elapsed: Duration::from_millis(1),
                modules: vec![m],
            });
        }
        let out = String::from_utf8(sink.into_inner()).expect("utf8");
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).expect("json");
        assert_eq!(first["tick"], 1);
        assert_eq!(first["modules"][0]["status"], "blocked");
        assert_eq!(first["modules"][0]["kind"], "source");
        assert_eq!(first["modules"][0]["shortfall"], 5);
    }
}
