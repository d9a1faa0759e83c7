//! Run progress reporting.
//!
//! Reports how far the prefetch phases and the row processing have got.
//! Progress goes to **stderr** so stdout stays clean for the run summary.

use std::io::Write;

/// A single progress event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProgressEvent {
    /// A bulk fetch phase: `n` of `total` URLs settled.
    Fetching { phase: String, n: u64, total: u64 },
    /// Link discovery over cached seed pages; total unknown until done.
    Discovering { pages: u64 },
    /// Sequential per-row extraction.
    Processing { n: u64, total: u64 },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "prefetch seeds  1,234 / 5,000 urls".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Fetching { phase, n, total } => format!(
                "prefetch {}  {} / {} urls\n",
                phase,
                format_number(*n),
                format_number(*total)
            ),
            ProgressEvent::Discovering { pages } => {
                format!("prefetch discovering links in {} pages...\n", format_number(*pages))
            }
            ProgressEvent::Processing { n, total } => format!(
                "process  {} / {} rows\n",
                format_number(*n),
                format_number(*total)
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        if let Ok(line) = serde_json::to_string(&event_json(&event)) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

fn event_json(event: &ProgressEvent) -> serde_json::Value {
    match event {
        ProgressEvent::Fetching { phase, n, total } => serde_json::json!({
            "event": "progress",
            "phase": "fetching",
            "set": phase,
            "n": n,
            "total": total
        }),
        ProgressEvent::Discovering { pages } => serde_json::json!({
            "event": "progress",
            "phase": "discovering",
            "pages": pages
        }),
        ProgressEvent::Processing { n, total } => serde_json::json!({
            "event": "progress",
            "phase": "processing",
            "n": n,
            "total": total
        }),
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn json_events_carry_phase() {
        let v = event_json(&ProgressEvent::Fetching {
            phase: "seeds".into(),
            n: 3,
            total: 10,
        });
        assert_eq!(v["phase"], "fetching");
        assert_eq!(v["set"], "seeds");
        assert_eq!(v["total"], 10);

        let v = event_json(&ProgressEvent::Processing { n: 1, total: 2 });
        assert_eq!(v["phase"], "processing");
    }
}
