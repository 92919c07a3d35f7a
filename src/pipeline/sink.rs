//! Text mirror: one formatted line per processed event, to stdout and/or a
//! log file.

use std::fs::OpenOptions;
use std::io::{BufWriter, Write};

use parking_lot::Mutex;
use tracing::{error, info};

use crate::event::Event;

pub struct TextMirror {
    console: bool,
    file: Option<Mutex<BufWriter<std::fs::File>>>,
}

impl TextMirror {
    /// Open the mirror sinks. A file that cannot be opened is logged and
    /// skipped; the console mirror is unaffected.
    pub fn new(console: bool, file_path: &str) -> Self {
        let file = if file_path.is_empty() {
            None
        } else {
            match OpenOptions::new().create(true).append(true).open(file_path) {
                Ok(file) => {
                    info!(path = file_path, "mirroring events to file");
                    Some(Mutex::new(BufWriter::new(file)))
                }
                Err(err) => {
                    error!(path = file_path, error = %err, "failed to open log file");
                    None
                }
            }
        };
        Self { console, file }
    }

    pub fn is_enabled(&self) -> bool {
        self.console || self.file.is_some()
    }

    /// Mirror one processed event. Matched pattern names prefix the line.
    pub fn write(&self, event: &Event, matched_patterns: &[String]) {
        if !self.is_enabled() {
            return;
        }

        let mut line = String::new();
        if let Some(pattern) = matched_patterns.first() {
            line.push_str(&format!("[PATTERN:{pattern}] "));
        }
        line.push_str(&event.format_line());

        if self.console {
            println!("{line}");
        }
        if let Some(file) = &self.file {
            let mut writer = file.lock();
            if let Err(err) = writeln!(writer, "{line}") {
                error!(error = %err, "failed to write log line");
            }
        }
    }

    pub fn flush(&self) {
        if let Some(file) = &self.file {
            let _ = file.lock().flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventBuilder;

    #[test]
    fn file_mirror_writes_one_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.log");
        let mirror = TextMirror::new(false, path.to_str().unwrap());

        let event = EventBuilder::detached("api.timeout")
            .message("upstream stalled")
            .build();
        mirror.write(&event, &[]);
        mirror.write(&event, &["cascading_failure".to_string()]);
        mirror.flush();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("api.timeout - upstream stalled"));
        assert!(lines[1].starts_with("[PATTERN:cascading_failure] "));
    }

    #[test]
    fn unwritable_path_degrades_to_disabled_file_sink() {
        let mirror = TextMirror::new(false, "/nonexistent-dir/events.log");
        assert!(!mirror.is_enabled());
        // Writing is a no-op rather than a panic.
        mirror.write(&EventBuilder::detached("api.call").build(), &[]);
    }
}
