//! Append-only execution log.

use crate::core::RunEvent;
use crate::events::EventSink;
use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// File name of the execution log inside the state directory.
pub const EXECUTION_LOG: &str = "execution.log";

/// Appends one timestamped line per event to `execution.log`.
#[derive(Debug)]
pub struct ExecutionLogSink {
    path: PathBuf,
    file: Mutex<BufWriter<File>>,
}

impl ExecutionLogSink {
    /// Opens (or creates) the log in `state_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be created.
    pub fn open(state_dir: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(state_dir)?;
        let path = state_dir.join(EXECUTION_LOG);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Log path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Renders one log line, without the trailing newline.
    #[must_use]
    pub fn render(event: &RunEvent) -> String {
        let ts = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let detail = match event {
            RunEvent::RunStarted { run_id, mode, total } => format!("run={run_id} mode={mode} steps={total}"),
            RunEvent::Transition(t) => {
                let mut line = format!("step={} {} -> {}", t.step_id, t.from, t.to);
                if let Some(message) = &t.message {
                    line.push_str(&format!(" message={message:?}"));
                }
                line
            }
            RunEvent::ProbeWarning { step_id, error } => format!("step={step_id} error={error:?}"),
            RunEvent::SafetyCheck {
                step_id,
                phase,
                restored,
            } => format!("step={step_id} phase={phase} restored={restored}"),
            RunEvent::RunFinished {
                run_id,
                completed,
                failed,
                interrupted,
            } => format!("run={run_id} completed={completed} failed={failed} interrupted={interrupted}"),
        };
        format!("{ts} {} {detail}", event.name())
    }
}

impl EventSink for ExecutionLogSink {
    fn emit(&self, event: &RunEvent) {
        let line = Self::render(event);
        if let Err(e) = writeln!(self.file.lock(), "{line}") {
            warn!(path = %self.path.display(), error = %e, "Cannot append to execution log");
        }
    }

    fn flush(&self) {
        if let Err(e) = self.file.lock().flush() {
            warn!(path = %self.path.display(), error = %e, "Cannot flush execution log");
        }
    }
}
