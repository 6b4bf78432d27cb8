//! Streaming and interactive progress output.

use super::{render_summary, truncate, Progress};
use crate::context::RunIdentity;
use crate::core::{StepEvent, StepRecord, StepStatus};
use crate::pipeline::{RunObserver, RunResult};
use parking_lot::Mutex;
use std::io::{IsTerminal, Write};

/// Narrowest layout rendered.
pub const MIN_WIDTH: usize = 40;

const DEFAULT_WIDTH: usize = 80;
const CLEAR_LINE: &str = "\r\x1b[2K";

/// Terminal width from `COLUMNS`, never below [`MIN_WIDTH`].
#[must_use]
pub fn terminal_width() -> usize {
    std::env::var("COLUMNS")
        .ok()
        .and_then(|c| c.trim().parse::<usize>().ok())
        .unwrap_or(DEFAULT_WIDTH)
        .max(MIN_WIDTH)
}

/// How progress is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// One appended line per transition.
    Streaming,
    /// A single redrawn status line.
    Interactive,
}

impl RenderMode {
    /// Interactive on a terminal unless `force_plain`, streaming otherwise.
    #[must_use]
    pub fn detect(force_plain: bool) -> Self {
        if !force_plain && std::io::stdout().is_terminal() {
            Self::Interactive
        } else {
            Self::Streaming
        }
    }
}

/// Renders progress as the executor reports transitions.
///
/// Output errors are ignored; progress must never affect the run.
pub struct ProgressReporter {
    mode: RenderMode,
    width: usize,
    out: Mutex<Box<dyn Write + Send>>,
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("mode", &self.mode)
            .field("width", &self.width)
            .finish_non_exhaustive()
    }
}

impl ProgressReporter {
    /// Creates a reporter writing to `out`.
    #[must_use]
    pub fn new(mode: RenderMode, width: usize, out: Box<dyn Write + Send>) -> Self {
        Self {
            mode,
            width: width.max(MIN_WIDTH),
            out: Mutex::new(out),
        }
    }

    /// Writes to stdout, detecting the mode.
    #[must_use]
    pub fn stdout(force_plain: bool) -> Self {
        Self::new(RenderMode::detect(force_plain), terminal_width(), Box::new(std::io::stdout()))
    }

    /// Active mode.
    #[must_use]
    pub const fn mode(&self) -> RenderMode {
        self.mode
    }

    fn event_line(&self, progress: &Progress, event: &StepEvent) -> String {
        let mut line = format!("[{}/{}] {} {}", progress.completed, progress.total, event.step_id, event.to);
        if let Some(message) = &event.message {
            line.push_str(": ");
            line.push_str(message);
        }
        truncate(&line, self.width)
    }

    fn status_line(&self, progress: &Progress) -> String {
        let bar_width = (self.width / 3).max(10);
        let current = progress.current.as_deref().unwrap_or("");
        let line = format!(
            "{} {:>3}% {}/{} {current}",
            progress.bar(bar_width),
            progress.percent(),
            progress.completed,
            progress.total
        );
        truncate(&line, self.width)
    }

    fn write(&self, text: &str) {
        let mut out = self.out.lock();
        let _ = out.write_all(text.as_bytes());
        let _ = out.flush();
    }
}

impl RunObserver for ProgressReporter {
    fn on_update(&self, _run: &RunIdentity, records: &[StepRecord], event: &StepEvent) {
        let progress = Progress::from_records(records);
        match self.mode {
            RenderMode::Streaming => self.write(&format!("{}\n", self.event_line(&progress, event))),
            RenderMode::Interactive => {
                let mut text = String::from(CLEAR_LINE);
                if event.to == StepStatus::Failed {
                    text.push_str(&self.event_line(&progress, event));
                    text.push('\n');
                }
                text.push_str(&self.status_line(&progress));
                self.write(&text);
            }
        }
    }

    fn on_finish(&self, result: &RunResult) {
        let mut text = String::new();
        if self.mode == RenderMode::Interactive {
            text.push('\n');
        }
        text.push('\n');
        text.push_str(&render_summary(&result.records, self.width));
        text.push_str(&format!(
            "{} {}: {} applied, {} skipped, {} failed of {}{}\n",
            result.mode,
            if result.is_success() { "finished" } else { "incomplete" },
            result.applied_count(),
            result.skipped_count(),
            result.failed_count(),
            result.total(),
            if result.interrupted { " (interrupted)" } else { "" }
        ));
        if let Some(step) = &result.halted_at {
            text.push_str(&format!("halted at '{step}'; fix the cause and re-run\n"));
        }
        self.write(&text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{InstallMode, Mutation};
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Buffer {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    fn table(statuses: &[StepStatus]) -> Vec<StepRecord> {
        statuses
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let mut r = StepRecord::pending(format!("step-{i}"), i, format!("Step {i}"), Mutation::Local);
                r.status = *s;
                r
            })
            .collect()
    }

    fn event(id: &str, to: StepStatus, message: Option<&str>) -> StepEvent {
        StepEvent {
            step_id: id.to_string(),
            order: 0,
            total: 2,
            from: StepStatus::Running,
            to,
            message: message.map(String::from),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_streaming_appends_one_line_per_transition() {
        let buffer = Buffer::default();
        let reporter = ProgressReporter::new(RenderMode::Streaming, 80, Box::new(buffer.clone()));
        let run = RunIdentity::new(InstallMode::Install);

        reporter.on_update(&run, &table(&[StepStatus::Done, StepStatus::Pending]), &event("step-0", StepStatus::Done, None));
        reporter.on_update(
            &run,
            &table(&[StepStatus::Done, StepStatus::Failed]),
            &event("step-1", StepStatus::Failed, Some("boom")),
        );

        assert_eq!(buffer.text(), "[1/2] step-0 done\n[2/2] step-1 failed: boom\n");
    }

    #[test]
    fn test_interactive_redraws_and_keeps_failures() {
        let buffer = Buffer::default();
        let reporter = ProgressReporter::new(RenderMode::Interactive, 60, Box::new(buffer.clone()));
        let run = RunIdentity::new(InstallMode::Install);

        reporter.on_update(&run, &table(&[StepStatus::Running, StepStatus::Pending]), &event("step-0", StepStatus::Running, None));
        reporter.on_update(
            &run,
            &table(&[StepStatus::Failed, StepStatus::Pending]),
            &event("step-0", StepStatus::Failed, Some("boom")),
        );

        let text = buffer.text();
        assert_eq!(text.matches(CLEAR_LINE).count(), 2);
        assert!(text.contains("step-0 failed: boom\n"));
        assert!(text.ends_with("50% 1/2 "));
    }

    #[test]
    fn test_width_floor() {
        let reporter = ProgressReporter::new(RenderMode::Streaming, 5, Box::new(Buffer::default()));
        assert_eq!(reporter.width, MIN_WIDTH);
    }

    #[test]
    fn test_plain_forces_streaming() {
        assert_eq!(RenderMode::detect(true), RenderMode::Streaming);
    }
}
