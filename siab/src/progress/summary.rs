//! Final summary table.

use super::truncate;
use crate::core::{StepRecord, StepStatus};
use std::fmt::Write;

const GROUPS: [StepStatus; 5] = [
    StepStatus::Failed,
    StepStatus::Done,
    StepStatus::Skipped,
    StepStatus::Running,
    StepStatus::Pending,
];

/// Renders every step grouped by status, failures first, fitted to
/// `width` columns. Long details wrap onto indented continuation lines so
/// no message is lost.
#[must_use]
pub fn render_summary(records: &[StepRecord], width: usize) -> String {
    let width = width.max(20);
    let id_width = records.iter().map(|r| r.id.chars().count()).max().unwrap_or(0);
    let mut out = String::new();

    for status in GROUPS {
        let group: Vec<&StepRecord> = records.iter().filter(|r| r.status == status).collect();
        if group.is_empty() {
            continue;
        }
        let _ = writeln!(out, "{} ({})", status.to_string().to_uppercase(), group.len());
        for record in group {
            let mut detail = record.description.clone();
            if let Some(message) = &record.message {
                let _ = write!(detail, ": {message}");
            }
            if let Some(kind) = record.failure {
                let _ = write!(detail, " [{kind}]");
            }
            write_row(&mut out, &record.id, id_width, &detail, width);
        }
    }
    out
}

fn write_row(out: &mut String, id: &str, id_width: usize, detail: &str, width: usize) {
    let prefix = format!("  {id:<id_width$}  ");
    let prefix_len = prefix.chars().count();
    let indent = prefix_len.min(width / 2);
    let lines = wrap(detail, width - indent);

    let mut lines = lines.iter();
    if prefix_len == indent {
        let first = lines.next().map_or("", String::as_str);
        let row = format!("{prefix}{first}");
        let _ = writeln!(out, "{}", row.trim_end());
    } else {
        let _ = writeln!(out, "{}", truncate(prefix.trim_end(), width));
    }
    for line in lines {
        let _ = writeln!(out, "{:indent$}{line}", "");
    }
}

/// Greedy word wrap; words longer than `width` are split.
fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut line = String::new();

    for mut word in text.split_whitespace() {
        loop {
            let used = line.chars().count();
            let needed = word.chars().count() + usize::from(used > 0);
            if used + needed <= width {
                if used > 0 {
                    line.push(' ');
                }
                line.push_str(word);
                break;
            }
            if used > 0 {
                lines.push(std::mem::take(&mut line));
                continue;
            }
            let split = word.char_indices().nth(width).map_or(word.len(), |(i, _)| i);
            lines.push(word[..split].to_string());
            word = &word[split..];
            if word.is_empty() {
                break;
            }
        }
    }
    if !line.is_empty() {
        lines.push(line);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FailureKind, Mutation};

    fn record(id: &str, status: StepStatus, message: Option<&str>) -> StepRecord {
        let mut record = StepRecord::pending(id, 0, format!("{id} step"), Mutation::Local);
        record.status = status;
        record.message = message.map(String::from);
        record
    }

    #[test]
    fn test_groups_failures_first() {
        let mut failed = record("metallb", StepStatus::Failed, Some("pool rejected"));
        failed.failure = Some(FailureKind::Apply);
        let records = vec![
            record("prepare-host", StepStatus::Done, None),
            failed,
            record("longhorn", StepStatus::Pending, None),
        ];

        let text = render_summary(&records, 80);
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "FAILED (1)");
        assert!(lines[1].contains("metallb") && lines[1].contains("pool rejected [apply]"));
        assert_eq!(lines[2], "DONE (1)");
        assert_eq!(lines[4], "PENDING (1)");
    }

    #[test]
    fn test_rows_fit_width() {
        let long = "x".repeat(200);
        let records = vec![record("a", StepStatus::Skipped, Some(&long))];
        let text = render_summary(&records, 40);

        for line in text.lines() {
            assert!(line.chars().count() <= 40, "{line}");
        }
        assert_eq!(text.matches('x').count(), 200);
    }

    #[test]
    fn test_failure_message_is_wrapped_not_cut() {
        let message = "helm upgrade --install istiod failed: context deadline exceeded \
                       while waiting for the sidecar injector webhook to become ready";
        let mut failed = record("istio", StepStatus::Failed, Some(message));
        failed.failure = Some(FailureKind::Timeout);
        let text = render_summary(&[failed], 40);
        let lines: Vec<&str> = text.lines().collect();

        assert!(lines.len() > 2);
        assert!(lines[1].starts_with("  istio  istio step: helm"));
        for line in &lines[2..] {
            assert!(line.starts_with("         "), "{line}");
            assert!(line.chars().count() <= 40, "{line}");
        }
        let joined = lines[1..]
            .iter()
            .map(|l| l.trim())
            .collect::<Vec<_>>()
            .join(" ");
        assert!(joined.contains("to become ready [timeout]"));
        assert!(joined.contains("context deadline exceeded"));
    }

    #[test]
    fn test_wrap_splits_long_words() {
        assert_eq!(wrap("abcdefgh ij", 3), vec!["abc", "def", "gh", "ij"]);
        assert_eq!(wrap("a b c", 3), vec!["a b", "c"]);
        assert!(wrap("", 10).is_empty());
    }
}
