//! Progress reporting.
//!
//! Everything here is a projection of the status table: nothing in this
//! module changes a step's status.

mod projection;
mod reporter;
mod summary;

pub use projection::Progress;
pub use reporter::{terminal_width, ProgressReporter, RenderMode, MIN_WIDTH};
pub use summary::render_summary;

/// Shortens `text` to at most `width` characters, marking the cut.
pub(crate) fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let keep = width.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a longer message", 10), "a longe...");
    }
}
