//! Text shown alongside a preview: manual-review hints, explanation
//! summaries and the compact diff view.

use crate::types::ChangeBlock;
use crate::workflow::ManualReview;

/// "old a~b, new c~d" label for a block
pub fn block_range_label(block: &ChangeBlock) -> String {
    let (old_from, old_to) = block.old_range();
    let (new_from, new_to) = block.new_range();
    format!("old {}~{}, new {}~{}", old_from, old_to, new_from, new_to)
}

/// Render the hint shown when no patch can be applied automatically
pub fn manual_review_hint(review: &ManualReview) -> String {
    if review.blocks.is_empty() {
        return "Automatic fix is not possible; manual review is required.".to_string();
    }

    let mut out = String::from("Automatic fix failed\n");
    if let Some(failure) = &review.failure_type {
        out.push_str(&format!("Cause: {}\n", failure));
    }
    if let Some(explanation) = &review.explanation {
        out.push_str(explanation);
        out.push('\n');
    }

    out.push_str(if review.estimated {
        "Estimated location:\n"
    } else {
        "Location:\n"
    });
    for block in &review.blocks {
        out.push_str(&format!("  {}  ({})\n", block.file_path, block_range_label(block)));
    }

    out.push_str("Try one of:\n");
    out.push_str("  - edit the code directly in the editor\n");
    out.push_str("  - apply only part of the preview\n");
    out.push_str("  - simplify the code and run again\n");
    out
}

/// Agent explanation with a one-sentence short form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplanationSummary<'a> {
    text: &'a str,
}

impl<'a> ExplanationSummary<'a> {
    pub fn new(text: &'a str) -> Self {
        Self { text }
    }

    /// First sentence, terminated with a period
    pub fn short(&self) -> String {
        let first = self.text.split('.').next().unwrap_or(self.text).trim();
        format!("{}.", first)
    }

    pub fn full(&self) -> &'a str {
        self.text
    }

    /// Whether a "show details" toggle makes sense
    pub fn has_details(&self) -> bool {
        self.text.contains('.')
    }
}

/// Raw diff lines for the modal; the compact view keeps only changes and hunk headers
pub fn diff_view_lines(diff: &str, show_all: bool) -> Vec<&str> {
    diff.lines()
        .filter(|line| show_all || line.starts_with('+') || line.starts_with('-') || line.starts_with("@@"))
        .collect()
}
