//! Maps change lines back onto the live buffer.
//!
//! Line numbers recorded in a diff describe the file as the backend saw it.
//! By the time the user clicks a preview row the buffer may have been edited
//! or reloaded, so positions are recovered by content first and only then by
//! the recorded numbers.

use crate::types::{ChangeBlock, LineKind};

/// Which change lines take part in a bulk resolve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineFilter {
    /// Every line of the block (preview: the buffer still holds the old text)
    All,
    /// Skip deleted lines (after apply they no longer exist in the buffer)
    SkipDeleted,
}

/// Resolve the current 1-based line number of `block.lines[line_index]`.
///
/// Returns `None` only when the buffer is empty or the block targets a file
/// that will be created by the patch.
pub fn resolve<S: AsRef<str>>(block: &ChangeBlock, line_index: usize, buffer: &[S]) -> Option<u32> {
    if buffer.is_empty() || block.will_be_created() {
        return None;
    }

    if let Some(line) = block.lines.get(line_index) {
        let hint = line.position_hint();
        if let Some(found) = find_line_by_content(buffer, &line.content, hint) {
            return Some(found);
        }
    }

    Some(recorded_fallback(block, buffer.len()))
}

/// Find the line whose trimmed text equals `content` trimmed.
///
/// With several matches the one closest to `around` wins; ties go to the
/// earlier line. Without a hint the first match is returned.
pub fn find_line_by_content<S: AsRef<str>>(
    buffer: &[S],
    content: &str,
    around: Option<u32>,
) -> Option<u32> {
    let target = content.trim();
    let mut best: Option<(u32, u64)> = None;

    for (idx, text) in buffer.iter().enumerate() {
        if text.as_ref().trim() != target {
            continue;
        }
        let ln = idx as u32 + 1;
        let Some(around) = around else {
            return Some(ln);
        };
        let dist = (i64::from(ln) - i64::from(around)).unsigned_abs();
        match best {
            Some((_, best_dist)) if best_dist <= dist => {}
            _ => best = Some((ln, dist)),
        }
    }

    best.map(|(ln, _)| ln)
}

/// Recorded hunk start (new side, else old side) clamped into the buffer
fn recorded_fallback(block: &ChangeBlock, line_count: usize) -> u32 {
    let recorded = if block.new_start > 0 {
        block.new_start
    } else {
        block.old_start
    };
    let max = u32::try_from(line_count).unwrap_or(u32::MAX).max(1);
    recorded.clamp(1, max)
}

/// Resolve every selected line of the blocks targeting `file_path`.
///
/// The result is de-duplicated and keeps diff order.
pub fn resolve_all<S: AsRef<str>>(
    blocks: &[ChangeBlock],
    file_path: &str,
    buffer: &[S],
    filter: LineFilter,
) -> Vec<u32> {
    let mut lines = Vec::new();

    for block in blocks.iter().filter(|b| b.file_path == file_path) {
        for (idx, line) in block.lines.iter().enumerate() {
            if filter == LineFilter::SkipDeleted && line.kind == LineKind::Del {
                continue;
            }
            if let Some(ln) = resolve(block, idx, buffer) {
                if !lines.contains(&ln) {
                    lines.push(ln);
                }
            }
        }
    }

    lines
}
