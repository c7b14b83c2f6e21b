use std::sync::LazyLock;

use regex::Regex;

use crate::types::{ChangeBlock, ChangeLine, PreviewRow};

/// Path used for hunks that appear before any file header
pub const DEFAULT_FILE_PATH: &str = "untitled";

static HUNK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").expect("hunk header pattern")
});

/// Parse a unified diff string into change blocks.
///
/// Never fails: lines that are not part of a recognised structure are skipped.
pub fn parse_diff(diff: &str) -> Vec<ChangeBlock> {
    parse_diff_for_file(diff, DEFAULT_FILE_PATH)
}

/// Parse a unified diff, attributing header-less hunks to `default_path`
pub fn parse_diff_for_file(diff: &str, default_path: &str) -> Vec<ChangeBlock> {
    let mut blocks = Vec::new();
    let mut current: Option<HunkCursor> = None;
    let mut file_path = default_path.to_string();
    let mut old_path: Option<String> = None;

    for raw in diff.split('\n') {
        let line = raw.strip_suffix('\r').unwrap_or(raw);

        // Body lines win while the open hunk still expects them, so a deleted
        // "-- comment" is not mistaken for a file header.
        if let Some(cursor) = current.as_mut() {
            if !cursor.is_complete() && cursor.push(line) {
                continue;
            }
        }

        if let Some(header) = parse_hunk_header(line) {
            flush(&mut current, &mut blocks);
            current = Some(HunkCursor::new(&file_path, header));
            continue;
        }

        if line.starts_with("diff --git ") {
            flush(&mut current, &mut blocks);
            old_path = None;
            if let Some(b_idx) = line.find(" b/") {
                file_path = line[b_idx + 3..].to_string();
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix("--- ") {
            flush(&mut current, &mut blocks);
            old_path = header_path(rest);
            continue;
        }

        if let Some(rest) = line.strip_prefix("+++ ") {
            flush(&mut current, &mut blocks);
            // A deleted file has "+++ /dev/null"; keep its old name
            file_path = header_path(rest)
                .or_else(|| old_path.take())
                .unwrap_or_else(|| default_path.to_string());
            continue;
        }

        // Anything else outside an open hunk (index lines, a format-patch
        // "-- " signature, trailing garbage) is skipped
    }

    flush(&mut current, &mut blocks);
    blocks
}

/// Parsed `@@ -o,l +o2,l2 @@` values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HunkHeader {
    old_start: u32,
    old_length: u32,
    new_start: u32,
    new_length: u32,
}

fn parse_hunk_header(line: &str) -> Option<HunkHeader> {
    let caps = HUNK_RE.captures(line)?;

    let old_start: u32 = caps.get(1)?.as_str().parse().ok()?;
    let old_length: u32 = caps.get(2).map_or(Some(1), |m| m.as_str().parse().ok())?;
    let new_start: u32 = caps.get(3)?.as_str().parse().ok()?;
    let new_length: u32 = caps.get(4).map_or(Some(1), |m| m.as_str().parse().ok())?;

    Some(HunkHeader {
        old_start,
        old_length,
        new_start,
        new_length,
    })
}

/// Extract a repo-relative path from the text after `--- ` / `+++ `
fn header_path(rest: &str) -> Option<String> {
    // Some tools append "\t<timestamp>"
    let path = rest.split('\t').next().unwrap_or(rest).trim_end();
    if path.is_empty() || path == "/dev/null" {
        return None;
    }
    let path = path
        .strip_prefix("a/")
        .or_else(|| path.strip_prefix("b/"))
        .unwrap_or(path);
    Some(path.to_string())
}

fn flush(current: &mut Option<HunkCursor>, blocks: &mut Vec<ChangeBlock>) {
    if let Some(cursor) = current.take() {
        blocks.push(cursor.block);
    }
}

/// Running line counters for the hunk being parsed
struct HunkCursor {
    block: ChangeBlock,
    old_line: u32,
    new_line: u32,
    old_seen: u32,
    new_seen: u32,
}

impl HunkCursor {
    fn new(file_path: &str, header: HunkHeader) -> Self {
        Self {
            block: ChangeBlock {
                file_path: file_path.to_string(),
                file_exists: None,
                old_start: header.old_start,
                old_length: header.old_length,
                new_start: header.new_start,
                new_length: header.new_length,
                lines: Vec::new(),
            },
            old_line: header.old_start,
            new_line: header.new_start,
            old_seen: 0,
            new_seen: 0,
        }
    }

    fn is_complete(&self) -> bool {
        self.old_seen >= self.block.old_length && self.new_seen >= self.block.new_length
    }

    fn old_remaining(&self) -> bool {
        self.old_seen < self.block.old_length
    }

    fn new_remaining(&self) -> bool {
        self.new_seen < self.block.new_length
    }

    /// Classify one body line. Returns false when the line is not hunk body.
    ///
    /// A line is only body while its side(s) still have room under the
    /// header's lengths, so the side counts never exceed them.
    fn push(&mut self, line: &str) -> bool {
        let change = if let Some(content) = line.strip_prefix('+') {
            if !self.new_remaining() {
                return false;
            }
            let ln = self.new_line;
            self.new_line = self.new_line.saturating_add(1);
            self.new_seen = self.new_seen.saturating_add(1);
            ChangeLine::add(content, ln)
        } else if let Some(content) = line.strip_prefix('-') {
            if !self.old_remaining() {
                return false;
            }
            let ln = self.old_line;
            self.old_line = self.old_line.saturating_add(1);
            self.old_seen = self.old_seen.saturating_add(1);
            ChangeLine::del(content, ln)
        } else if line.starts_with('\\') {
            // "\ No newline at end of file"
            return true;
        } else if !(self.old_remaining() && self.new_remaining()) {
            return false;
        } else if let Some(content) = line.strip_prefix(' ') {
            self.context(content)
        } else if line.is_empty() {
            // Editors and chat transports often strip the lone space of a blank context line
            self.context("")
        } else {
            return false;
        };

        self.block.lines.push(change);
        true
    }

    fn context(&mut self, content: &str) -> ChangeLine {
        let (o, n) = (self.old_line, self.new_line);
        self.old_line = self.old_line.saturating_add(1);
        self.new_line = self.new_line.saturating_add(1);
        self.old_seen = self.old_seen.saturating_add(1);
        self.new_seen = self.new_seen.saturating_add(1);
        ChangeLine::context(content, o, n)
    }
}

/// Flatten blocks into UI rows, in diff order
pub fn preview_rows(blocks: &[ChangeBlock]) -> Vec<PreviewRow> {
    blocks
        .iter()
        .enumerate()
        .flat_map(|(block_index, block)| {
            block
                .lines
                .iter()
                .enumerate()
                .map(move |(line_index, line)| PreviewRow {
                    block_index,
                    line_index,
                    kind: line.kind,
                    text: line.content.clone(),
                })
        })
        .collect()
}

/// Group blocks by file path in order of first appearance.
///
/// Each entry keeps the block's index into the original slice so callers can
/// address it with `(file_path, block_index, line_index)`.
pub fn group_by_file(blocks: &[ChangeBlock]) -> Vec<(&str, Vec<(usize, &ChangeBlock)>)> {
    let mut groups: Vec<(&str, Vec<(usize, &ChangeBlock)>)> = Vec::new();
    for (idx, block) in blocks.iter().enumerate() {
        match groups.iter_mut().find(|(path, _)| *path == block.file_path) {
            Some((_, members)) => members.push((idx, block)),
            None => groups.push((block.file_path.as_str(), vec![(idx, block)])),
        }
    }
    groups
}

/// Recorded baseline highlight lines for one file (new side, else old side), de-duplicated
pub fn highlight_lines(blocks: &[ChangeBlock], file_path: &str) -> Vec<u32> {
    let mut lines = Vec::new();
    for block in blocks.iter().filter(|b| b.file_path == file_path) {
        for line in &block.lines {
            if let Some(n) = line.position_hint() {
                if n > 0 && !lines.contains(&n) {
                    lines.push(n);
                }
            }
        }
    }
    lines
}

/// 1-based new-side line numbers of every added line in a diff
pub fn changed_lines(diff: &str) -> Vec<u32> {
    parse_diff(diff)
        .iter()
        .flat_map(|b| b.lines.iter())
        .filter(|l| l.kind == crate::types::LineKind::Add)
        .filter_map(|l| l.new_line)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LineKind;

    #[test]
    fn test_parse_simple_hunk() {
        let diff = "@@ -1,2 +1,3 @@\n context_line\n+added_line\n context_line2";
        let blocks = parse_diff(diff);
        assert_eq!(blocks.len(), 1);

        let block = &blocks[0];
        assert_eq!(block.old_length, 2);
        assert_eq!(block.new_length, 3);
        assert_eq!(
            block.lines,
            vec![
                ChangeLine::context("context_line", 1, 1),
                ChangeLine::add("added_line", 2),
                ChangeLine::context("context_line2", 2, 3),
            ]
        );
    }

    #[test]
    fn test_parse_git_diff() {
        let diff = r#"diff --git a/src/main.rs b/src/main.rs
index 1234567..abcdefg 100644
--- a/src/main.rs
+++ b/src/main.rs
@@ -1,3 +1,4 @@
 fn main() {
+    println!("Hello");
     println!("World");
 }
"#;
        let blocks = parse_diff(diff);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].file_path, "src/main.rs");
        assert_eq!(blocks[0].lines.len(), 4);
    }

    #[test]
    fn test_parse_empty_diff() {
        assert!(parse_diff("").is_empty());
        assert!(parse_diff("   \n\n   \n").is_empty());
    }

    #[test]
    fn test_parse_no_hunks() {
        let diff = "--- a/main.js\n+++ b/main.js\n";
        assert!(parse_diff(diff).is_empty());
    }

    #[test]
    fn test_parse_is_deterministic() {
        let diff = "--- a/a.py\n+++ b/a.py\n@@ -3,2 +3,2 @@\n-x = 1\n+x = 2\n y = 3\n";
        assert_eq!(parse_diff(diff), parse_diff(diff));
    }

    #[test]
    fn test_missing_headers_use_default_path() {
        let diff = "@@ -1 +1 @@\n-old\n+new\n";
        let blocks = parse_diff_for_file(diff, "main.py");
        assert_eq!(blocks[0].file_path, "main.py");

        let blocks = parse_diff(diff);
        assert_eq!(blocks[0].file_path, DEFAULT_FILE_PATH);
    }

    #[test]
    fn test_parse_multiple_hunks_same_file() {
        let diff = r#"--- a/multi.js
+++ b/multi.js
@@ -1,3 +1,4 @@
 function first() {
+  // added in first hunk
 }

@@ -10,3 +11,4 @@
 function second() {
+  // added in second hunk
 }

"#;
        let blocks = parse_diff(diff);
        assert_eq!(blocks.len(), 2);
        assert!(blocks.iter().all(|b| b.file_path == "multi.js"));
        assert_eq!(blocks[1].old_start, 10);
        assert_eq!(blocks[1].new_start, 11);
        assert_eq!(blocks[1].lines[1].new_line, Some(12));
    }

    #[test]
    fn test_parse_multiple_files() {
        let diff = r#"--- a/file1.txt
+++ b/file1.txt
@@ -1,2 +1,3 @@
 line 1
+added line
 line 2
--- /dev/null
+++ b/file2.txt
@@ -0,0 +1,2 @@
+new file line 1
+new file line 2
--- a/file3.txt
+++ /dev/null
@@ -1 +0,0 @@
-removed content
"#;
        let blocks = parse_diff(diff);
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].file_path, "file1.txt");
        assert_eq!(blocks[1].file_path, "file2.txt");
        assert_eq!(blocks[2].file_path, "file3.txt");

        // New file: only added lines, no old side
        assert!(blocks[1].lines.iter().all(|l| l.kind == LineKind::Add));
        assert!(blocks[1].lines.iter().all(|l| l.old_line.is_none()));
        // The parser does not decide file existence
        assert_eq!(blocks[1].file_exists, None);

        assert_eq!(blocks[2].lines[0].kind, LineKind::Del);
        assert_eq!(blocks[2].lines[0].old_line, Some(1));
    }

    #[test]
    fn test_parse_hunk_line_numbers() {
        let diff = r#"--- a/numbered.rs
+++ b/numbered.rs
@@ -5,6 +5,6 @@
 context line 1
 context line 2
+added line
 context line 3
-removed line
 context line 4
"#;
        let lines = &parse_diff(diff)[0].lines;
        assert_eq!(lines.len(), 6);
        assert_eq!((lines[0].old_line, lines[0].new_line), (Some(5), Some(5)));
        assert_eq!((lines[2].old_line, lines[2].new_line), (None, Some(7)));
        assert_eq!((lines[3].old_line, lines[3].new_line), (Some(7), Some(8)));
        assert_eq!((lines[4].old_line, lines[4].new_line), (Some(8), None));
        assert_eq!((lines[5].old_line, lines[5].new_line), (Some(9), Some(9)));
    }

    #[test]
    fn test_side_counts_match_header() {
        let diff = r#"--- a/mixed.txt
+++ b/mixed.txt
@@ -1,6 +1,7 @@
 line1
-removed
+added1
+added2
 line4
-removed2
 line6
+added3
 line7
"#;
        let block = &parse_diff(diff)[0];
        assert_eq!(block.old_side_count(), block.old_length as usize);
        assert_eq!(block.new_side_count(), block.new_length as usize);
        assert_eq!(block.lines.len(), 9);
    }

    #[test]
    fn test_parse_hunk_header_single_line() {
        let diff = "--- a/single.txt\n+++ b/single.txt\n@@ -1 +1 @@\n-old content\n+new content\n";
        let block = &parse_diff(diff)[0];
        assert_eq!(block.old_length, 1);
        assert_eq!(block.new_length, 1);
        assert_eq!(block.lines.len(), 2);
    }

    #[test]
    fn test_parse_hunk_with_section_text() {
        let diff = "@@ -10,2 +10,3 @@ def handler():\n     x = 1\n+    y = 2\n     return x\n";
        let block = &parse_diff(diff)[0];
        assert_eq!(block.old_start, 10);
        assert_eq!(block.lines.len(), 3);
    }

    #[test]
    fn test_parse_no_newline_marker_skipped() {
        let diff = r#"--- a/no_newline.txt
+++ b/no_newline.txt
@@ -1,2 +1,2 @@
 line 1
-old line 2
\ No newline at end of file
+new line 2
\ No newline at end of file
"#;
        let lines = &parse_diff(diff)[0].lines;
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1].kind, LineKind::Del);
        assert_eq!(lines[2].kind, LineKind::Add);
    }

    #[test]
    fn test_deleted_line_that_looks_like_header() {
        let diff = "--- a/q.sql\n+++ b/q.sql\n@@ -1,2 +1,1 @@\n--- legacy comment\n SELECT 1;\n";
        let blocks = parse_diff(diff);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].lines[0].kind, LineKind::Del);
        assert_eq!(blocks[0].lines[0].content, "-- legacy comment");
        assert_eq!(blocks[0].file_path, "q.sql");
    }

    #[test]
    fn test_blank_context_without_space() {
        let diff = "@@ -1,3 +1,4 @@\n line 1\n\n+added\n line 3\n";
        let lines = &parse_diff(diff)[0].lines;
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[1].kind, LineKind::Context);
        assert_eq!(lines[1].content, "");
        assert_eq!(lines[2].new_line, Some(3));
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let diff = "garbage before\n@@ invalid @@\n@@ -1 +1 @@\n-a\n+b\nnot a diff line\n";
        let blocks = parse_diff(diff);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].lines.len(), 2);
    }

    #[test]
    fn test_crlf_input() {
        let diff = "@@ -1 +1,2 @@\r\n a\r\n+b\r\n";
        let lines = &parse_diff(diff)[0].lines;
        assert_eq!(lines[0].content, "a");
        assert_eq!(lines[1].content, "b");
    }

    #[test]
    fn test_huge_hunk_start_does_not_overflow() {
        let blocks = parse_diff("@@ -4294967295,2 +1,2 @@\n a\n b\n");
        assert_eq!(blocks.len(), 1);
        let block = &blocks[0];
        assert_eq!(block.lines.len(), 2);
        assert_eq!(block.lines[0].old_line, Some(u32::MAX));
        assert_eq!(block.lines[1].old_line, Some(u32::MAX));
        assert_eq!(block.old_range(), (u32::MAX, u32::MAX));
    }

    #[test]
    fn test_format_patch_signature_ignored() {
        let diff = concat!(
            "From 1a2b3c Mon Sep 17 00:00:00 2001\n",
            "Subject: [PATCH] fix x\n",
            "\n",
            "---\n",
            " a.txt | 2 +-\n",
            "\n",
            "diff --git a/a.txt b/a.txt\n",
            "--- a/a.txt\n",
            "+++ b/a.txt\n",
            "@@ -1,2 +1,2 @@\n",
            "-x\n",
            "+y\n",
            " z\n",
            "-- \n",
            "2.39.0\n",
        );
        let blocks = parse_diff(diff);
        assert_eq!(blocks.len(), 1);
        let block = &blocks[0];
        assert_eq!(block.file_path, "a.txt");
        assert_eq!(block.lines.len(), 3);
        assert_eq!(block.old_side_count(), block.old_length as usize);
        assert_eq!(block.new_side_count(), block.new_length as usize);
    }

    #[test]
    fn test_lines_beyond_header_counts_skipped() {
        // Old side is full after "-a"; the extra deletion is not hunk body
        let block = &parse_diff("@@ -1 +1,2 @@\n-a\n-b\n+c\n+d\n")[0];
        assert_eq!(block.old_side_count(), 1);
        assert_eq!(block.new_side_count(), 2);
        assert_eq!(block.lines.len(), 3);
    }

    #[test]
    fn test_header_path_timestamp_stripped() {
        assert_eq!(
            header_path("b/src/x.js\t2024-01-01 00:00:00"),
            Some("src/x.js".to_string())
        );
        assert_eq!(header_path("/dev/null"), None);
    }

    #[test]
    fn test_parse_hunk_header_values() {
        let header = parse_hunk_header("@@ -99999,3 +100000,4 @@").unwrap();
        assert_eq!(header.old_start, 99999);
        assert_eq!(header.new_start, 100000);
        assert_eq!(header.new_length, 4);
        assert!(parse_hunk_header("not a hunk").is_none());
    }

    #[test]
    fn test_preview_rows_addressing() {
        let diff = "--- a/a.js\n+++ b/a.js\n@@ -1 +1 @@\n-x\n+y\n--- a/b.js\n+++ b/b.js\n@@ -4 +4,2 @@\n z\n+w\n";
        let rows = preview_rows(&parse_diff(diff));
        assert_eq!(rows.len(), 4);
        assert_eq!((rows[0].block_index, rows[0].line_index), (0, 0));
        assert_eq!((rows[3].block_index, rows[3].line_index), (1, 1));
        assert_eq!(rows[3].kind, LineKind::Add);
        assert_eq!(rows[3].text, "w");
    }

    #[test]
    fn test_group_by_file_keeps_global_indices() {
        let diff = "--- a/a.js\n+++ b/a.js\n@@ -1 +1 @@\n-x\n+y\n--- a/b.js\n+++ b/b.js\n@@ -1 +1 @@\n-p\n+q\n--- a/a.js\n+++ b/a.js\n@@ -9 +9 @@\n-m\n+n\n";
        let blocks = parse_diff(diff);
        let groups = group_by_file(&blocks);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "a.js");
        let indices: Vec<usize> = groups[0].1.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![0, 2]);
    }

    #[test]
    fn test_highlight_lines_dedup_per_file() {
        let diff = "--- a/a.js\n+++ b/a.js\n@@ -1,2 +1,2 @@\n-x\n+y\n z\n";
        let blocks = parse_diff(diff);
        assert_eq!(highlight_lines(&blocks, "a.js"), vec![1, 2]);
        assert!(highlight_lines(&blocks, "other.js").is_empty());
    }

    #[test]
    fn test_changed_lines() {
        let diff = "@@ -1,2 +1,3 @@\n a\n+b\n c\n@@ -10 +11,2 @@\n d\n+e\n";
        assert_eq!(changed_lines(diff), vec![2, 12]);
    }
}
