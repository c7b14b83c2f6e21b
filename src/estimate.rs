//! Best-effort failure location when the agent could not produce a patch.

use std::sync::LazyLock;

use regex::Regex;

use crate::types::{ChangeBlock, ChangeLine, Lang};

static NODE_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":(\d+)(?::\d+)?\b").expect("node line pattern"));
static PYTHON_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"line\s+(\d+)").expect("python line pattern"));
static RUN_OUTPUT_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/app/.+?:(\d+)").expect("run output line pattern"));

/// First error line number mentioned in `stderr`
pub fn extract_error_line(stderr: &str, lang: Lang) -> Option<u32> {
    let re = match lang {
        Lang::Node => &*NODE_LINE_RE,
        Lang::Python => &*PYTHON_LINE_RE,
    };
    re.captures(stderr)?.get(1)?.as_str().parse().ok()
}

/// Error line from sandboxed run output (e.g. `/app/main.js:3`)
pub fn extract_run_error_line(output: &str) -> Option<u32> {
    RUN_OUTPUT_LINE_RE
        .captures(output)?
        .get(1)?
        .as_str()
        .parse()
        .ok()
}

/// Build one context-only block around the probable error location.
///
/// Without a usable line in `stderr` the guess is line 1 for short files and
/// line 10 otherwise. An empty file yields no blocks.
pub fn estimate_blocks_from_error(
    file_path: &str,
    file_content: &str,
    stderr: &str,
    lang: Lang,
    context: u32,
) -> Vec<ChangeBlock> {
    let lines: Vec<&str> = file_content.lines().collect();
    let total = lines.len() as u32;
    if total == 0 {
        return Vec::new();
    }

    let err_line = extract_error_line(stderr, lang)
        .unwrap_or(if total <= 20 { 1 } else { total.min(10) })
        .clamp(1, total);

    let start = err_line.saturating_sub(context).max(1);
    let end = err_line.saturating_add(context).min(total);
    let length = end - start + 1;

    let change_lines = (start..=end)
        .map(|ln| ChangeLine::context(lines[(ln - 1) as usize], ln, ln))
        .collect();

    vec![ChangeBlock {
        file_path: file_path.to_string(),
        file_exists: None,
        old_start: start,
        old_length: length,
        new_start: start,
        new_length: length,
        lines: change_lines,
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(n: u32) -> String {
        (1..=n).map(|i| format!("line {}", i)).collect::<Vec<_>>().join("\n")
    }

    #[test]
    fn test_extract_node_line() {
        let stderr = "/app/main.js:12\n    foo();\n    ^\nReferenceError: foo is not defined";
        assert_eq!(extract_error_line(stderr, Lang::Node), Some(12));
    }

    #[test]
    fn test_extract_python_line() {
        let stderr = "Traceback (most recent call last):\n  File \"/app/main.py\", line 7, in <module>\nNameError";
        assert_eq!(extract_error_line(stderr, Lang::Python), Some(7));
        assert_eq!(extract_error_line("", Lang::Python), None);
    }

    #[test]
    fn test_extract_run_error_line() {
        assert_eq!(extract_run_error_line("at /app/src/util.js:3:9"), Some(3));
        assert_eq!(extract_run_error_line("all good"), None);
    }

    #[test]
    fn test_window_around_error_line() {
        let content = numbered(30);
        let blocks = estimate_blocks_from_error("main.py", &content, "line 15", Lang::Python, 6);
        assert_eq!(blocks.len(), 1);

        let block = &blocks[0];
        assert_eq!(block.old_start, 9);
        assert_eq!(block.old_length, 13);
        assert_eq!(block.lines.first().unwrap().content, "line 9");
        assert_eq!(block.lines.last().unwrap().content, "line 21");
        assert_eq!(block.old_side_count(), block.old_length as usize);
        assert_eq!(block.new_side_count(), block.new_length as usize);
    }

    #[test]
    fn test_window_clamped_to_file() {
        let content = numbered(5);
        let blocks = estimate_blocks_from_error("main.js", &content, "/app/main.js:99", Lang::Node, 6);
        let block = &blocks[0];
        assert_eq!(block.old_start, 1);
        assert_eq!(block.old_length, 5);
    }

    #[test]
    fn test_no_error_line_guesses() {
        let short = estimate_blocks_from_error("a.py", &numbered(8), "boom", Lang::Python, 2);
        assert_eq!(short[0].old_start, 1);
        assert_eq!(short[0].old_length, 3);

        let long = estimate_blocks_from_error("a.py", &numbered(40), "boom", Lang::Python, 2);
        assert_eq!(long[0].old_start, 8);
        assert_eq!(long[0].old_length, 5);
    }

    #[test]
    fn test_huge_context_covers_whole_file() {
        let blocks = estimate_blocks_from_error("a.py", &numbered(12), "line 4", Lang::Python, u32::MAX);
        assert_eq!(blocks[0].old_start, 1);
        assert_eq!(blocks[0].old_length, 12);
    }

    #[test]
    fn test_empty_file_has_no_blocks() {
        assert!(estimate_blocks_from_error("a.py", "", "line 3", Lang::Python, 6).is_empty());
    }
}
