//! Changed-line and hover-line decorations for the active buffer.

use tracing::debug;

use crate::config::HighlightSettings;
use crate::editor::{Decoration, DecorationId, EditorHost};

/// Decoration ids owned for one file.
///
/// Replaced wholesale on every update so ids never outlive the buffer they
/// were issued for.
#[derive(Debug, Default)]
struct DecorationSet {
    file: Option<String>,
    ids: Vec<DecorationId>,
}

impl DecorationSet {
    fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Swap in `decorations` for `file`, dropping whatever was there
    fn replace<E: EditorHost>(&mut self, editor: &mut E, file: &str, decorations: &[Decoration]) {
        let stale = self.file.as_deref().is_some_and(|f| f != file);
        // Ids from another buffer are meaningless to this one
        let old = if stale { Vec::new() } else { std::mem::take(&mut self.ids) };
        let ids = editor.delta_decorations(&old, decorations);
        *self = Self {
            file: (!ids.is_empty()).then(|| file.to_string()),
            ids,
        };
    }

    fn clear<E: EditorHost>(&mut self, editor: &mut E) {
        let set = std::mem::take(self);
        if set.is_empty() {
            return;
        }
        if set.file.as_deref() == editor.active_path() {
            editor.delta_decorations(&set.ids, &[]);
        }
    }
}

/// Owns the baseline ("changed by this patch") and hover decoration sets
#[derive(Debug)]
pub struct HighlightController {
    changed_class: String,
    hover_class: String,
    baseline: DecorationSet,
    hover: DecorationSet,
}

impl HighlightController {
    pub fn new(settings: &HighlightSettings) -> Self {
        Self {
            changed_class: settings.changed_class.clone(),
            hover_class: settings.hover_class.clone(),
            baseline: DecorationSet::default(),
            hover: DecorationSet::default(),
        }
    }

    /// Replace the baseline highlight with exactly `lines`
    pub fn highlight<E: EditorHost>(&mut self, editor: &mut E, lines: &[u32]) {
        let Some(path) = editor.active_path().map(str::to_string) else {
            return;
        };
        let decorations = self.decorations(editor, lines, &self.changed_class);
        debug!("highlighting {} line(s) in {}", decorations.len(), path);
        self.baseline.replace(editor, &path, &decorations);
    }

    /// Show the hover highlight on `line`, or clear it with `None`
    pub fn highlight_hover<E: EditorHost>(&mut self, editor: &mut E, line: Option<u32>) {
        let Some(path) = editor.active_path().map(str::to_string) else {
            return;
        };
        match line {
            Some(line) => {
                let decorations = self.decorations(editor, &[line], &self.hover_class);
                self.hover.replace(editor, &path, &decorations);
            }
            None => self.hover.clear(editor),
        }
    }

    /// Remove every decoration this controller placed
    pub fn clear<E: EditorHost>(&mut self, editor: &mut E) {
        self.baseline.clear(editor);
        self.hover.clear(editor);
    }

    pub fn clear_hover<E: EditorHost>(&mut self, editor: &mut E) {
        self.hover.clear(editor);
    }

    /// File the current decorations were placed on, if any
    pub fn highlighted_file(&self) -> Option<&str> {
        self.baseline.file.as_deref().or(self.hover.file.as_deref())
    }

    fn decorations<E: EditorHost>(&self, editor: &E, lines: &[u32], class_name: &str) -> Vec<Decoration> {
        let line_count = editor.line_count() as u32;
        let mut seen = Vec::with_capacity(lines.len());
        lines
            .iter()
            .copied()
            .filter(|ln| (1..=line_count).contains(ln))
            .filter(|ln| {
                if seen.contains(ln) {
                    return false;
                }
                seen.push(*ln);
                true
            })
            .map(|ln| Decoration::whole_line(ln, editor.max_column(ln), class_name))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor::TextBuffer;

    const CHANGED: &str = "agent-fix-line";
    const HOVER: &str = "agent-fix-hover-line";

    fn setup() -> (HighlightController, TextBuffer) {
        let controller = HighlightController::new(&HighlightSettings::default());
        let editor = TextBuffer::with_content("main.js", "a\nb\nc\nd\ne\nf\ng\nh");
        (controller, editor)
    }

    #[test]
    fn test_highlight_is_not_additive() {
        let (mut hl, mut editor) = setup();
        hl.highlight(&mut editor, &[5, 6]);
        hl.highlight(&mut editor, &[7]);
        assert_eq!(editor.decorated_lines(CHANGED), vec![7]);
        assert_eq!(editor.decoration_count(), 1);
    }

    #[test]
    fn test_hover_independent_of_baseline() {
        let (mut hl, mut editor) = setup();
        hl.highlight(&mut editor, &[1, 2]);
        hl.highlight_hover(&mut editor, Some(4));
        hl.highlight_hover(&mut editor, Some(5));
        assert_eq!(editor.decorated_lines(HOVER), vec![5]);
        assert_eq!(editor.decorated_lines(CHANGED), vec![1, 2]);

        hl.highlight_hover(&mut editor, None);
        assert!(editor.decorated_lines(HOVER).is_empty());
        assert_eq!(editor.decorated_lines(CHANGED), vec![1, 2]);
    }

    #[test]
    fn test_clear_removes_both_sets() {
        let (mut hl, mut editor) = setup();
        hl.highlight(&mut editor, &[3]);
        hl.highlight_hover(&mut editor, Some(3));
        hl.clear(&mut editor);
        assert_eq!(editor.decoration_count(), 0);
        assert_eq!(hl.highlighted_file(), None);
    }

    #[test]
    fn test_out_of_range_and_duplicate_lines_dropped() {
        let (mut hl, mut editor) = setup();
        hl.highlight(&mut editor, &[0, 2, 2, 99]);
        assert_eq!(editor.decorated_lines(CHANGED), vec![2]);
    }

    #[test]
    fn test_no_active_buffer_is_noop() {
        let mut hl = HighlightController::new(&HighlightSettings::default());
        let mut editor = TextBuffer::new();
        hl.highlight(&mut editor, &[1]);
        hl.highlight_hover(&mut editor, Some(1));
        hl.clear(&mut editor);
        assert_eq!(editor.decoration_count(), 0);
    }

    #[test]
    fn test_clear_before_switch_leaves_new_buffer_clean() {
        let (mut hl, mut editor) = setup();
        hl.highlight(&mut editor, &[1, 2]);
        assert_eq!(hl.highlighted_file(), Some("main.js"));

        hl.clear(&mut editor);
        editor.load("util.js", "x\ny");
        hl.highlight(&mut editor, &[2]);
        assert_eq!(editor.decorated_lines(CHANGED), vec![2]);
        assert_eq!(hl.highlighted_file(), Some("util.js"));
    }

    #[test]
    fn test_stale_ids_not_sent_to_other_buffer() {
        let (mut hl, mut editor) = setup();
        hl.highlight(&mut editor, &[1]);
        // Host switched buffers without telling us
        editor.load("util.js", "x\ny");
        hl.highlight(&mut editor, &[1, 2]);
        assert_eq!(editor.decorated_lines(CHANGED), vec![1, 2]);
    }
}
