use std::collections::BTreeMap;

/// Handle returned by the host for one applied decoration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DecorationId(pub u64);

/// 1-based cursor position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

/// A whole-line, non-persistent decoration request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoration {
    pub start_line: u32,
    pub end_line: u32,
    pub end_column: u32,
    pub class_name: String,
    pub is_whole_line: bool,
}

impl Decoration {
    pub fn whole_line(line: u32, end_column: u32, class_name: &str) -> Self {
        Self {
            start_line: line,
            end_line: line,
            end_column,
            class_name: class_name.to_string(),
            is_whole_line: true,
        }
    }
}

/// The embeddable text-editor widget, as far as patch preview needs it.
///
/// Everything is keyed on the single active buffer; when no buffer is
/// mounted `active_path` is `None` and implementations treat the mutating
/// calls as no-ops.
pub trait EditorHost {
    fn active_path(&self) -> Option<&str>;

    /// Current buffer content split into lines (no trailing newlines)
    fn lines(&self) -> Vec<String>;

    fn line_count(&self) -> usize {
        self.lines().len()
    }

    /// Last column of a line, for whole-line decoration ranges
    fn max_column(&self, line: u32) -> u32;

    /// Replace the decorations in `old_ids` with `new`, returning the new ids
    fn delta_decorations(&mut self, old_ids: &[DecorationId], new: &[Decoration]) -> Vec<DecorationId>;

    fn reveal_line_in_center(&mut self, line: u32);

    fn set_position(&mut self, position: Position);

    fn focus(&mut self);

    /// Mount `content` as the active buffer for `path`
    fn load(&mut self, path: &str, content: &str);

    /// Close the active buffer
    fn unload(&mut self);
}

/// In-memory editor host used by the CLI and tests
#[derive(Debug, Default)]
pub struct TextBuffer {
    path: Option<String>,
    lines: Vec<String>,
    decorations: BTreeMap<DecorationId, Decoration>,
    next_id: u64,
    cursor: Option<Position>,
    revealed: Option<u32>,
    focused: bool,
}

impl TextBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_content(path: &str, content: &str) -> Self {
        let mut buffer = Self::new();
        buffer.load(path, content);
        buffer
    }

    /// Lines currently decorated with `class_name`, sorted
    pub fn decorated_lines(&self, class_name: &str) -> Vec<u32> {
        let mut lines: Vec<u32> = self
            .decorations
            .values()
            .filter(|d| d.class_name == class_name)
            .map(|d| d.start_line)
            .collect();
        lines.sort_unstable();
        lines
    }

    pub fn decoration_count(&self) -> usize {
        self.decorations.len()
    }

    pub fn cursor(&self) -> Option<Position> {
        self.cursor
    }

    pub fn revealed_line(&self) -> Option<u32> {
        self.revealed
    }

    pub fn is_focused(&self) -> bool {
        self.focused
    }

    /// Replace the text of the active buffer, as a user edit would
    pub fn set_text(&mut self, content: &str) {
        if self.path.is_some() {
            self.lines = split_lines(content);
        }
    }
}

fn split_lines(content: &str) -> Vec<String> {
    content.lines().map(str::to_string).collect()
}

impl EditorHost for TextBuffer {
    fn active_path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    fn lines(&self) -> Vec<String> {
        self.lines.clone()
    }

    fn line_count(&self) -> usize {
        self.lines.len()
    }

    fn max_column(&self, line: u32) -> u32 {
        let idx = line.saturating_sub(1) as usize;
        self.lines
            .get(idx)
            .map(|l| l.chars().count() as u32 + 1)
            .unwrap_or(1)
    }

    fn delta_decorations(&mut self, old_ids: &[DecorationId], new: &[Decoration]) -> Vec<DecorationId> {
        if self.path.is_none() {
            return Vec::new();
        }
        for id in old_ids {
            self.decorations.remove(id);
        }
        new.iter()
            .map(|decoration| {
                self.next_id += 1;
                let id = DecorationId(self.next_id);
                self.decorations.insert(id, decoration.clone());
                id
            })
            .collect()
    }

    fn reveal_line_in_center(&mut self, line: u32) {
        if self.path.is_some() {
            self.revealed = Some(line);
        }
    }

    fn set_position(&mut self, position: Position) {
        if self.path.is_some() {
            self.cursor = Some(position);
        }
    }

    fn focus(&mut self) {
        if self.path.is_some() {
            self.focused = true;
        }
    }

    fn load(&mut self, path: &str, content: &str) {
        // Decorations belong to the model; a new model starts clean
        self.decorations.clear();
        self.path = Some(path.to_string());
        self.lines = split_lines(content);
        self.cursor = None;
        self.revealed = None;
    }

    fn unload(&mut self) {
        self.decorations.clear();
        self.path = None;
        self.lines.clear();
        self.cursor = None;
        self.revealed = None;
        self.focused = false;
    }
}
