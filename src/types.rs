use serde::{Deserialize, Serialize};

/// Type of a change line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineKind {
    Context,
    Add,
    Del,
}

impl LineKind {
    /// Diff prefix character for this kind
    pub fn prefix(&self) -> char {
        match self {
            LineKind::Context => ' ',
            LineKind::Add => '+',
            LineKind::Del => '-',
        }
    }

    pub fn css_class(&self) -> &'static str {
        match self {
            LineKind::Context => "context",
            LineKind::Add => "add",
            LineKind::Del => "del",
        }
    }
}

/// A single line in a change block.
///
/// A context line carries both numbers, an added line only the new-side
/// number, a deleted line only the old-side number. Use the constructors to
/// keep that shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeLine {
    #[serde(rename = "type")]
    pub kind: LineKind,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_line: Option<u32>,
}

impl ChangeLine {
    pub fn context(content: impl Into<String>, old_line: u32, new_line: u32) -> Self {
        Self {
            kind: LineKind::Context,
            content: content.into(),
            old_line: Some(old_line),
            new_line: Some(new_line),
        }
    }

    pub fn add(content: impl Into<String>, new_line: u32) -> Self {
        Self {
            kind: LineKind::Add,
            content: content.into(),
            old_line: None,
            new_line: Some(new_line),
        }
    }

    pub fn del(content: impl Into<String>, old_line: u32) -> Self {
        Self {
            kind: LineKind::Del,
            content: content.into(),
            old_line: Some(old_line),
            new_line: None,
        }
    }

    /// Recorded position used as a tie-break hint: new side first, then old side
    pub fn position_hint(&self) -> Option<u32> {
        self.new_line.or(self.old_line)
    }
}

fn default_length() -> u32 {
    1
}

/// One hunk of a unified diff, scoped to one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeBlock {
    pub file_path: String,
    /// `Some(false)` marks a file that only comes into existence when the patch is applied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_exists: Option<bool>,
    pub old_start: u32,
    #[serde(default = "default_length")]
    pub old_length: u32,
    pub new_start: u32,
    #[serde(default = "default_length")]
    pub new_length: u32,
    #[serde(default)]
    pub lines: Vec<ChangeLine>,
}

impl ChangeBlock {
    /// True when the block targets a file that does not exist yet
    pub fn will_be_created(&self) -> bool {
        self.file_exists == Some(false)
    }

    /// Number of lines carrying an old-side number
    pub fn old_side_count(&self) -> usize {
        self.lines.iter().filter(|l| l.old_line.is_some()).count()
    }

    /// Number of lines carrying a new-side number
    pub fn new_side_count(&self) -> usize {
        self.lines.iter().filter(|l| l.new_line.is_some()).count()
    }

    /// Inclusive old-side range covered by the hunk header
    pub fn old_range(&self) -> (u32, u32) {
        span(self.old_start, self.old_length)
    }

    /// Inclusive new-side range covered by the hunk header
    pub fn new_range(&self) -> (u32, u32) {
        span(self.new_start, self.new_length)
    }

    pub fn filename(&self) -> &str {
        self.file_path.rsplit('/').next().unwrap_or(&self.file_path)
    }
}

fn span(start: u32, length: u32) -> (u32, u32) {
    (start, start.saturating_add(length).saturating_sub(1).max(start))
}

/// Flattened, UI-addressable projection of one change line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewRow {
    pub block_index: usize,
    pub line_index: usize,
    pub kind: LineKind,
    pub text: String,
}

impl PreviewRow {
    /// Row text with its diff prefix (e.g. "+foo")
    pub fn display(&self) -> String {
        format!("{}{}", self.kind.prefix(), self.text)
    }
}

/// Language of the program being run and fixed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    Node,
    Python,
}

impl Lang {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lang::Node => "node",
            Lang::Python => "python",
        }
    }
}

/// A file the backend suspects is responsible for a failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "CandidateRepr")]
pub struct SuspectCandidate {
    pub path: String,
    pub reason: Option<String>,
}

/// The backend sends either bare paths or `{ path, reason }` objects
#[derive(Deserialize)]
#[serde(untagged)]
enum CandidateRepr {
    Path(String),
    Full {
        path: String,
        #[serde(default)]
        reason: Option<String>,
    },
}

impl From<CandidateRepr> for SuspectCandidate {
    fn from(repr: CandidateRepr) -> Self {
        match repr {
            CandidateRepr::Path(path) => Self { path, reason: None },
            CandidateRepr::Full { path, reason } => Self { path, reason },
        }
    }
}
