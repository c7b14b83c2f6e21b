//! Patch preview and change-block reconciliation for agent-assisted fixes.
//!
//! A unified diff from the fix/gen agent is parsed into [`ChangeBlock`]s,
//! previewed row by row, mapped back onto the live editor buffer by content,
//! and applied through a ticketed state machine that ignores stale responses.

pub mod backend;
pub mod config;
pub mod editor;
pub mod error;
pub mod estimate;
pub mod highlight;
pub mod parser;
pub mod resolver;
pub mod review;
pub mod session;
pub mod types;
pub mod workflow;

pub use backend::{FixBackend, HttpBackend};
pub use config::Config;
pub use editor::{EditorHost, TextBuffer};
pub use error::PatchError;
pub use parser::{parse_diff, parse_diff_for_file};
pub use session::{FixSession, Navigation};
pub use types::{ChangeBlock, ChangeLine, Lang, LineKind, PreviewRow};
pub use workflow::{FixState, FixStatus, PatchWorkflow};
