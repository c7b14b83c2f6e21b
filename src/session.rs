//! Drives the workflow against a backend and an editor host.
//!
//! [`FixSession`] is what the UI event handlers call: it issues requests,
//! feeds responses back into [`PatchWorkflow`], and keeps the editor's
//! decorations in step with whichever blocks are current.

use tracing::{debug, info, warn};

use crate::backend::FixBackend;
use crate::config::Config;
use crate::editor::{EditorHost, Position};
use crate::error::PatchError;
use crate::estimate::extract_run_error_line;
use crate::highlight::HighlightController;
use crate::resolver::{resolve, resolve_all, LineFilter};
use crate::types::{ChangeBlock, Lang};
use crate::workflow::{ApplyOutcome, FixState, FixStatus, PatchWorkflow, PreviewRequest, RunStatus, RunTrigger};

/// Result of a click or hover on a preview row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    /// The editor now shows this 1-based line
    Jumped(u32),
    /// Hover highlight placed on this line
    Hovered(u32),
    /// Hover highlight removed
    Cleared,
    /// Nothing to navigate to; show this to the user
    Notice(String),
}

pub struct FixSession<B, E> {
    backend: B,
    editor: E,
    workflow: PatchWorkflow,
    highlights: HighlightController,
    reveal_first_line: bool,
}

impl<B: FixBackend, E: EditorHost> FixSession<B, E> {
    pub fn new(backend: B, editor: E, project_id: &str, config: &Config) -> Self {
        Self {
            backend,
            editor,
            workflow: PatchWorkflow::new(project_id, config.workflow.auto_fix_on_failed_rerun),
            highlights: HighlightController::new(&config.highlight),
            reveal_first_line: config.highlight.reveal_first_line,
        }
    }

    pub fn workflow(&self) -> &PatchWorkflow {
        &self.workflow
    }

    pub fn editor(&self) -> &E {
        &self.editor
    }

    pub fn editor_mut(&mut self) -> &mut E {
        &mut self.editor
    }

    pub fn status(&self) -> FixStatus {
        self.workflow.status()
    }

    /// Open `path` in the editor, clearing the previous file's decorations first
    pub async fn open_file(&mut self, path: &str) -> Result<(), PatchError> {
        if self.editor.active_path() == Some(path) {
            return Ok(());
        }
        let content = self
            .backend
            .read_file(self.workflow.project_id(), path)
            .await?;
        self.highlights.clear(&mut self.editor);
        self.editor.load(path, &content);
        self.refresh_highlight();
        Ok(())
    }

    /// Close the active tab
    pub fn close_file(&mut self) {
        self.highlights.clear(&mut self.editor);
        self.editor.unload();
    }

    /// Switch projects: decorations go before anything else changes
    pub fn switch_project(&mut self, project_id: &str) {
        self.highlights.clear(&mut self.editor);
        self.editor.unload();
        self.workflow.switch_project(project_id);
    }

    pub fn set_opened_files(&mut self, files: Vec<String>) {
        self.workflow.set_opened_files(files);
    }

    /// Run the program as the user asked
    pub async fn run(&mut self, entry: &str, lang: Lang) -> RunStatus {
        self.highlights.clear(&mut self.editor);
        self.run_with(entry, lang, RunTrigger::User).await
    }

    async fn run_with(&mut self, entry: &str, lang: Lang, trigger: RunTrigger) -> RunStatus {
        let (ticket, call) = self.workflow.begin_run(entry, lang, trigger);
        let result = self.backend.run(&call).await;
        if self.workflow.finish_run(&ticket, result) {
            // The one automatic fix attempt for this chain
            self.preview(PreviewRequest::Fix {
                selected_file: None,
                force_target: false,
            })
            .await;
        }
        self.workflow.run_status()
    }

    /// Ask the fix agent for a patch for the last failed run
    pub async fn request_fix_preview(&mut self) -> FixStatus {
        self.preview(PreviewRequest::Fix {
            selected_file: None,
            force_target: false,
        })
        .await
    }

    /// Re-request a fix preview against a file the user picked
    pub async fn select_target_file(&mut self, path: &str) -> FixStatus {
        self.preview(PreviewRequest::Fix {
            selected_file: Some(path.to_string()),
            force_target: true,
        })
        .await
    }

    /// Ask the gen agent for a patch implementing `prompt`
    pub async fn request_gen_preview(&mut self, prompt: &str) -> FixStatus {
        self.preview(PreviewRequest::Gen {
            prompt: prompt.to_string(),
        })
        .await
    }

    async fn preview(&mut self, request: PreviewRequest) -> FixStatus {
        let Some((ticket, call)) = self.workflow.begin_preview(request) else {
            return self.workflow.status();
        };
        let result = self.backend.preview(&call).await;
        if self.workflow.finish_preview(&ticket, &call, result).is_some() {
            self.highlights.clear_hover(&mut self.editor);
            self.refresh_highlight();
        }
        self.workflow.status()
    }

    /// Apply the previewed patch; with `rerun` the program runs again afterwards.
    ///
    /// Returns `Ok(None)` when there was nothing to apply or the apply did not
    /// succeed (the workflow status says which).
    pub async fn apply(&mut self, rerun: bool) -> Result<Option<ApplyOutcome>, PatchError> {
        let Some((ticket, call)) = self.workflow.begin_apply(rerun) else {
            return Ok(None);
        };
        let result = self.backend.apply(&call).await;
        let Some(outcome) = self.workflow.finish_apply(&ticket, result) else {
            return Ok(None);
        };

        self.reload_affected(&outcome.affected_files).await?;

        if outcome.rerun {
            if let Some(run) = self.workflow.run_context().cloned() {
                self.run_with(&run.entry, run.lang, RunTrigger::ApplyAndRun).await;
                // The re-run reset the applied state; decorations follow it
                self.highlights.clear_hover(&mut self.editor);
                self.refresh_highlight();
            }
        }
        Ok(Some(outcome))
    }

    /// Reload the active buffer from the backend when the patch touched it,
    /// then re-resolve the applied blocks against the new content
    async fn reload_affected(&mut self, affected: &[String]) -> Result<(), PatchError> {
        let Some(active) = self.editor.active_path().map(str::to_string) else {
            return Ok(());
        };
        self.highlights.clear(&mut self.editor);
        if affected.contains(&active) {
            let content = self
                .backend
                .read_file(self.workflow.project_id(), &active)
                .await?;
            self.editor.load(&active, &content);
            info!("reloaded {} after apply", active);
        }
        self.refresh_highlight();
        Ok(())
    }

    /// Cancel the preview: back to idle, all decorations removed
    pub fn cancel(&mut self) {
        self.workflow.cancel();
        self.highlights.clear(&mut self.editor);
    }

    /// Re-resolve the current blocks against the active buffer and replace
    /// the baseline highlight
    pub fn refresh_highlight(&mut self) {
        let Some(path) = self.editor.active_path().map(str::to_string) else {
            return;
        };
        let filter = match self.workflow.state() {
            FixState::Applied(_) => LineFilter::SkipDeleted,
            _ => LineFilter::All,
        };
        let buffer = self.editor.lines();
        let lines = resolve_all(self.workflow.blocks(), &path, &buffer, filter);

        self.highlights.highlight(&mut self.editor, &lines);
        if self.reveal_first_line {
            if let Some(first) = lines.first() {
                self.editor.reveal_line_in_center(*first);
            }
        }
    }

    /// Click on a preview row: open the file if needed and move the cursor
    /// to the resolved line
    pub async fn jump_to_block_line(&mut self, file_path: &str, block_index: usize, line_index: usize) -> Navigation {
        let block = match self.target_block(file_path, block_index) {
            Ok(block) => block,
            Err(notice) => return notice,
        };

        if self.editor.active_path() != Some(file_path) {
            if let Err(e) = self.open_file(file_path).await {
                warn!("could not open {}: {}", file_path, e);
                return Navigation::Notice(format!("Could not open \"{}\".", file_path));
            }
        }

        let buffer = self.editor.lines();
        let Some(line) = resolve(&block, line_index, &buffer) else {
            return Navigation::Notice(format!("No matching line in \"{}\".", file_path));
        };

        self.editor.reveal_line_in_center(line);
        self.editor.set_position(Position { line, column: 1 });
        self.editor.focus();
        debug!("jumped to {}:{}", file_path, line);
        Navigation::Jumped(line)
    }

    /// Hover on a preview row (`None` when the pointer leaves)
    pub fn hover_block_line(&mut self, file_path: &str, block_index: usize, line_index: Option<usize>) -> Navigation {
        let Some(line_index) = line_index else {
            self.highlights.highlight_hover(&mut self.editor, None);
            return Navigation::Cleared;
        };

        let block = match self.target_block(file_path, block_index) {
            Ok(block) => block,
            Err(notice) => return notice,
        };

        // Hover never switches files
        if self.editor.active_path() != Some(file_path) {
            return Navigation::Cleared;
        }

        let buffer = self.editor.lines();
        match resolve(&block, line_index, &buffer) {
            Some(line) => {
                self.highlights.highlight_hover(&mut self.editor, Some(line));
                Navigation::Hovered(line)
            }
            None => Navigation::Notice(format!("No matching line in \"{}\".", file_path)),
        }
    }

    /// Reveal the error line mentioned in run output
    pub fn jump_to_error(&mut self, output: &str) -> Option<u32> {
        let line = extract_run_error_line(output)?;
        self.editor.active_path()?;
        self.editor.reveal_line_in_center(line);
        self.editor.set_position(Position { line, column: 1 });
        Some(line)
    }

    /// Look up a block by its file-qualified address
    fn target_block(&self, file_path: &str, block_index: usize) -> Result<ChangeBlock, Navigation> {
        let blocks = self.workflow.blocks();
        let block = blocks
            .get(block_index)
            .filter(|b| b.file_path == file_path)
            .or_else(|| blocks.iter().find(|b| b.file_path == file_path))
            .ok_or_else(|| Navigation::Notice(format!("\"{}\" is not part of this patch.", file_path)))?;

        if block.will_be_created() {
            return Err(Navigation::Notice(format!(
                "\"{}\" will be created when you apply this fix.",
                file_path
            )));
        }
        Ok(block.clone())
    }
}
