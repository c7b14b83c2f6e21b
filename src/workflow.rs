//! Preview → apply state machine for agent patches.
//!
//! The machine does no I/O. Starting a request hands out a [`Ticket`]; the
//! caller performs the network call and feeds the result back with the same
//! ticket. Only the response matching the single pending ticket (and the
//! current project/run) may advance the state, so duplicate clicks are
//! ignored and responses arriving after a cancel are dropped.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::backend::{AgentResponse, ApplyCall, PatchOrigin, PreviewCall, RunCall, RunReport};
use crate::error::PatchError;
use crate::parser::parse_diff_for_file;
use crate::types::{ChangeBlock, Lang, SuspectCandidate};

/// Flat status badge derived from [`FixState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixStatus {
    Idle,
    PreviewReady,
    ManualReview,
    Applying,
    Applied,
    Failed,
}

/// Independent track for the user's program runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunStatus {
    #[default]
    Idle,
    Running,
    Ok,
    Error,
}

/// Why a run was started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunTrigger {
    User,
    ApplyAndRun,
}

/// A patch ready to be applied
#[derive(Debug, Clone, PartialEq)]
pub struct Preview {
    pub origin: PatchOrigin,
    pub diff: String,
    pub blocks: Vec<ChangeBlock>,
    pub target: Option<String>,
    pub reason: Option<String>,
    pub explanation: Option<String>,
    pub failure_type: Option<String>,
    pub suspect_candidates: Vec<SuspectCandidate>,
}

/// Diagnostics shown when no applicable patch came back
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ManualReview {
    /// Estimated failure location, possibly empty
    pub blocks: Vec<ChangeBlock>,
    pub failure_type: Option<String>,
    pub explanation: Option<String>,
    pub reason: Option<String>,
    pub estimated: bool,
}

/// A patch the server has applied; the diff text is gone
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedPatch {
    pub origin: PatchOrigin,
    pub blocks: Vec<ChangeBlock>,
    pub target: Option<String>,
    pub applied_at: DateTime<Utc>,
}

/// Workflow state; each variant carries only the data valid in it
#[derive(Debug, Clone, PartialEq)]
pub enum FixState {
    Idle,
    PreviewReady(Preview),
    ManualReview(ManualReview),
    Applying { preview: Preview, rerun: bool },
    Applied(AppliedPatch),
    /// `retry` keeps the preview when an apply failed so Apply can be clicked again
    Failed { message: String, retry: Option<Preview> },
}

impl FixState {
    pub fn status(&self) -> FixStatus {
        match self {
            FixState::Idle => FixStatus::Idle,
            FixState::PreviewReady(_) => FixStatus::PreviewReady,
            FixState::ManualReview(_) => FixStatus::ManualReview,
            FixState::Applying { .. } => FixStatus::Applying,
            FixState::Applied(_) => FixStatus::Applied,
            FixState::Failed { .. } => FixStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Preview,
    Apply,
    Run,
}

/// Identifies one in-flight backend request and the context it was issued in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    id: u64,
    kind: RequestKind,
    project_id: String,
    run_id: Option<String>,
}

impl Ticket {
    pub fn kind(&self) -> RequestKind {
        self.kind
    }
}

/// What the user asked to preview
#[derive(Debug, Clone, PartialEq)]
pub enum PreviewRequest {
    /// Fix the last failed run, optionally forcing a target file
    Fix {
        selected_file: Option<String>,
        force_target: bool,
    },
    /// Generate code from a prompt
    Gen { prompt: String },
}

/// Program run the fix is about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub entry: String,
    pub lang: Lang,
    pub run_id: Option<String>,
}

/// Follow-up work after a successful apply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Files whose buffers must be reloaded from the backend
    pub affected_files: Vec<String>,
    /// "Apply & Run": start a re-run next
    pub rerun: bool,
}

/// One workflow instance per project
#[derive(Debug)]
pub struct PatchWorkflow {
    project_id: String,
    state: FixState,
    run_status: RunStatus,
    run: Option<RunContext>,
    last_trigger: RunTrigger,
    opened_files: Vec<String>,
    pending: Option<Ticket>,
    pending_run: Option<Ticket>,
    next_ticket: u64,
    auto_fix_enabled: bool,
    auto_fix_used: bool,
}

impl PatchWorkflow {
    pub fn new(project_id: impl Into<String>, auto_fix_enabled: bool) -> Self {
        Self {
            project_id: project_id.into(),
            state: FixState::Idle,
            run_status: RunStatus::Idle,
            run: None,
            last_trigger: RunTrigger::User,
            opened_files: Vec::new(),
            pending: None,
            pending_run: None,
            next_ticket: 0,
            auto_fix_enabled,
            auto_fix_used: false,
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn state(&self) -> &FixState {
        &self.state
    }

    pub fn status(&self) -> FixStatus {
        self.state.status()
    }

    pub fn run_status(&self) -> RunStatus {
        self.run_status
    }

    pub fn run_context(&self) -> Option<&RunContext> {
        self.run.as_ref()
    }

    pub fn is_busy(&self) -> bool {
        self.pending.is_some()
    }

    /// A program run has been started and its report is still outstanding
    pub fn is_running(&self) -> bool {
        self.pending_run.is_some()
    }

    /// Diff text awaiting apply, if any
    pub fn diff(&self) -> Option<&str> {
        match &self.state {
            FixState::PreviewReady(p) | FixState::Applying { preview: p, .. } => Some(&p.diff),
            FixState::Failed { retry: Some(p), .. } => Some(&p.diff),
            _ => None,
        }
    }

    /// Blocks that jump/hover/highlight currently address
    pub fn blocks(&self) -> &[ChangeBlock] {
        match &self.state {
            FixState::PreviewReady(p) | FixState::Applying { preview: p, .. } => &p.blocks,
            FixState::ManualReview(r) => &r.blocks,
            FixState::Applied(a) => &a.blocks,
            FixState::Failed { retry: Some(p), .. } => &p.blocks,
            _ => &[],
        }
    }

    /// Track the editor tabs sent along with fix previews
    pub fn set_opened_files(&mut self, files: Vec<String>) {
        self.opened_files = files;
    }

    /// Back to idle, dropping any pending request
    pub fn cancel(&mut self) {
        if let Some(ticket) = self.pending.take() {
            debug!("cancel: abandoning pending {:?} request #{}", ticket.kind, ticket.id);
        }
        self.state = FixState::Idle;
    }

    /// Switch to another project: everything from the old one is discarded
    pub fn switch_project(&mut self, project_id: impl Into<String>) {
        self.project_id = project_id.into();
        self.pending = None;
        self.pending_run = None;
        self.state = FixState::Idle;
        self.run = None;
        self.run_status = RunStatus::Idle;
        self.auto_fix_used = false;
        info!("workflow switched to project {}", self.project_id);
    }

    /// A new run starts: reset the fix state and track the run.
    ///
    /// Returns the request to send to the runner. A newer run supersedes any
    /// run still in flight; its report will be discarded.
    pub fn begin_run(&mut self, entry: &str, lang: Lang, trigger: RunTrigger) -> (Ticket, RunCall) {
        self.pending = None;
        self.state = FixState::Idle;
        self.run_status = RunStatus::Running;
        self.last_trigger = trigger;
        if trigger == RunTrigger::User {
            self.auto_fix_used = false;
        }
        self.run = Some(RunContext {
            entry: entry.to_string(),
            lang,
            run_id: None,
        });
        let call = RunCall {
            project_id: self.project_id.clone(),
            entry: entry.to_string(),
            lang,
        };
        let ticket = self.ticket(RequestKind::Run, None);
        self.pending_run = Some(ticket.clone());
        (ticket, call)
    }

    /// Record the run result.
    ///
    /// Returns true when a failed "Apply & Run" re-run should start the one
    /// automatic fix preview this run chain is allowed. Reports for a run
    /// that was superseded or belongs to another project are discarded.
    pub fn finish_run(&mut self, ticket: &Ticket, result: Result<RunReport, PatchError>) -> bool {
        let current = self.pending_run.as_ref() == Some(ticket)
            && ticket.kind == RequestKind::Run
            && ticket.project_id == self.project_id;
        if !current {
            debug!("discarding stale run report #{}", ticket.id);
            return false;
        }
        self.pending_run = None;

        let report = match result {
            Ok(report) => report,
            Err(e) => {
                warn!("run failed to complete: {}", e);
                self.run_status = RunStatus::Error;
                return false;
            }
        };

        if let Some(run) = self.run.as_mut() {
            run.run_id = report.run_id.clone();
        }
        self.run_status = if report.ok { RunStatus::Ok } else { RunStatus::Error };

        let auto_fix = !report.ok
            && self.last_trigger == RunTrigger::ApplyAndRun
            && self.auto_fix_enabled
            && !self.auto_fix_used
            && report.run_id.is_some();
        if auto_fix {
            self.auto_fix_used = true;
            info!("re-run failed after apply, requesting one automatic fix preview");
        }
        auto_fix
    }

    /// Start a preview request. `None` when another request is pending or
    /// there is nothing to preview (no failed run for a fix, blank prompt).
    pub fn begin_preview(&mut self, request: PreviewRequest) -> Option<(Ticket, PreviewCall)> {
        if self.pending.is_some() {
            debug!("preview ignored: request already in flight");
            return None;
        }

        let run = self.run.as_ref();
        let call = match request {
            PreviewRequest::Fix {
                selected_file,
                force_target,
            } => {
                let run = run.filter(|r| r.run_id.is_some())?;
                PreviewCall {
                    origin: PatchOrigin::Fix,
                    project_id: self.project_id.clone(),
                    run_id: run.run_id.clone(),
                    entry: Some(run.entry.clone()),
                    lang: Some(run.lang),
                    prompt: None,
                    opened_files: self.opened_files.clone(),
                    selected_file,
                    force_target,
                }
            }
            PreviewRequest::Gen { prompt } => {
                let prompt = prompt.trim();
                if prompt.is_empty() {
                    return None;
                }
                PreviewCall {
                    origin: PatchOrigin::Gen,
                    project_id: self.project_id.clone(),
                    run_id: run.and_then(|r| r.run_id.clone()),
                    entry: run.map(|r| r.entry.clone()),
                    lang: run.map(|r| r.lang),
                    prompt: Some(prompt.to_string()),
                    opened_files: Vec::new(),
                    selected_file: None,
                    force_target: false,
                }
            }
        };

        let ticket = self.issue(RequestKind::Preview, call.run_id.clone());
        Some((ticket, call))
    }

    /// Feed a preview response back. Returns the new status, or `None` when
    /// the response was stale and discarded.
    pub fn finish_preview(
        &mut self,
        ticket: &Ticket,
        call: &PreviewCall,
        result: Result<AgentResponse, PatchError>,
    ) -> Option<FixStatus> {
        if !self.accept(ticket, RequestKind::Preview) {
            return None;
        }

        self.state = match result {
            Err(e) => {
                warn!("preview request failed: {}", e);
                FixState::Failed {
                    message: e.to_string(),
                    retry: None,
                }
            }
            Ok(response) => self.preview_state(call, response),
        };
        info!("preview finished: {:?}", self.status());
        Some(self.status())
    }

    fn preview_state(&self, call: &PreviewCall, response: AgentResponse) -> FixState {
        let diff = response.diff_text().map(str::to_string);
        let target = response
            .meta
            .selected_file
            .clone()
            .or_else(|| call.selected_file.clone())
            .or_else(|| call.entry.clone());

        // An explicit (even empty) block list from the backend is authoritative
        let blocks = match response.blocks() {
            Some(blocks) => blocks.to_vec(),
            None => diff
                .as_deref()
                .map(|d| blocks_from_diff(d, target.as_deref()))
                .unwrap_or_default(),
        };

        let meta = response.meta;
        match diff {
            Some(diff) if response.ok && !blocks.is_empty() => FixState::PreviewReady(Preview {
                origin: call.origin,
                diff,
                blocks,
                target,
                reason: response.reason,
                explanation: meta.explanation,
                failure_type: meta.failure_type,
                suspect_candidates: meta.suspect_candidates.unwrap_or_default(),
            }),
            _ => FixState::ManualReview(ManualReview {
                blocks,
                failure_type: meta.failure_type,
                explanation: meta.explanation,
                reason: response.reason,
                estimated: meta.estimated.unwrap_or(false),
            }),
        }
    }

    /// Start applying the previewed patch. `None` unless a preview is ready
    /// (or a failed apply can be retried) and nothing is pending.
    pub fn begin_apply(&mut self, rerun: bool) -> Option<(Ticket, ApplyCall)> {
        if self.pending.is_some() {
            debug!("apply ignored: request already in flight");
            return None;
        }

        let preview = match std::mem::replace(&mut self.state, FixState::Idle) {
            FixState::PreviewReady(p) | FixState::Failed { retry: Some(p), .. } => p,
            other => {
                self.state = other;
                return None;
            }
        };

        let run_id = self.run.as_ref().and_then(|r| r.run_id.clone());
        if preview.origin == PatchOrigin::Fix && run_id.is_none() {
            self.state = FixState::PreviewReady(preview);
            return None;
        }

        let call = ApplyCall {
            origin: preview.origin,
            project_id: self.project_id.clone(),
            run_id: run_id.clone(),
            diff: preview.diff.clone(),
        };
        self.state = FixState::Applying { preview, rerun };
        let ticket = self.issue(RequestKind::Apply, run_id);
        Some((ticket, call))
    }

    /// Feed an apply response back. `None` when the response was stale or the
    /// apply failed; otherwise the reload/re-run work to do next.
    pub fn finish_apply(
        &mut self,
        ticket: &Ticket,
        result: Result<AgentResponse, PatchError>,
    ) -> Option<ApplyOutcome> {
        if !self.accept(ticket, RequestKind::Apply) {
            return None;
        }

        let (preview, rerun) = match std::mem::replace(&mut self.state, FixState::Idle) {
            FixState::Applying { preview, rerun } => (preview, rerun),
            other => {
                self.state = other;
                return None;
            }
        };

        let response = match result {
            Ok(r) if r.ok => r,
            Ok(r) => {
                let message = r.reason.unwrap_or_else(|| "patch was rejected".to_string());
                warn!("apply rejected: {}", message);
                self.state = FixState::Failed {
                    message,
                    retry: Some(preview),
                };
                return None;
            }
            Err(e) => {
                warn!("apply request failed: {}", e);
                self.state = FixState::Failed {
                    message: e.to_string(),
                    retry: Some(preview),
                };
                return None;
            }
        };

        let mut blocks = match response.blocks() {
            Some(blocks) if !blocks.is_empty() => blocks.to_vec(),
            _ => preview.blocks,
        };
        // Files the patch created exist now
        for block in &mut blocks {
            if block.will_be_created() {
                block.file_exists = Some(true);
            }
        }
        let mut affected_files: Vec<String> = Vec::new();
        for block in &blocks {
            if !affected_files.contains(&block.file_path) {
                affected_files.push(block.file_path.clone());
            }
        }

        // The diff is one-shot: it is dropped here with the preview
        self.state = FixState::Applied(AppliedPatch {
            origin: preview.origin,
            blocks,
            target: preview.target,
            applied_at: Utc::now(),
        });
        info!("patch applied to {} file(s)", affected_files.len());
        Some(ApplyOutcome {
            affected_files,
            rerun,
        })
    }

    fn ticket(&mut self, kind: RequestKind, run_id: Option<String>) -> Ticket {
        self.next_ticket += 1;
        Ticket {
            id: self.next_ticket,
            kind,
            project_id: self.project_id.clone(),
            run_id,
        }
    }

    fn issue(&mut self, kind: RequestKind, run_id: Option<String>) -> Ticket {
        let ticket = self.ticket(kind, run_id);
        self.pending = Some(ticket.clone());
        ticket
    }

    /// Consume the pending slot if `ticket` still owns it
    fn accept(&mut self, ticket: &Ticket, kind: RequestKind) -> bool {
        let current_run = self.run.as_ref().and_then(|r| r.run_id.as_ref());
        let matches = self.pending.as_ref() == Some(ticket)
            && ticket.kind == kind
            && ticket.project_id == self.project_id
            && (ticket.run_id.is_none() || ticket.run_id.as_ref() == current_run);
        if !matches {
            debug!("discarding stale {:?} response #{}", kind, ticket.id);
            return false;
        }
        self.pending = None;
        true
    }
}

/// Parse diff text into blocks, marking new files as not yet existing
fn blocks_from_diff(diff: &str, default_path: Option<&str>) -> Vec<ChangeBlock> {
    let mut blocks = parse_diff_for_file(diff, default_path.unwrap_or(crate::parser::DEFAULT_FILE_PATH));
    for block in &mut blocks {
        if block.old_start == 0 && block.old_length == 0 {
            block.file_exists = Some(false);
        }
    }
    blocks
}
