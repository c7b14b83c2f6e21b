use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use crossterm::style::Stylize;
use tracing_subscriber::EnvFilter;

use patchlens::backend::HttpBackend;
use patchlens::config::Config;
use patchlens::editor::TextBuffer;
use patchlens::error::PatchError;
use patchlens::estimate::estimate_blocks_from_error;
use patchlens::parser::{group_by_file, parse_diff, parse_diff_for_file};
use patchlens::resolver::{resolve, resolve_all, LineFilter};
use patchlens::review::{block_range_label, diff_view_lines, manual_review_hint, ExplanationSummary};
use patchlens::session::FixSession;
use patchlens::types::{ChangeBlock, Lang, LineKind};
use patchlens::workflow::{FixState, FixStatus, RunStatus};

#[derive(Parser)]
#[command(name = "patchlens")]
#[command(about = "Preview, locate and apply agent-generated patches")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the change blocks of a unified diff
    Parse {
        diff: PathBuf,
        /// Path for hunks that appear without file headers
        #[arg(long)]
        file: Option<String>,
    },
    /// Resolve one change line against a buffer
    Resolve {
        diff: PathBuf,
        buffer: PathBuf,
        #[arg(long)]
        block: usize,
        #[arg(long)]
        line: usize,
        #[arg(long)]
        file: Option<String>,
    },
    /// Print the lines that would be highlighted in a buffer
    Highlight {
        diff: PathBuf,
        buffer: PathBuf,
        #[arg(long)]
        file: Option<String>,
        /// The buffer already contains the patch; skip deleted lines
        #[arg(long)]
        applied: bool,
    },
    /// Estimate the failure location from an error log
    Estimate {
        file: PathBuf,
        stderr: PathBuf,
        #[arg(long, value_enum)]
        lang: Lang,
        /// Lines of context on each side of the error line
        #[arg(long)]
        context: Option<u32>,
    },
    /// Run the program and ask the fix agent for a patch if it fails
    Fix {
        #[arg(long)]
        project: String,
        #[arg(long)]
        entry: String,
        #[arg(long, value_enum)]
        lang: Lang,
        /// Force the fix to target this file
        #[arg(long)]
        file: Option<String>,
        #[arg(long, conflicts_with = "apply_and_run")]
        apply: bool,
        #[arg(long)]
        apply_and_run: bool,
        /// Show every diff line instead of only changes
        #[arg(long)]
        full: bool,
    },
    /// Ask the gen agent for a patch implementing a prompt
    Gen {
        #[arg(long)]
        project: String,
        #[arg(long)]
        prompt: String,
        #[arg(long)]
        apply: bool,
        #[arg(long)]
        full: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("patchlens=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::load();

    match args.command {
        Command::Parse { diff, file } => {
            let diff = read(&diff).await?;
            let blocks = parse_with_default(&diff, file.as_deref());
            if blocks.is_empty() {
                eprintln!("No change blocks found in diff");
                return Ok(());
            }
            print_blocks(&blocks);
        }
        Command::Resolve {
            diff,
            buffer,
            block,
            line,
            file,
        } => {
            let blocks = parse_with_default(&read(&diff).await?, file.as_deref());
            let buffer = read(&buffer).await?;
            let lines: Vec<&str> = buffer.lines().collect();

            let Some(target) = blocks.get(block) else {
                bail!("diff has {} block(s), no block #{}", blocks.len(), block);
            };
            if target.will_be_created() {
                println!("\"{}\" will be created when the patch is applied", target.file_path);
                return Ok(());
            }
            match resolve(target, line, &lines) {
                Some(ln) => println!("{}:{}", target.file_path, ln),
                None => println!("buffer is empty"),
            }
        }
        Command::Highlight {
            diff,
            buffer,
            file,
            applied,
        } => {
            let blocks = parse_with_default(&read(&diff).await?, file.as_deref());
            let buffer = read(&buffer).await?;
            let lines: Vec<&str> = buffer.lines().collect();
            let path = match file.or_else(|| blocks.first().map(|b| b.file_path.clone())) {
                Some(path) => path,
                None => return Ok(()),
            };
            let filter = if applied {
                LineFilter::SkipDeleted
            } else {
                LineFilter::All
            };
            for ln in resolve_all(&blocks, &path, &lines, filter) {
                println!("{}", ln);
            }
        }
        Command::Estimate {
            file,
            stderr,
            lang,
            context,
        } => {
            let content = read(&file).await?;
            let stderr = read(&stderr).await?;
            let context = context.unwrap_or(config.workflow.estimate_context_lines);
            let path = file.to_string_lossy();
            let blocks = estimate_blocks_from_error(&path, &content, &stderr, lang, context);
            if blocks.is_empty() {
                eprintln!("File is empty");
                return Ok(());
            }
            print_blocks(&blocks);
        }
        Command::Fix {
            project,
            entry,
            lang,
            file,
            apply,
            apply_and_run,
            full,
        } => {
            let mut session = connect(&config, &project)?;
            session.set_opened_files(vec![entry.clone()]);

            eprintln!("Running {}...", entry);
            if session.run(&entry, lang).await == RunStatus::Ok {
                eprintln!("Run succeeded, nothing to fix.");
                return Ok(());
            }

            eprintln!("Run failed, requesting a fix preview...");
            match file {
                Some(file) => session.select_target_file(&file).await,
                None => session.request_fix_preview().await,
            };
            print_state(session.workflow().state(), full);

            if apply || apply_and_run {
                apply_preview(&mut session, apply_and_run).await?;
                print_state(session.workflow().state(), full);
            }
        }
        Command::Gen {
            project,
            prompt,
            apply,
            full,
        } => {
            let mut session = connect(&config, &project)?;
            if session.request_gen_preview(&prompt).await == FixStatus::Idle {
                bail!("prompt is empty");
            }
            print_state(session.workflow().state(), full);

            if apply {
                apply_preview(&mut session, false).await?;
                print_state(session.workflow().state(), full);
            }
        }
    }

    Ok(())
}

async fn read(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
}

fn parse_with_default(diff: &str, file: Option<&str>) -> Vec<ChangeBlock> {
    match file {
        Some(file) => parse_diff_for_file(diff, file),
        None => parse_diff(diff),
    }
}

fn connect(config: &Config, project: &str) -> Result<FixSession<HttpBackend, TextBuffer>> {
    let backend = HttpBackend::new(&config.backend).context("Failed to set up backend client")?;
    Ok(FixSession::new(backend, TextBuffer::new(), project, config))
}

async fn apply_preview(session: &mut FixSession<HttpBackend, TextBuffer>, rerun: bool) -> Result<()> {
    if !matches!(session.status(), FixStatus::PreviewReady) {
        return Err(PatchError::NoPreviewAvailable.into());
    }
    eprintln!("Applying patch...");
    match session.apply(rerun).await? {
        Some(outcome) => {
            eprintln!("Updated {}", outcome.affected_files.join(", "));
            if outcome.rerun {
                eprintln!("Re-run: {:?}", session.workflow().run_status());
            }
        }
        None => eprintln!("Patch was not applied"),
    }
    Ok(())
}

fn print_blocks(blocks: &[ChangeBlock]) {
    for (path, members) in group_by_file(blocks) {
        println!("{}", path.bold());
        for (block_index, block) in members {
            println!("{}", format!("  #{} {}", block_index, block_range_label(block)).dark_grey());
            for (line_index, line) in block.lines.iter().enumerate() {
                let row = format!("{:>4} {}{}", line_index, line.kind.prefix(), line.content);
                match line.kind {
                    LineKind::Add => println!("{}", row.green()),
                    LineKind::Del => println!("{}", row.red()),
                    LineKind::Context => println!("{}", row),
                }
            }
        }
    }
}

fn print_state(state: &FixState, full: bool) {
    match state {
        FixState::Idle => eprintln!("No patch."),
        FixState::PreviewReady(preview) => {
            if let Some(target) = &preview.target {
                println!("{} {}", "Target:".bold(), target);
            }
            if !preview.suspect_candidates.is_empty() {
                let paths: Vec<&str> = preview.suspect_candidates.iter().map(|c| c.path.as_str()).collect();
                println!("{} {}", "Other candidates:".bold(), paths.join(", "));
            }
            if let Some(explanation) = &preview.explanation {
                let summary = ExplanationSummary::new(explanation);
                println!("{}", if full { summary.full().to_string() } else { summary.short() });
            }
            for line in diff_view_lines(&preview.diff, full) {
                if line.starts_with("@@") {
                    println!("{}", line.cyan());
                } else if line.starts_with('+') {
                    println!("{}", line.green());
                } else if line.starts_with('-') {
                    println!("{}", line.red());
                } else {
                    println!("{}", line);
                }
            }
        }
        FixState::ManualReview(review) => println!("{}", manual_review_hint(review).yellow()),
        FixState::Applying { .. } => eprintln!("Applying..."),
        FixState::Applied(applied) => {
            eprintln!("Applied at {}", applied.applied_at.format("%H:%M:%S"));
        }
        FixState::Failed { message, retry } => {
            eprintln!("{} {}", "Failed:".red().bold(), message);
            if let Some(preview) = retry {
                eprintln!("Unapplied diff:\n{}", preview.diff);
            }
        }
    }
}
