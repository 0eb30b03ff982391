use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::Instrument;
use uuid::Uuid;
use walkdir::{DirEntry, WalkDir};

use crate::config::Settings;
use crate::error::AppError;
use crate::models::file_record::{FileContent, FileRecord};
use crate::models::proposal::MoveProposal;
use crate::models::summary::{FailureStage, SummaryRecord};
use crate::scope_path;
use crate::services::extract_service::{self, FileKind};
use crate::services::inference_service::InferenceBackend;
use crate::services::plan_service;
use crate::services::summarize_service::{self, SummarizeOptions};
use crate::state::PlanState;

// ---------------------------------------------------------------------------
// Enumeration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub source_path: String,
    pub absolute_path: PathBuf,
    pub kind: FileKind,
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|name| name.starts_with('.'))
}

/// Every supported, non-hidden regular file under `root`, sorted by relative
/// path. Unsupported types are dropped here without being reported.
pub fn scan(root: &Path) -> Result<Vec<ScannedFile>, AppError> {
    if !root.is_dir() {
        return Err(AppError::General(format!(
            "{} is not a directory",
            root.display()
        )));
    }

    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry));
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(error = %err, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(kind) = extract_service::detect_kind(entry.path()) else {
            tracing::debug!(file = %entry.path().display(), "unsupported type, skipped");
            continue;
        };
        let Some(source_path) = scope_path::relative_to(root, entry.path()) else {
            continue;
        };
        files.push(ScannedFile {
            source_path,
            absolute_path: entry.into_path(),
            kind,
        });
    }

    files.sort_by(|a, b| a.source_path.cmp(&b.source_path));
    Ok(files)
}

// ---------------------------------------------------------------------------
// Per-file extraction + summarization
// ---------------------------------------------------------------------------

fn display_name(file: &ScannedFile) -> String {
    file.absolute_path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| file.source_path.clone())
}

async fn process_file(
    backend: Arc<dyn InferenceBackend>,
    options: Arc<SummarizeOptions>,
    file: ScannedFile,
) -> SummaryRecord {
    let source_path = file.source_path.clone();
    let absolute_path = file.absolute_path.clone();
    let kind = file.kind;
    let record = tokio::task::spawn_blocking(move || {
        extract_service::extract(source_path, &absolute_path, kind)
    })
    .await
    .unwrap_or_else(|join_err| FileRecord {
        source_path: file.source_path.clone(),
        absolute_path: file.absolute_path.clone(),
        file_name: display_name(&file),
        content: FileContent::Failed(format!("extractor crashed: {join_err}")),
    });

    summarize_service::summarize(backend.as_ref(), &options, &record).await
}

/// Extracts and summarizes every file with at most `concurrency` in flight.
/// Returns exactly one record per input file, sorted by source path, even
/// when a worker panics.
pub async fn summarize_all(
    backend: Arc<dyn InferenceBackend>,
    options: SummarizeOptions,
    files: Vec<ScannedFile>,
    concurrency: usize,
) -> Vec<SummaryRecord> {
    if files.is_empty() {
        return Vec::new();
    }

    let total = files.len();
    let parallelism = concurrency.max(1).min(total);
    let semaphore = Arc::new(Semaphore::new(parallelism));
    let options = Arc::new(options);
    let mut join_set: JoinSet<SummaryRecord> = JoinSet::new();
    let mut in_flight: HashMap<tokio::task::Id, ScannedFile> = HashMap::new();
    let mut results = Vec::with_capacity(total);

    for file in files {
        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                results.push(worker_failure(&file, "worker pool closed"));
                continue;
            }
        };
        let backend = backend.clone();
        let options = options.clone();
        let task_file = file.clone();
        let handle = join_set.spawn(async move {
            let _permit = permit;
            process_file(backend, options, task_file).await
        });
        in_flight.insert(handle.id(), file);
    }

    while let Some(joined) = join_set.join_next_with_id().await {
        match joined {
            Ok((id, record)) => {
                in_flight.remove(&id);
                results.push(record);
            }
            Err(join_err) => {
                if let Some(file) = in_flight.remove(&join_err.id()) {
                    tracing::error!(file = %file.source_path, error = %join_err, "worker failed");
                    results.push(worker_failure(&file, &join_err.to_string()));
                }
            }
        }
        tracing::debug!(done = results.len(), total, "summarization progress");
    }

    results.sort_by(|a, b| a.source_path.cmp(&b.source_path));
    results
}

fn worker_failure(file: &ScannedFile, detail: &str) -> SummaryRecord {
    SummaryRecord::failure(
        &file.source_path,
        &display_name(file),
        &file.absolute_path.to_string_lossy(),
        FailureStage::Summarization,
        format!("worker failed: {detail}"),
    )
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanOutcome {
    /// Every file failed, so no plan was requested.
    NoSummaries,
    /// The plan request or its parsing failed; nothing will be reorganized.
    Failed { reason: String },
    Proposed { proposals: usize, moves: usize },
}

impl std::fmt::Display for PlanOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoSummaries => write!(f, "no plan could be produced: no file was summarized"),
            Self::Failed { reason } => {
                write!(f, "no files could be reorganized: {reason}")
            }
            Self::Proposed { moves: 0, .. } => write!(f, "nothing needs reorganizing"),
            Self::Proposed { proposals, moves } => {
                write!(f, "{moves} of {proposals} files have a new destination")
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOutput {
    pub run_id: Uuid,
    pub summaries: Vec<SummaryRecord>,
    pub plan: PlanState,
    pub outcome: PlanOutcome,
}

impl RunOutput {
    pub fn errors(&self) -> impl Iterator<Item = &SummaryRecord> {
        self.summaries.iter().filter(|record| record.is_error())
    }

    pub fn successes(&self) -> impl Iterator<Item = &SummaryRecord> {
        self.summaries.iter().filter(|record| !record.is_error())
    }

    pub fn report(&self) -> RunReport<'_> {
        RunReport {
            run_id: self.run_id,
            generated_at: chrono::Utc::now(),
            source_root: self.plan.source_root(),
            dest_root: self.plan.dest_root(),
            outcome: &self.outcome,
            summaries: self.successes().collect(),
            errors: self.errors().collect(),
            proposals: self.plan.snapshot(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RunReport<'a> {
    pub run_id: Uuid,
    pub generated_at: chrono::DateTime<chrono::Utc>,
    pub source_root: &'a Path,
    pub dest_root: &'a Path,
    pub outcome: &'a PlanOutcome,
    pub summaries: Vec<&'a SummaryRecord>,
    pub errors: Vec<&'a SummaryRecord>,
    pub proposals: Vec<MoveProposal>,
}

pub fn write_report(path: &Path, report: &RunReport<'_>) -> Result<(), AppError> {
    let file = std::fs::File::create(path)?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(file), report)?;
    tracing::info!(path = %path.display(), "wrote run report");
    Ok(())
}

/// Summarizes everything under `root`, then asks for one plan covering the
/// successful summaries.
pub async fn run(
    backend: Arc<dyn InferenceBackend>,
    settings: &Settings,
    root: &Path,
    dest_root: &Path,
) -> Result<RunOutput, AppError> {
    let run_id = Uuid::new_v4();
    let span = tracing::info_span!("run", %run_id);
    async move {
        let summaries = summarize_dir(backend.clone(), settings, root).await?;
        let successes = summaries.iter().filter(|record| !record.is_error()).count();

        let (plan, outcome) = if successes == 0 {
            tracing::warn!("no file was summarized, skipping plan generation");
            (PlanState::new(root, dest_root), PlanOutcome::NoSummaries)
        } else {
            match plan_service::propose_plan(backend.as_ref(), &settings.plan_model, &summaries)
                .await
            {
                Ok(proposals) => {
                    let plan = PlanState::from_proposals(root, dest_root, proposals);
                    let outcome = PlanOutcome::Proposed {
                        proposals: plan.len(),
                        moves: plan.move_count(),
                    };
                    (plan, outcome)
                }
                Err(err) => {
                    tracing::error!(error = %err, "plan generation failed");
                    (
                        PlanState::new(root, dest_root),
                        PlanOutcome::Failed {
                            reason: err.to_string(),
                        },
                    )
                }
            }
        };

        tracing::info!(%outcome, "run finished");
        Ok(RunOutput {
            run_id,
            summaries,
            plan,
            outcome,
        })
    }
    .instrument(span)
    .await
}

/// Extraction and summarization only.
pub async fn summarize_dir(
    backend: Arc<dyn InferenceBackend>,
    settings: &Settings,
    root: &Path,
) -> Result<Vec<SummaryRecord>, AppError> {
    let files = scan(root)?;
    tracing::info!(root = %root.display(), files = files.len(), "scanned directory");
    let summaries = summarize_all(
        backend,
        SummarizeOptions::from(settings),
        files,
        settings.concurrency,
    )
    .await;
    let failed = summaries.iter().filter(|record| record.is_error()).count();
    tracing::info!(
        summarized = summaries.len() - failed,
        failed,
        "summarization finished"
    );
    Ok(summaries)
}
