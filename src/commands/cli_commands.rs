use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;

use crate::cli::OrganizeArgs;
use crate::commands::organize_pipeline::{self, PlanOutcome};
use crate::commands::review_commands::{self, ReviewSession};
use crate::config::Settings;
use crate::models::summary::SummaryRecord;
use crate::services::inference_service::InferenceBackend;
use crate::services::move_service::FsMover;

pub async fn summarize(
    backend: Arc<dyn InferenceBackend>,
    settings: &Settings,
    dir: &Path,
) -> anyhow::Result<()> {
    let records = organize_pipeline::summarize_dir(backend, settings, dir)
        .await
        .with_context(|| format!("cannot summarize {}", dir.display()))?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for record in &records {
        if let Some(summary) = record.summary_text() {
            writeln!(out, "{}: {summary}", record.source_path)?;
        }
    }
    let errors: Vec<&SummaryRecord> = records.iter().filter(|r| r.is_error()).collect();
    if !errors.is_empty() {
        write!(out, "\n{}", review_commands::render_errors(&errors))?;
    }
    Ok(())
}

pub async fn organize(
    backend: Arc<dyn InferenceBackend>,
    settings: &Settings,
    args: OrganizeArgs,
) -> anyhow::Result<()> {
    let dest = args.dest.clone().unwrap_or_else(|| args.dir.clone());
    let mut output = organize_pipeline::run(backend, settings, &args.dir, &dest)
        .await
        .with_context(|| format!("cannot organize {}", args.dir.display()))?;

    let errors: Vec<SummaryRecord> = output.errors().cloned().collect();
    {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        if !errors.is_empty() {
            let refs: Vec<&SummaryRecord> = errors.iter().collect();
            writeln!(out, "{}", review_commands::render_errors(&refs))?;
        }
        writeln!(out, "{}", output.outcome)?;
        if matches!(output.outcome, PlanOutcome::Proposed { .. }) {
            write!(out, "{}", review_commands::render_plan_tree(&output.plan))?;
        }
    }

    if !output.plan.is_empty() && !args.dry_run {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        if args.apply_all {
            let failures = review_commands::apply_all(&mut output.plan, &FsMover, &mut out)?;
            if failures > 0 {
                tracing::warn!(failures, "some moves were not applied");
            }
        } else {
            let stdin = io::stdin();
            ReviewSession::new(&mut output.plan, errors.iter().collect(), &FsMover)
                .run(stdin.lock(), &mut out)?;
        }
    }

    if let Some(path) = &args.report {
        organize_pipeline::write_report(path, &output.report())
            .with_context(|| format!("cannot write report to {}", path.display()))?;
    }
    Ok(())
}
