use std::io::{self, BufRead, Write};

use crate::models::proposal::{MoveProposal, ProposalStatus};
use crate::models::summary::{SummaryOutcome, SummaryRecord};
use crate::services::move_service::{MoveExecutor, MoveOutcome};
use crate::services::plan_service;
use crate::state::{PlanState, PlanStateError};

const HELP: &str = "\
commands:
  list [status]         show proposals, optionally only proposed/applied/rolled_back
  show <n>              show one proposal and its summary
  edit <n> <dest>       change the destination of a proposal
  reset <n>             restore the proposed destination
  apply <n>             move the file to its destination
  apply all             apply every proposal still proposed
  rollback <n>          move an applied file back to its source
  tree                  preview the destination tree
  errors                list files that could not be summarized
  help                  show this text
  quit                  leave the review
<n> is a row number from `list` or an exact source path.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List(Option<ProposalStatus>),
    Show(String),
    Edit(String, String),
    Reset(String),
    Apply(String),
    ApplyAll,
    Rollback(String),
    Tree,
    Errors,
    Help,
    Quit,
}

pub fn parse_command(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };
    let target = |usage: &str| {
        if rest.is_empty() {
            Err(format!("usage: {usage}"))
        } else {
            Ok(rest.to_string())
        }
    };

    match verb.to_ascii_lowercase().as_str() {
        "list" | "ls" if rest.is_empty() => Ok(Command::List(None)),
        "list" | "ls" => rest.parse().map(|status| Command::List(Some(status))),
        "show" => target("show <n>").map(Command::Show),
        "edit" => {
            let (row, dest) = rest
                .split_once(char::is_whitespace)
                .ok_or_else(|| "usage: edit <n> <dest>".to_string())?;
            Ok(Command::Edit(row.to_string(), dest.trim().to_string()))
        }
        "reset" => target("reset <n>").map(Command::Reset),
        "apply" if rest.eq_ignore_ascii_case("all") => Ok(Command::ApplyAll),
        "apply" => target("apply <n>").map(Command::Apply),
        "rollback" | "undo" => target("rollback <n>").map(Command::Rollback),
        "tree" => Ok(Command::Tree),
        "errors" => Ok(Command::Errors),
        "help" | "?" => Ok(Command::Help),
        "quit" | "exit" | "q" => Ok(Command::Quit),
        other => Err(format!("unknown command `{other}`, try `help`")),
    }
}

/// Maps a row number or exact source path to the proposal's source path.
pub fn resolve_target(plan: &PlanState, target: &str) -> Option<String> {
    if plan.get(target).is_some() {
        return Some(target.to_string());
    }
    let row: usize = target.parse().ok()?;
    plan.proposals()
        .nth(row.checked_sub(1)?)
        .map(|proposal| proposal.source_path.clone())
}

pub fn render_proposals(plan: &PlanState, only: Option<ProposalStatus>) -> String {
    if plan.is_empty() {
        return "no proposals\n".to_string();
    }
    let mut out = String::new();
    for (idx, proposal) in plan.proposals().enumerate() {
        if only.is_some_and(|status| status != proposal.status) {
            continue;
        }
        out.push_str(&proposal_row(idx + 1, proposal, plan.stays_in_place(proposal)));
    }
    let counts = plan.counts();
    out.push_str(&format!(
        "{} proposed, {} applied, {} rolled back\n",
        counts.proposed, counts.applied, counts.rolled_back
    ));
    out
}

fn proposal_row(row: usize, proposal: &MoveProposal, stays: bool) -> String {
    let target = if stays {
        "(stays)".to_string()
    } else {
        proposal.destination_path.clone()
    };
    let edited = if proposal.destination_path != proposal.original_destination_path {
        " *"
    } else {
        ""
    };
    format!(
        "{row:>3}  {:<11}  {} -> {target}{edited}\n",
        proposal.status.to_string(),
        proposal.source_path
    )
}

pub fn render_errors(errors: &[&SummaryRecord]) -> String {
    if errors.is_empty() {
        return "no errors\n".to_string();
    }
    let mut out = format!("{} file(s) could not be summarized:\n", errors.len());
    for record in errors {
        let stage = match &record.outcome {
            SummaryOutcome::Error { stage, .. } => stage.to_string(),
            SummaryOutcome::Summary { .. } => continue,
        };
        out.push_str(&format!(
            "  {}  [{stage}]  {}\n      {}\n",
            record.file_name,
            record.error_detail().unwrap_or_default(),
            record.file_path
        ));
    }
    out
}

pub fn render_plan_tree(plan: &PlanState) -> String {
    let label = plan.dest_root().display().to_string();
    plan_service::render_tree(
        &label,
        plan.proposals().map(|proposal| proposal.destination_path.as_str()),
    )
}

fn describe_failure(err: &PlanStateError) -> String {
    if err.is_conflict() {
        format!("{err}; edit the destination and try again")
    } else {
        err.to_string()
    }
}

fn describe_outcome(source: &str, outcome: &MoveOutcome, plan: &PlanState) -> String {
    match outcome {
        MoveOutcome::Moved { to, .. } => format!("moved {source} -> {}", to.display()),
        MoveOutcome::Unchanged => {
            let destination = plan
                .get(source)
                .map(|proposal| proposal.destination_path.as_str())
                .unwrap_or(source);
            format!("{source} already at {destination}")
        }
    }
}

/// Applies every pending proposal and writes one line per file.
pub fn apply_all<W: Write>(
    plan: &mut PlanState,
    mover: &dyn MoveExecutor,
    output: &mut W,
) -> io::Result<usize> {
    let results = plan.apply_all(mover);
    let mut failures = 0;
    for (source, result) in results {
        match result {
            Ok(outcome) => writeln!(output, "{}", describe_outcome(&source, &outcome, plan))?,
            Err(err) => {
                failures += 1;
                writeln!(output, "{source}: {}", describe_failure(&err))?;
            }
        }
    }
    Ok(failures)
}

pub struct ReviewSession<'a> {
    plan: &'a mut PlanState,
    errors: Vec<&'a SummaryRecord>,
    mover: &'a dyn MoveExecutor,
}

impl<'a> ReviewSession<'a> {
    pub fn new(
        plan: &'a mut PlanState,
        errors: Vec<&'a SummaryRecord>,
        mover: &'a dyn MoveExecutor,
    ) -> Self {
        Self {
            plan,
            errors,
            mover,
        }
    }

    /// Reads commands until `quit` or end of input.
    pub fn run<R: BufRead, W: Write>(&mut self, input: R, mut output: W) -> io::Result<()> {
        write!(output, "{}", render_proposals(self.plan, None))?;
        writeln!(output, "type `help` for commands")?;
        prompt(&mut output)?;

        for line in input.lines() {
            let line = line?;
            if line.trim().is_empty() {
                prompt(&mut output)?;
                continue;
            }
            match parse_command(&line) {
                Ok(Command::Quit) => break,
                Ok(command) => self.execute(command, &mut output)?,
                Err(message) => writeln!(output, "{message}")?,
            }
            prompt(&mut output)?;
        }

        let counts = self.plan.counts();
        writeln!(
            output,
            "\nreview finished: {} applied, {} rolled back, {} untouched",
            counts.applied, counts.rolled_back, counts.proposed
        )?;
        Ok(())
    }

    fn resolve<W: Write>(&self, target: &str, output: &mut W) -> io::Result<Option<String>> {
        let resolved = resolve_target(self.plan, target);
        if resolved.is_none() {
            writeln!(output, "no proposal `{target}`")?;
        }
        Ok(resolved)
    }

    pub fn execute<W: Write>(&mut self, command: Command, output: &mut W) -> io::Result<()> {
        match command {
            Command::List(only) => write!(output, "{}", render_proposals(self.plan, only))?,
            Command::Tree => write!(output, "{}", render_plan_tree(self.plan))?,
            Command::Errors => write!(output, "{}", render_errors(&self.errors))?,
            Command::Help => writeln!(output, "{HELP}")?,
            Command::Quit => {}
            Command::Show(target) => {
                let Some(source) = self.resolve(&target, output)? else {
                    return Ok(());
                };
                if let Some(proposal) = self.plan.get(&source) {
                    writeln!(output, "source:      {}", proposal.source_path)?;
                    writeln!(output, "destination: {}", proposal.destination_path)?;
                    writeln!(output, "proposed:    {}", proposal.original_destination_path)?;
                    writeln!(output, "status:      {}", proposal.status)?;
                    if let Some(summary) = &proposal.summary {
                        writeln!(output, "summary:     {summary}")?;
                    }
                }
            }
            Command::Edit(target, destination) => {
                let Some(source) = self.resolve(&target, output)? else {
                    return Ok(());
                };
                match self.plan.edit_destination(&source, &destination) {
                    Ok(()) => writeln!(output, "{source} -> {}", destination.trim())?,
                    Err(err) => writeln!(output, "{err}")?,
                }
            }
            Command::Reset(target) => {
                let Some(source) = self.resolve(&target, output)? else {
                    return Ok(());
                };
                match self.plan.reset_destination(&source) {
                    Ok(()) => writeln!(output, "{source} reset")?,
                    Err(err) => writeln!(output, "{err}")?,
                }
            }
            Command::Apply(target) => {
                let Some(source) = self.resolve(&target, output)? else {
                    return Ok(());
                };
                match self.plan.apply(self.mover, &source) {
                    Ok(outcome) => writeln!(output, "{}", describe_outcome(&source, &outcome, self.plan))?,
                    Err(err) => writeln!(output, "{source}: {}", describe_failure(&err))?,
                }
            }
            Command::ApplyAll => {
                let failures = apply_all(self.plan, self.mover, output)?;
                if failures > 0 {
                    writeln!(output, "{failures} move(s) need attention")?;
                }
            }
            Command::Rollback(target) => {
                let Some(source) = self.resolve(&target, output)? else {
                    return Ok(());
                };
                match self.plan.rollback(self.mover, &source) {
                    Ok(_) => writeln!(output, "{source} restored")?,
                    Err(err) => writeln!(output, "{source}: {}", describe_failure(&err))?,
                }
            }
        }
        Ok(())
    }
}

fn prompt<W: Write>(output: &mut W) -> io::Result<()> {
    write!(output, "> ")?;
    output.flush()
}
