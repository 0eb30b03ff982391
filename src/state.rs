use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::MoveError;
use crate::models::proposal::{MoveProposal, ProposalStatus};
use crate::scope_path;
use crate::services::move_service::{MoveExecutor, MoveOutcome};

#[derive(Debug, thiserror::Error)]
pub enum PlanStateError {
    #[error("no proposal for {0}")]
    UnknownSource(String),

    #[error("destination must not be empty")]
    EmptyDestination,

    #[error("{0} has not been applied")]
    NotApplied(String),

    #[error(transparent)]
    Move(#[from] MoveError),
}

impl PlanStateError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Move(err) if err.is_conflict())
    }
}

/// Editable table of proposed moves for one run, keyed by source path.
/// Owned by the review session; there is no other writer.
#[derive(Debug, Clone)]
pub struct PlanState {
    source_root: PathBuf,
    dest_root: PathBuf,
    proposals: BTreeMap<String, MoveProposal>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub proposed: usize,
    pub applied: usize,
    pub rolled_back: usize,
}

impl PlanState {
    pub fn new(source_root: impl Into<PathBuf>, dest_root: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            dest_root: dest_root.into(),
            proposals: BTreeMap::new(),
        }
    }

    /// Builds the table from literal proposals. A repeated source path keeps
    /// its first proposal.
    pub fn from_proposals(
        source_root: impl Into<PathBuf>,
        dest_root: impl Into<PathBuf>,
        proposals: impl IntoIterator<Item = MoveProposal>,
    ) -> Self {
        let mut state = Self::new(source_root, dest_root);
        for proposal in proposals {
            if state.proposals.contains_key(&proposal.source_path) {
                tracing::warn!(source = %proposal.source_path, "duplicate proposal ignored");
                continue;
            }
            state
                .proposals
                .insert(proposal.source_path.clone(), proposal);
        }
        state
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    pub fn dest_root(&self) -> &Path {
        &self.dest_root
    }

    pub fn len(&self) -> usize {
        self.proposals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proposals.is_empty()
    }

    pub fn get(&self, source_path: &str) -> Option<&MoveProposal> {
        self.proposals.get(source_path)
    }

    /// Proposals ordered by source path.
    pub fn proposals(&self) -> impl Iterator<Item = &MoveProposal> {
        self.proposals.values()
    }

    pub fn snapshot(&self) -> Vec<MoveProposal> {
        self.proposals.values().cloned().collect()
    }

    /// True when applying the proposal would leave the file where it is.
    /// Compares resolved paths, so with a separate destination root an
    /// unchanged relative path is still a move.
    pub fn stays_in_place(&self, proposal: &MoveProposal) -> bool {
        let from = scope_path::resolve_within(&self.source_root, &proposal.source_path);
        let to = scope_path::resolve_within(&self.dest_root, &proposal.destination_path);
        matches!((from, to), (Ok(from), Ok(to)) if from == to)
    }

    /// Proposals that would relocate their file.
    pub fn move_count(&self) -> usize {
        self.proposals
            .values()
            .filter(|proposal| !self.stays_in_place(proposal))
            .count()
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for proposal in self.proposals.values() {
            match proposal.status {
                ProposalStatus::Proposed => counts.proposed += 1,
                ProposalStatus::Applied => counts.applied += 1,
                ProposalStatus::RolledBack => counts.rolled_back += 1,
            }
        }
        counts
    }

    /// Replaces the destination without touching status or the original
    /// proposal. Legality is checked when the move is applied.
    pub fn edit_destination(
        &mut self,
        source_path: &str,
        new_destination: &str,
    ) -> Result<(), PlanStateError> {
        let trimmed = new_destination.trim();
        if trimmed.is_empty() {
            return Err(PlanStateError::EmptyDestination);
        }
        let proposal = self.proposal_mut(source_path)?;
        proposal.destination_path = trimmed.to_string();
        Ok(())
    }

    /// Restores the model-proposed destination.
    pub fn reset_destination(&mut self, source_path: &str) -> Result<(), PlanStateError> {
        let proposal = self.proposal_mut(source_path)?;
        proposal.destination_path = proposal.original_destination_path.clone();
        Ok(())
    }

    /// Moves the file to its current destination. On failure nothing about
    /// the proposal changes.
    pub fn apply(
        &mut self,
        mover: &dyn MoveExecutor,
        source_path: &str,
    ) -> Result<MoveOutcome, PlanStateError> {
        let dest_root = self.dest_root.clone();
        let source_root = self.source_root.clone();
        let proposal = self.proposal_mut(source_path)?;
        let destination = scope_path::resolve_within(&dest_root, &proposal.destination_path)?;

        let from = match (proposal.status, proposal.applied_path.as_deref()) {
            (ProposalStatus::Applied, Some(applied)) => {
                if applied == proposal.destination_path {
                    return Ok(MoveOutcome::Unchanged);
                }
                scope_path::resolve_within(&dest_root, applied)?
            }
            _ => scope_path::resolve_within(&source_root, &proposal.source_path)?,
        };

        let outcome = mover.move_file(&from, &destination)?;
        proposal.status = ProposalStatus::Applied;
        proposal.applied_path = Some(proposal.destination_path.clone());
        Ok(outcome)
    }

    /// Moves an applied file back to its source path and resets the
    /// destination to the source path.
    pub fn rollback(
        &mut self,
        mover: &dyn MoveExecutor,
        source_path: &str,
    ) -> Result<MoveOutcome, PlanStateError> {
        let dest_root = self.dest_root.clone();
        let source_root = self.source_root.clone();
        let proposal = self.proposal_mut(source_path)?;

        let applied = match (proposal.status, proposal.applied_path.as_deref()) {
            (ProposalStatus::Applied, Some(applied)) => applied.to_string(),
            _ => return Err(PlanStateError::NotApplied(source_path.to_string())),
        };
        let from = scope_path::resolve_within(&dest_root, &applied)?;
        let original = scope_path::resolve_within(&source_root, &proposal.source_path)?;

        let outcome = mover.move_file(&from, &original)?;
        proposal.destination_path = proposal.source_path.clone();
        proposal.status = ProposalStatus::RolledBack;
        proposal.applied_path = None;
        Ok(outcome)
    }

    /// Applies every proposal still in the proposed state, collecting each
    /// outcome instead of stopping at the first failure. Rolled-back files
    /// stay where they were restored.
    pub fn apply_all(
        &mut self,
        mover: &dyn MoveExecutor,
    ) -> Vec<(String, Result<MoveOutcome, PlanStateError>)> {
        let pending: Vec<String> = self
            .proposals
            .values()
            .filter(|proposal| proposal.status == ProposalStatus::Proposed)
            .map(|proposal| proposal.source_path.clone())
            .collect();
        pending
            .into_iter()
            .map(|source| {
                let result = self.apply(mover, &source);
                (source, result)
            })
            .collect()
    }

    fn proposal_mut(&mut self, source_path: &str) -> Result<&mut MoveProposal, PlanStateError> {
        self.proposals
            .get_mut(source_path)
            .ok_or_else(|| PlanStateError::UnknownSource(source_path.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::move_service::FsMover;
    use std::cell::RefCell;
    use std::fs;

    #[derive(Default)]
    struct RecordingMover {
        calls: RefCell<Vec<(PathBuf, PathBuf)>>,
    }

    impl MoveExecutor for RecordingMover {
        fn move_file(&self, source: &Path, destination: &Path) -> Result<MoveOutcome, MoveError> {
            self.calls
                .borrow_mut()
                .push((source.to_path_buf(), destination.to_path_buf()));
            Ok(MoveOutcome::Moved {
                from: source.to_path_buf(),
                to: destination.to_path_buf(),
            })
        }
    }

    fn fixture(root: &Path) -> PlanState {
        PlanState::from_proposals(
            root,
            root,
            vec![MoveProposal::new("notes.txt", "docs/notes_2024.txt")],
        )
    }

    #[test]
    fn apply_then_rollback_restores_source() {
        let base = tempfile::tempdir().unwrap();
        fs::write(base.path().join("notes.txt"), "hello").unwrap();
        let mut state = fixture(base.path());

        state.apply(&FsMover, "notes.txt").unwrap();
        let proposal = state.get("notes.txt").unwrap();
        assert_eq!(proposal.status, ProposalStatus::Applied);
        assert!(base.path().join("docs/notes_2024.txt").exists());
        assert!(!base.path().join("notes.txt").exists());

        state.rollback(&FsMover, "notes.txt").unwrap();
        let proposal = state.get("notes.txt").unwrap();
        assert_eq!(proposal.status, ProposalStatus::RolledBack);
        assert_eq!(proposal.destination_path, "notes.txt");
        assert_eq!(proposal.original_destination_path, "docs/notes_2024.txt");
        assert_eq!(
            fs::read_to_string(base.path().join("notes.txt")).unwrap(),
            "hello"
        );
        assert!(!base.path().join("docs/notes_2024.txt").exists());
    }

    #[test]
    fn conflict_leaves_status_and_files_untouched() {
        let base = tempfile::tempdir().unwrap();
        fs::write(base.path().join("notes.txt"), "new").unwrap();
        fs::create_dir_all(base.path().join("docs")).unwrap();
        fs::write(base.path().join("docs/notes_2024.txt"), "old").unwrap();
        let mut state = fixture(base.path());

        let err = state.apply(&FsMover, "notes.txt").unwrap_err();

        assert!(err.is_conflict());
        assert_eq!(state.get("notes.txt").unwrap().status, ProposalStatus::Proposed);
        assert_eq!(
            fs::read_to_string(base.path().join("notes.txt")).unwrap(),
            "new"
        );
        assert_eq!(
            fs::read_to_string(base.path().join("docs/notes_2024.txt")).unwrap(),
            "old"
        );
    }

    #[test]
    fn only_final_edit_is_moved() {
        let root = PathBuf::from("/data");
        let mut state = fixture(&root);
        let mover = RecordingMover::default();

        state.edit_destination("notes.txt", "a/one.txt").unwrap();
        state.edit_destination("notes.txt", "b/two.txt").unwrap();
        state.edit_destination("notes.txt", "c/three.txt").unwrap();
        state.apply(&mover, "notes.txt").unwrap();

        let calls = mover.calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, PathBuf::from("/data/notes.txt"));
        assert_eq!(calls[0].1, PathBuf::from("/data/c/three.txt"));
        assert_eq!(
            state.get("notes.txt").unwrap().original_destination_path,
            "docs/notes_2024.txt"
        );
    }

    #[test]
    fn edit_rejects_empty_destination() {
        let mut state = fixture(Path::new("/data"));
        assert!(matches!(
            state.edit_destination("notes.txt", "   "),
            Err(PlanStateError::EmptyDestination)
        ));
        assert!(matches!(
            state.edit_destination("missing.txt", "x.txt"),
            Err(PlanStateError::UnknownSource(_))
        ));
    }

    #[test]
    fn rollback_before_apply_is_rejected_without_moving() {
        let mut state = fixture(Path::new("/data"));
        let mover = RecordingMover::default();

        let err = state.rollback(&mover, "notes.txt").unwrap_err();

        assert!(matches!(err, PlanStateError::NotApplied(_)));
        assert!(mover.calls.borrow().is_empty());
        assert_eq!(state.get("notes.txt").unwrap().status, ProposalStatus::Proposed);
    }

    #[test]
    fn apply_outside_root_fails_before_moving() {
        let mut state = fixture(Path::new("/data"));
        let mover = RecordingMover::default();
        state.edit_destination("notes.txt", "../escape.txt").unwrap();

        let err = state.apply(&mover, "notes.txt").unwrap_err();

        assert!(matches!(err, PlanStateError::Move(MoveError::OutsideRoot { .. })));
        assert!(mover.calls.borrow().is_empty());
    }

    #[test]
    fn reapply_after_edit_relocates_from_applied_path() {
        let mut state = fixture(Path::new("/data"));
        let mover = RecordingMover::default();

        state.apply(&mover, "notes.txt").unwrap();
        assert_eq!(state.apply(&mover, "notes.txt").unwrap(), MoveOutcome::Unchanged);
        state.edit_destination("notes.txt", "archive/notes.txt").unwrap();
        state.apply(&mover, "notes.txt").unwrap();

        let calls = mover.calls.borrow();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].0, PathBuf::from("/data/docs/notes_2024.txt"));
        assert_eq!(calls[1].1, PathBuf::from("/data/archive/notes.txt"));
        assert_eq!(
            state.get("notes.txt").unwrap().applied_path(),
            Some("archive/notes.txt")
        );
    }

    #[test]
    fn reset_restores_original_destination_after_rollback() {
        let mut state = fixture(Path::new("/data"));
        let mover = RecordingMover::default();
        state.apply(&mover, "notes.txt").unwrap();
        state.rollback(&mover, "notes.txt").unwrap();

        state.reset_destination("notes.txt").unwrap();

        assert_eq!(
            state.get("notes.txt").unwrap().destination_path,
            "docs/notes_2024.txt"
        );
    }

    #[test]
    fn duplicate_sources_keep_first_proposal() {
        let state = PlanState::from_proposals(
            "/data",
            "/data",
            vec![
                MoveProposal::new("a.txt", "x/a.txt"),
                MoveProposal::new("a.txt", "y/a.txt"),
            ],
        );
        assert_eq!(state.len(), 1);
        assert_eq!(state.get("a.txt").unwrap().destination_path, "x/a.txt");
    }

    #[test]
    fn unchanged_path_is_a_move_only_across_roots() {
        let proposals = vec![
            MoveProposal::new("misc.txt", "misc.txt"),
            MoveProposal::new("notes.txt", "docs/notes.txt"),
        ];
        let same = PlanState::from_proposals("/inbox", "/inbox", proposals.clone());
        let split = PlanState::from_proposals("/inbox", "/sorted", proposals);

        assert!(same.stays_in_place(same.get("misc.txt").unwrap()));
        assert!(!same.stays_in_place(same.get("notes.txt").unwrap()));
        assert_eq!(same.move_count(), 1);
        assert!(!split.stays_in_place(split.get("misc.txt").unwrap()));
        assert_eq!(split.move_count(), 2);
    }

    #[test]
    fn apply_all_leaves_rolled_back_files_alone() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        fs::write(src.path().join("notes.txt"), "hello").unwrap();
        let mut state = PlanState::from_proposals(
            src.path(),
            dst.path(),
            vec![MoveProposal::new("notes.txt", "docs/notes.txt")],
        );
        state.apply(&FsMover, "notes.txt").unwrap();
        state.rollback(&FsMover, "notes.txt").unwrap();

        let results = state.apply_all(&FsMover);

        assert!(results.is_empty());
        assert_eq!(state.get("notes.txt").unwrap().status, ProposalStatus::RolledBack);
        assert!(src.path().join("notes.txt").is_file());
        assert!(!dst.path().join("notes.txt").exists());
        assert!(!dst.path().join("docs/notes.txt").exists());
    }

    #[test]
    fn apply_all_reports_each_outcome() {
        let base = tempfile::tempdir().unwrap();
        fs::write(base.path().join("a.txt"), "a").unwrap();
        let mut state = PlanState::from_proposals(
            base.path(),
            base.path(),
            vec![
                MoveProposal::new("a.txt", "docs/a.txt"),
                MoveProposal::new("missing.txt", "docs/missing.txt"),
            ],
        );

        let results = state.apply_all(&FsMover);

        assert_eq!(results.len(), 2);
        assert!(results[0].1.is_ok());
        assert!(results[1].1.is_err());
        assert_eq!(
            state.counts(),
            StatusCounts {
                proposed: 1,
                applied: 1,
                rolled_back: 0
            }
        );
    }
}
