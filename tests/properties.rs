use std::cell::RefCell;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use proptest::prelude::*;
use reshelf::commands::organize_pipeline;
use reshelf::config::Settings;
use reshelf::error::{InferenceError, MoveError};
use reshelf::models::proposal::{MoveProposal, ProposalStatus};
use reshelf::services::inference_service::{ChatRequest, GenerateRequest, InferenceBackend};
use reshelf::services::move_service::{MoveExecutor, MoveOutcome};
use reshelf::services::summarize_service::SummarizeOptions;
use reshelf::state::PlanState;

#[derive(Debug, Clone, Copy)]
enum Fate {
    Summarized,
    EmptyFile,
    TransportError,
    GarbageReply,
}

fn fate() -> impl Strategy<Value = Fate> {
    prop_oneof![
        Just(Fate::Summarized),
        Just(Fate::EmptyFile),
        Just(Fate::TransportError),
        Just(Fate::GarbageReply),
    ]
}

/// Decides the reply from a marker written into each file's content.
struct MarkerBackend;

#[async_trait]
impl InferenceBackend for MarkerBackend {
    async fn generate(&self, request: GenerateRequest) -> Result<String, InferenceError> {
        if request.prompt.contains("marker-transport") {
            Err(InferenceError::Transport("connection refused".to_string()))
        } else if request.prompt.contains("marker-garbage") {
            Ok("<html>oops</html>".to_string())
        } else {
            Ok(r#"{"summary": "fine"}"#.to_string())
        }
    }

    async fn chat(&self, _request: ChatRequest) -> Result<String, InferenceError> {
        Ok(r#"{"files": []}"#.to_string())
    }
}

fn write_fixture(dir: &Path, idx: usize, fate: Fate) {
    let content = match fate {
        Fate::Summarized => "marker-ok",
        Fate::EmptyFile => "",
        Fate::TransportError => "marker-transport",
        Fate::GarbageReply => "marker-garbage",
    };
    fs::write(dir.join(format!("file_{idx:03}.txt")), content).unwrap();
}

#[derive(Default)]
struct RecordingMover {
    moves: RefCell<Vec<(PathBuf, PathBuf)>>,
}

impl MoveExecutor for RecordingMover {
    fn move_file(&self, source: &Path, destination: &Path) -> Result<MoveOutcome, MoveError> {
        self.moves
            .borrow_mut()
            .push((source.to_path_buf(), destination.to_path_buf()));
        Ok(MoveOutcome::Moved {
            from: source.to_path_buf(),
            to: destination.to_path_buf(),
        })
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn every_file_yields_exactly_one_record(
        fates in prop::collection::vec(fate(), 1..12),
        concurrency in 1usize..5,
    ) {
        let dir = tempfile::tempdir().unwrap();
        for (idx, fate) in fates.iter().enumerate() {
            write_fixture(dir.path(), idx, *fate);
        }
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let records = runtime.block_on(async {
            let files = organize_pipeline::scan(dir.path()).unwrap();
            organize_pipeline::summarize_all(
                Arc::new(MarkerBackend),
                SummarizeOptions::from(&Settings::default()),
                files,
                concurrency,
            )
            .await
        });

        prop_assert_eq!(records.len(), fates.len());
        let unique: HashSet<_> = records.iter().map(|r| r.source_path.clone()).collect();
        prop_assert_eq!(unique.len(), fates.len());
        for (record, fate) in records.iter().zip(&fates) {
            let expect_ok = matches!(fate, Fate::Summarized);
            prop_assert_eq!(!record.is_error(), expect_ok, "{:?} -> {:?}", fate, record);
            if record.is_error() {
                prop_assert!(!record.error_detail().unwrap().is_empty());
            }
        }
    }

    #[test]
    fn apply_uses_only_the_last_edit(
        edits in prop::collection::vec("[a-z]{1,8}(/[a-z]{1,8}){0,2}\\.txt", 1..6),
    ) {
        let mut plan = PlanState::from_proposals(
            "/inbox",
            "/sorted",
            [MoveProposal::new("notes.txt", "docs/notes.txt")],
        );
        for edit in &edits {
            plan.edit_destination("notes.txt", edit).unwrap();
        }
        let mover = RecordingMover::default();

        plan.apply(&mover, "notes.txt").unwrap();

        let moves = mover.moves.borrow();
        prop_assert_eq!(moves.len(), 1);
        let last = edits.last().unwrap();
        prop_assert_eq!(&moves[0].0, &PathBuf::from("/inbox/notes.txt"));
        prop_assert_eq!(&moves[0].1, &Path::new("/sorted").join(last));
        let proposal = plan.get("notes.txt").unwrap();
        prop_assert_eq!(proposal.status, ProposalStatus::Applied);
        prop_assert_eq!(proposal.original_destination_path.as_str(), "docs/notes.txt");
    }

    #[test]
    fn rollback_after_apply_restores_source(
        dest in "[a-z]{1,8}/[a-z]{1,8}\\.txt",
    ) {
        let mut plan = PlanState::from_proposals(
            "/inbox",
            "/sorted",
            [MoveProposal::new("notes.txt", dest.clone())],
        );
        let mover = RecordingMover::default();

        plan.apply(&mover, "notes.txt").unwrap();
        plan.rollback(&mover, "notes.txt").unwrap();

        let moves = mover.moves.borrow();
        prop_assert_eq!(&moves[1].0, &Path::new("/sorted").join(&dest));
        prop_assert_eq!(&moves[1].1, &PathBuf::from("/inbox/notes.txt"));
        let proposal = plan.get("notes.txt").unwrap();
        prop_assert_eq!(proposal.status, ProposalStatus::RolledBack);
        prop_assert_eq!(proposal.destination_path.as_str(), "notes.txt");
        prop_assert_eq!(proposal.original_destination_path.as_str(), dest.as_str());
    }
}
