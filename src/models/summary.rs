use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Extraction,
    Summarization,
}

impl std::fmt::Display for FailureStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Extraction => write!(f, "extraction"),
            Self::Summarization => write!(f, "summarization"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SummaryOutcome {
    Summary {
        summary_text: String,
    },
    Error {
        stage: FailureStage,
        error_detail: String,
    },
}

/// Outcome of summarizing one file. Identifiers always come from the input
/// record, never from the model's reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub source_path: String,
    pub file_name: String,
    pub file_path: String,
    #[serde(flatten)]
    pub outcome: SummaryOutcome,
}

impl SummaryRecord {
    pub fn success(source_path: &str, file_name: &str, file_path: &str, summary: String) -> Self {
        Self {
            source_path: source_path.to_string(),
            file_name: file_name.to_string(),
            file_path: file_path.to_string(),
            outcome: SummaryOutcome::Summary {
                summary_text: summary,
            },
        }
    }

    pub fn failure(
        source_path: &str,
        file_name: &str,
        file_path: &str,
        stage: FailureStage,
        detail: impl Into<String>,
    ) -> Self {
        let mut error_detail = detail.into();
        if error_detail.trim().is_empty() {
            error_detail = format!("{stage} failed");
        }
        Self {
            source_path: source_path.to_string(),
            file_name: file_name.to_string(),
            file_path: file_path.to_string(),
            outcome: SummaryOutcome::Error {
                stage,
                error_detail,
            },
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, SummaryOutcome::Error { .. })
    }

    pub fn summary_text(&self) -> Option<&str> {
        match &self.outcome {
            SummaryOutcome::Summary { summary_text } => Some(summary_text),
            SummaryOutcome::Error { .. } => None,
        }
    }

    pub fn error_detail(&self) -> Option<&str> {
        match &self.outcome {
            SummaryOutcome::Error { error_detail, .. } => Some(error_detail),
            SummaryOutcome::Summary { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_never_carries_empty_detail() {
        let record = SummaryRecord::failure("a.txt", "a.txt", "/r/a.txt", FailureStage::Extraction, "  ");
        assert!(record.is_error());
        assert_eq!(record.error_detail(), Some("extraction failed"));
        assert_eq!(record.summary_text(), None);
    }

    #[test]
    fn serializes_flat_with_status_tag() {
        let record = SummaryRecord::success("docs/a.txt", "a.txt", "/r/docs/a.txt", "notes".into());
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["status"], "summary");
        assert_eq!(value["summary_text"], "notes");
        assert_eq!(value["source_path"], "docs/a.txt");
    }
}
