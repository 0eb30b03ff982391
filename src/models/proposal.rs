use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Proposed,
    Applied,
    RolledBack,
}

impl std::fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Proposed => write!(f, "proposed"),
            Self::Applied => write!(f, "applied"),
            Self::RolledBack => write!(f, "rolled_back"),
        }
    }
}

impl std::str::FromStr for ProposalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "proposed" => Ok(Self::Proposed),
            "applied" => Ok(Self::Applied),
            "rolled_back" => Ok(Self::RolledBack),
            _ => Err(format!("unknown proposal status: {s}")),
        }
    }
}

/// One row of the reorganization plan. Paths are relative: `source_path` to
/// the scanned root, `destination_path` to the destination root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveProposal {
    pub source_path: String,
    pub destination_path: String,
    pub original_destination_path: String,
    pub status: ProposalStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) applied_path: Option<String>,
}

impl MoveProposal {
    pub fn new(source_path: impl Into<String>, destination_path: impl Into<String>) -> Self {
        let destination_path = destination_path.into();
        Self {
            source_path: source_path.into(),
            original_destination_path: destination_path.clone(),
            destination_path,
            status: ProposalStatus::Proposed,
            summary: None,
            applied_path: None,
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    /// Destination (relative to the destination root) the file currently
    /// occupies, when applied.
    pub fn applied_path(&self) -> Option<&str> {
        self.applied_path.as_deref()
    }
}
