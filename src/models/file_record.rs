use std::path::PathBuf;

/// One enumerated input file. `source_path` is relative to the scanned root
/// and is the key used across the run.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub source_path: String,
    pub absolute_path: PathBuf,
    pub file_name: String,
    pub content: FileContent,
}

#[derive(Debug, Clone)]
pub enum FileContent {
    Text(String),
    Image(ImageRef),
    Failed(String),
}

/// Image prepared for a captioning request.
#[derive(Debug, Clone)]
pub struct ImageRef {
    pub base64_jpeg: String,
}

impl FileRecord {
    pub fn extraction_error(&self) -> Option<&str> {
        match &self.content {
            FileContent::Failed(detail) => Some(detail),
            _ => None,
        }
    }
}
