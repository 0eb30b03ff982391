use serde::Deserialize;

use crate::config::Settings;
use crate::models::file_record::{FileContent, FileRecord, ImageRef};
use crate::models::summary::{FailureStage, SummaryRecord};
use crate::services::extract_service::truncate_chars;
use crate::services::inference_service::{GenerateRequest, InferenceBackend};
use crate::services::plan_service::extract_json_payload;

const IMAGE_PROMPT: &str = r#"Describe the contents of this image and summarize its features.
You must return strictly valid JSON, no extra formatting or keys.

Return exactly:
{
  "summary": "..."
}
No additional fields or text."#;

#[derive(Debug, Clone)]
pub struct SummarizeOptions {
    pub text_model: String,
    pub vision_model: String,
    pub max_content_chars: usize,
}

impl From<&Settings> for SummarizeOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            text_model: settings.text_model.clone(),
            vision_model: settings.vision_model.clone(),
            max_content_chars: settings.max_content_chars,
        }
    }
}

#[derive(Deserialize)]
struct SummaryPayload {
    summary: String,
}

pub fn build_text_prompt(content: &str, max_chars: usize) -> String {
    let truncated = truncate_chars(content, max_chars);
    format!(
        r#"You are an AI assistant. You must return strictly valid JSON, no extra formatting or keys.

Constraints:
- summary: A short, human-readable summary of the file (100 words max).

File content:
"""
{truncated}
"""

Return exactly:
{{
  "summary": "..."
}}
No additional fields or text."#
    )
}

/// Reads the `summary` field out of a model reply. Image captions may also
/// arrive as plain prose, which is taken verbatim.
pub fn parse_summary(raw: &str, allow_free_text: bool) -> Result<String, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("model returned an empty response".to_string());
    }

    if let Some(payload) = extract_json_payload(trimmed) {
        if let Ok(parsed) = serde_json::from_str::<SummaryPayload>(&payload) {
            let summary = parsed.summary.trim();
            if summary.is_empty() {
                return Err("model returned an empty summary".to_string());
            }
            return Ok(summary.to_string());
        }
    }

    if allow_free_text && !trimmed.starts_with('{') {
        return Ok(trimmed.to_string());
    }
    Err(format!(
        "response is not a {{\"summary\": ...}} object: {}",
        truncate_chars(trimmed, 120)
    ))
}

/// One request per file. Every outcome, including transport failures and
/// unusable replies, comes back as a [`SummaryRecord`].
pub async fn summarize(
    backend: &dyn InferenceBackend,
    options: &SummarizeOptions,
    record: &FileRecord,
) -> SummaryRecord {
    let file_path = record.absolute_path.to_string_lossy().to_string();
    let failure = |stage: FailureStage, detail: String| {
        SummaryRecord::failure(&record.source_path, &record.file_name, &file_path, stage, detail)
    };

    let (request, allow_free_text) = match &record.content {
        FileContent::Failed(detail) => return failure(FailureStage::Extraction, detail.clone()),
        FileContent::Text(text) => (
            GenerateRequest {
                model: options.text_model.clone(),
                prompt: build_text_prompt(text, options.max_content_chars),
                images: Vec::new(),
            },
            false,
        ),
        FileContent::Image(ImageRef { base64_jpeg }) => (
            GenerateRequest {
                model: options.vision_model.clone(),
                prompt: IMAGE_PROMPT.to_string(),
                images: vec![base64_jpeg.clone()],
            },
            true,
        ),
    };

    let raw = match backend.generate(request).await {
        Ok(raw) => raw,
        Err(err) => {
            tracing::warn!(file = %record.source_path, error = %err, "summarization request failed");
            return failure(FailureStage::Summarization, err.to_string());
        }
    };

    match parse_summary(&raw, allow_free_text) {
        Ok(summary) => {
            tracing::debug!(file = %record.source_path, "summarized");
            SummaryRecord::success(&record.source_path, &record.file_name, &file_path, summary)
        }
        Err(detail) => {
            tracing::warn!(file = %record.source_path, %detail, "unusable summary response");
            failure(FailureStage::Summarization, detail)
        }
    }
}
