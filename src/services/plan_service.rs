use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppError;
use crate::models::proposal::MoveProposal;
use crate::models::summary::SummaryRecord;
use crate::scope_path;
use crate::services::inference_service::{ChatMessage, ChatRequest, InferenceBackend};

pub const PLAN_SYSTEM_PROMPT: &str = r#"You must return strictly valid JSON, no extra formatting or keys.

You will be provided with a list of source files and a summary of their contents. For each file, propose a new path and filename, using a directory structure that optimally organizes the files.
Follow good naming conventions. Here are a few guidelines:
- Think about your files: What related files are you working with?
- Identify metadata (for example, date, sample, experiment): What information is needed to easily locate a specific file?
- Do not create multiple subdirectories for a single file, unless it is necessary.
- Abbreviate or encode metadata.
- Use versioning: Are you maintaining different versions of the same file?
- Think about how you will search for your files: What comes first?
- The file name needs to be descriptive and concise.
- Format file names: Avoid spaces, capital letters or special characters. Strictly use only lowercase and underscores instead.

If the file is already named well or matches a known convention, set the destination path to the same as the source path.
Destination paths are relative to the destination directory. Return one entry for every source file.

Your response must ONLY be a JSON object with the following schema:
{
    "files": [
        {
            "src_path": "original file path",
            "dst_path": "new file path under the proposed directory structure"
        }
    ]
}"#;

#[derive(Debug, Serialize)]
struct PlanInputFile<'a> {
    src_path: &'a str,
    file_name: &'a str,
    summary: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlanEntry {
    pub src_path: String,
    pub dst_path: String,
}

/// Pulls the JSON body out of a model reply: a ```json block, any fenced
/// block, or the outermost object or array span.
pub fn extract_json_payload(text: &str) -> Option<String> {
    let trimmed = text.trim();

    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + "```json".len()..];
        if let Some(end) = rest.find("```") {
            return Some(rest[..end].trim().to_string());
        }
    }

    if let Some(start) = trimmed.find("```") {
        let rest = &trimmed[start + 3..];
        if let Some(newline) = rest.find('\n') {
            let body = &rest[newline + 1..];
            if let Some(end) = body.find("```") {
                return Some(body[..end].trim().to_string());
            }
        }
    }

    let (open, close) = match (trimmed.find('{'), trimmed.find('[')) {
        (Some(brace), Some(bracket)) if bracket < brace => ('[', ']'),
        (None, Some(_)) => ('[', ']'),
        _ => ('{', '}'),
    };
    let first = trimmed.find(open)?;
    let last = trimmed.rfind(close)?;
    if first <= last {
        return Some(trimmed[first..=last].to_string());
    }

    None
}

pub fn build_plan_request(model: &str, summaries: &[SummaryRecord]) -> Result<ChatRequest, AppError> {
    let files: Vec<PlanInputFile<'_>> = summaries
        .iter()
        .filter_map(|record| {
            record.summary_text().map(|summary| PlanInputFile {
                src_path: &record.source_path,
                file_name: &record.file_name,
                summary,
            })
        })
        .collect();
    Ok(ChatRequest {
        model: model.to_string(),
        messages: vec![
            ChatMessage::system(PLAN_SYSTEM_PROMPT),
            ChatMessage::user(serde_json::to_string(&files)?),
        ],
    })
}

/// Reads `{src_path, dst_path}` entries from either a `files` field or a
/// top-level list. Malformed entries are dropped; a missing list is an error.
pub fn parse_plan(text: &str) -> Result<Vec<PlanEntry>, AppError> {
    let payload = extract_json_payload(text).ok_or_else(|| {
        AppError::PlanGeneration("model response did not contain a JSON payload".to_string())
    })?;
    let value: Value = serde_json::from_str(&payload)
        .map_err(|e| AppError::PlanGeneration(format!("plan is not valid JSON: {e}")))?;

    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("files") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(AppError::PlanGeneration(
                    "plan has no \"files\" list".to_string(),
                ))
            }
        },
        _ => {
            return Err(AppError::PlanGeneration(
                "plan is neither an object nor a list".to_string(),
            ))
        }
    };

    let mut entries = Vec::with_capacity(items.len());
    for item in items {
        match serde_json::from_value::<PlanEntry>(item) {
            Ok(entry) => entries.push(entry),
            Err(err) => tracing::warn!(error = %err, "skipping malformed plan entry"),
        }
    }
    Ok(entries)
}

fn clean_relative(path: &str) -> String {
    let normalized = scope_path::normalize(path);
    let mut rest = normalized.as_str();
    loop {
        if let Some(stripped) = rest.strip_prefix("./") {
            rest = stripped;
        } else if let Some(stripped) = rest.strip_prefix('/') {
            rest = stripped;
        } else {
            break;
        }
    }
    rest.to_string()
}

fn sanitize_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    let mut last_underscore = false;
    for ch in segment.chars().flat_map(char::to_lowercase) {
        let mapped = if ch.is_ascii_alphanumeric() || ch == '-' { ch } else { '_' };
        if mapped == '_' {
            if last_underscore {
                continue;
            }
            last_underscore = true;
        } else {
            last_underscore = false;
        }
        out.push(mapped);
    }
    out.trim_matches('_').to_string()
}

fn sanitize_file_name(name: &str) -> Option<String> {
    let (stem, ext) = match name.rfind('.') {
        Some(idx) if idx > 0 => (&name[..idx], Some(&name[idx + 1..])),
        _ => (name, None),
    };
    let stem = sanitize_segment(stem);
    if stem.is_empty() {
        return None;
    }
    match ext.map(sanitize_segment).filter(|ext| !ext.is_empty()) {
        Some(ext) => Some(format!("{stem}.{ext}")),
        None => Some(stem),
    }
}

/// Lowercase, underscore-separated form of a model destination, or `None`
/// when it climbs out of the root or has nothing left.
pub fn sanitize_destination(destination: &str) -> Option<String> {
    let cleaned = clean_relative(destination);
    let segments: Vec<&str> = cleaned.split('/').filter(|s| !s.is_empty() && *s != ".").collect();
    let (file_name, dirs) = segments.split_last()?;
    if segments.contains(&"..") {
        return None;
    }

    let mut parts = Vec::with_capacity(segments.len());
    for dir in dirs {
        let dir = sanitize_segment(dir);
        if dir.is_empty() {
            return None;
        }
        parts.push(dir);
    }
    parts.push(sanitize_file_name(file_name)?);
    Some(parts.join("/"))
}

/// Turns model entries into one proposal per summarized file. Files the model
/// skipped, destinations already claimed by an earlier entry or by a file
/// left in place, and destinations that cannot be sanitized all stay at
/// their source path. Every destination in the result is distinct.
pub fn reconcile(entries: Vec<PlanEntry>, summaries: &[SummaryRecord]) -> Vec<MoveProposal> {
    let submitted: HashSet<&str> = summaries
        .iter()
        .filter(|record| !record.is_error())
        .map(|record| record.source_path.as_str())
        .collect();

    let mut chosen: HashMap<String, String> = HashMap::new();
    let mut claimed: HashSet<String> = HashSet::new();
    for entry in entries {
        let src = clean_relative(&entry.src_path);
        if !submitted.contains(src.as_str()) {
            tracing::warn!(src = %entry.src_path, "plan names a file that was not submitted");
            continue;
        }
        if chosen.contains_key(&src) {
            continue;
        }
        let destination = if clean_relative(&entry.dst_path) == src {
            Some(src.clone())
        } else {
            sanitize_destination(&entry.dst_path)
        };
        match destination {
            Some(dst) if claimed.insert(dst.clone()) => {
                chosen.insert(src, dst);
            }
            Some(dst) => {
                tracing::warn!(src = %src, dst = %dst, "destination already taken, leaving in place");
            }
            None => {
                tracing::warn!(src = %src, dst = %entry.dst_path, "unusable destination, leaving in place");
            }
        }
    }

    // A file left in place occupies its source path, which can displace a
    // model entry and leave that file in place too.
    loop {
        let staying: HashSet<&str> = submitted
            .iter()
            .copied()
            .filter(|src| chosen.get(*src).map_or(true, |dst| dst == src))
            .collect();
        let displaced: Vec<String> = chosen
            .iter()
            .filter(|(src, dst)| src != dst && staying.contains(dst.as_str()))
            .map(|(src, _)| src.clone())
            .collect();
        if displaced.is_empty() {
            break;
        }
        for src in displaced {
            if let Some(dst) = chosen.remove(&src) {
                tracing::warn!(src = %src, dst = %dst, "destination is a file left in place, leaving in place");
            }
        }
    }

    let mut proposals = Vec::with_capacity(submitted.len());
    for record in summaries.iter().filter(|record| !record.is_error()) {
        let destination = chosen
            .remove(&record.source_path)
            .unwrap_or_else(|| record.source_path.clone());
        let mut proposal = MoveProposal::new(record.source_path.clone(), destination);
        if let Some(summary) = record.summary_text() {
            proposal = proposal.with_summary(summary);
        }
        proposals.push(proposal);
    }
    proposals
}

/// Single request for the whole run. Only successful summaries are sent;
/// with none, the endpoint is not contacted.
pub async fn propose_plan(
    backend: &dyn InferenceBackend,
    model: &str,
    summaries: &[SummaryRecord],
) -> Result<Vec<MoveProposal>, AppError> {
    let successes = summaries.iter().filter(|record| !record.is_error()).count();
    if successes == 0 {
        return Ok(Vec::new());
    }

    tracing::info!(files = successes, model, "requesting reorganization plan");
    let request = build_plan_request(model, summaries)?;
    let raw = backend.chat(request).await?;
    let entries = parse_plan(&raw)?;
    tracing::info!(entries = entries.len(), "plan received");
    Ok(reconcile(entries, summaries))
}

#[derive(Default)]
struct TreeNode {
    children: BTreeMap<String, TreeNode>,
}

impl TreeNode {
    fn insert(&mut self, path: &str) {
        let mut node = self;
        for part in path.split('/').filter(|part| !part.is_empty()) {
            node = node.children.entry(part.to_string()).or_default();
        }
    }

    fn render_into(&self, prefix: &str, out: &mut String) {
        let count = self.children.len();
        for (idx, (name, child)) in self.children.iter().enumerate() {
            let last = idx + 1 == count;
            out.push_str(prefix);
            out.push_str(if last { "└── " } else { "├── " });
            out.push_str(name);
            out.push('\n');
            let next = format!("{prefix}{}", if last { "    " } else { "│   " });
            child.render_into(&next, out);
        }
    }
}

/// Box-drawing preview of where files would land.
pub fn render_tree<'a>(root_label: &str, paths: impl IntoIterator<Item = &'a str>) -> String {
    let mut root = TreeNode::default();
    for path in paths {
        root.insert(path);
    }
    let mut out = format!("{root_label}\n");
    root.render_into("", &mut out);
    out
}
