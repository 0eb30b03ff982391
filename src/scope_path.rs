use std::path::{Component, Path, PathBuf};

use crate::error::MoveError;

pub fn normalize(path: &str) -> String {
    let mut normalized = path.trim().replace('\\', "/");
    while normalized.ends_with('/') && normalized.len() > 1 {
        normalized.pop();
    }
    normalized
}

pub fn is_within_scope(path: &str, root: &str) -> bool {
    let path = normalize(path);
    let root = normalize(root);

    if path == root {
        return true;
    }

    if root == "/" {
        return path.starts_with('/');
    }

    if cfg!(windows) {
        let path_lower = path.to_ascii_lowercase();
        let root_lower = root.to_ascii_lowercase();
        return path_lower.starts_with(&(root_lower + "/"));
    }

    path.starts_with(&(root + "/"))
}

/// Relative, `/`-separated form of `absolute` under `root`.
pub fn relative_to(root: &Path, absolute: &Path) -> Option<String> {
    let rel = absolute.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().to_string()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Resolves a user- or model-supplied destination against `root`, refusing
/// anything that would land outside it. Absolute paths are accepted only when
/// they already sit under `root`.
pub fn resolve_within(root: &Path, destination: &str) -> Result<PathBuf, MoveError> {
    let outside = || MoveError::OutsideRoot {
        destination: destination.to_string(),
    };

    let normalized = normalize(destination);
    let root_text = normalize(&root.to_string_lossy());
    let relative = if normalized.starts_with('/') && is_within_scope(&normalized, &root_text) {
        normalized[root_text.len()..].to_string()
    } else {
        normalized
    };
    let relative = relative.trim_start_matches("./").trim_start_matches('/');

    let mut segments = Vec::new();
    for segment in relative.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(outside()),
            part if part.contains(':') && cfg!(windows) => return Err(outside()),
            part => segments.push(part),
        }
    }
    if segments.is_empty() {
        return Err(outside());
    }

    let mut resolved = root.to_path_buf();
    for segment in segments {
        resolved.push(segment);
    }
    Ok(resolved)
}
