//! Two-phase write tools.
//!
//! `write_file_preview` and `apply_patch mode=preview` compute a unified
//! diff and content hashes without touching the workspace. The apply
//! variants recompute the preview and, when the caller supplied one,
//! require the `(path, diff, new_sha256)` triple to match before anything
//! is written. Writes are atomic (temp file + rename) and create parent
//! directories on demand.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use similar::TextDiff;

use super::{ToolError, ToolResult, ensure_workspace_root, resolve_workspace_path};

/// Result of a preview computation. The `(path, diff, new_sha256)` triple
/// is the part the apply-side match checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WritePreview {
    pub path: String,
    pub changed: bool,
    pub diff: String,
    pub old_sha256: String,
    pub new_sha256: String,
}

/// Hex-encoded SHA-256, the digest recorded for previews and artifacts.
pub fn sha256_hex(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

fn build_diff(before: &str, after: &str, relative_path: &str) -> String {
    TextDiff::from_lines(before, after)
        .unified_diff()
        .header(
            &format!("a/{relative_path}"),
            &format!("b/{relative_path}"),
        )
        .to_string()
}

fn build_preview(path: &str, before: &str, after: &str) -> WritePreview {
    WritePreview {
        path: path.to_string(),
        changed: before != after,
        diff: build_diff(before, after, path),
        old_sha256: sha256_hex(before),
        new_sha256: sha256_hex(after),
    }
}

fn read_text_if_exists(path: &Path) -> ToolResult<String> {
    if !path.exists() {
        return Ok(String::new());
    }
    Ok(std::fs::read_to_string(path)?)
}

fn validate_preview(provided: &Value, actual: &WritePreview) -> ToolResult<()> {
    let provided = provided.as_object().ok_or(ToolError::PreviewMismatch)?;
    let field = |key: &str| provided.get(key).and_then(Value::as_str);
    let matches = field("path") == Some(actual.path.as_str())
        && field("diff") == Some(actual.diff.as_str())
        && field("new_sha256") == Some(actual.new_sha256.as_str());
    if !matches {
        return Err(ToolError::PreviewMismatch);
    }
    Ok(())
}

fn atomic_write(target: &Path, content: &str) -> ToolResult<()> {
    let parent = target.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(content.as_bytes())?;
    tmp.persist(target).map_err(|e| ToolError::Io(e.error))?;
    Ok(())
}

fn applied_output(preview: &WritePreview) -> ToolResult<Value> {
    let mut output = serde_json::to_value(preview)
        .map_err(|e| ToolError::InvalidInput(e.to_string()))?;
    output
        .as_object_mut()
        .expect("preview serializes to an object")
        .insert("applied".to_string(), Value::Bool(true));
    Ok(output)
}

// ─────────────────────────────────────────────────────────────────────────────
// write_file_preview / write_file_apply
// ─────────────────────────────────────────────────────────────────────────────

fn compute_write_preview(
    workspace_root: &Path,
    path: &str,
    content: &str,
) -> ToolResult<(PathBuf, WritePreview)> {
    let root = ensure_workspace_root(workspace_root)?;
    let (target, canonical) = resolve_workspace_path(&root, path)?;
    let before = read_text_if_exists(&target)?;
    Ok((target, build_preview(&canonical, &before, content)))
}

pub fn write_file_preview(
    workspace_root: &Path,
    path: &str,
    content: &str,
) -> ToolResult<WritePreview> {
    let (_, preview) = compute_write_preview(workspace_root, path, content)?;
    Ok(preview)
}

pub fn write_file_apply(
    workspace_root: &Path,
    path: &str,
    content: &str,
    preview: Option<&Value>,
) -> ToolResult<Value> {
    let (target, actual) = compute_write_preview(workspace_root, path, content)?;
    if let Some(provided) = preview {
        validate_preview(provided, &actual)?;
    }
    atomic_write(&target, content)?;
    applied_output(&actual)
}

// ─────────────────────────────────────────────────────────────────────────────
// apply_patch
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchMode {
    Preview,
    Apply,
}

impl PatchMode {
    pub fn parse(raw: &str) -> ToolResult<Self> {
        match raw {
            "preview" => Ok(PatchMode::Preview),
            "apply" => Ok(PatchMode::Apply),
            _ => Err(ToolError::InvalidInput(
                "mode must be 'preview' or 'apply'".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone)]
struct Hunk {
    old_start: usize,
    lines: Vec<String>,
}

fn hunk_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^@@ -(\d+)(?:,\d+)? \+(\d+)(?:,\d+)? @@").unwrap())
}

fn normalize_patch_path(raw_label: &str) -> String {
    let token = raw_label
        .trim()
        .split('\t')
        .next()
        .unwrap_or_default()
        .split(' ')
        .next()
        .unwrap_or_default();
    token
        .strip_prefix("a/")
        .or_else(|| token.strip_prefix("b/"))
        .unwrap_or(token)
        .to_string()
}

/// Parse a single-file unified-diff patch into its target path and hunks.
/// Multi-file patches and file deletions are rejected.
fn parse_single_file_patch(patch: &str) -> ToolResult<(String, Vec<Hunk>)> {
    let lines: Vec<&str> = patch.lines().collect();
    if lines.is_empty() {
        return Err(ToolError::PatchFormat("patch is empty".to_string()));
    }

    let header_index = lines
        .iter()
        .position(|line| line.starts_with("--- "))
        .ok_or_else(|| ToolError::PatchFormat("patch must include ---/+++ headers".to_string()))?;
    let new_header = lines.get(header_index + 1).ok_or_else(|| {
        ToolError::PatchFormat("patch must include ---/+++ headers".to_string())
    })?;
    if !new_header.starts_with("+++ ") {
        return Err(ToolError::PatchFormat(
            "patch must include ---/+++ headers".to_string(),
        ));
    }

    let new_path = normalize_patch_path(&new_header[4..]);
    if new_path == "/dev/null" {
        return Err(ToolError::PatchFormat(
            "file deletion is not supported".to_string(),
        ));
    }
    if new_path.is_empty() {
        return Err(ToolError::PatchFormat(
            "patch target path is invalid".to_string(),
        ));
    }

    let mut hunks = Vec::new();
    let mut index = header_index + 2;
    while index < lines.len() {
        let line = lines[index];
        if line.starts_with("diff --git ") || line.starts_with("index ") {
            index += 1;
            continue;
        }
        if line.starts_with("--- ") {
            return Err(ToolError::PatchFormat(
                "multiple file patches are not supported".to_string(),
            ));
        }
        if !line.starts_with("@@ ") {
            index += 1;
            continue;
        }

        let captures = hunk_header_re()
            .captures(line)
            .ok_or_else(|| ToolError::PatchFormat(format!("invalid hunk header: {line}")))?;
        let old_start: usize = captures[1]
            .parse()
            .map_err(|_| ToolError::PatchFormat(format!("invalid hunk header: {line}")))?;
        index += 1;

        let mut hunk_lines = Vec::new();
        while index < lines.len() {
            let candidate = lines[index];
            if candidate.starts_with("@@ ") || candidate.starts_with("--- ") {
                break;
            }
            hunk_lines.push(candidate.to_string());
            index += 1;
        }
        hunks.push(Hunk {
            old_start,
            lines: hunk_lines,
        });
    }

    if hunks.is_empty() {
        return Err(ToolError::PatchFormat(
            "patch must include at least one hunk".to_string(),
        ));
    }
    Ok((new_path, hunks))
}

/// Apply hunks to `before`. Context and deletion lines must match the
/// current content verbatim.
fn apply_hunks(before: &str, hunks: &[Hunk]) -> ToolResult<String> {
    let old_lines: Vec<&str> = before.lines().collect();
    let mut result: Vec<String> = Vec::new();
    let mut cursor = 0usize;

    for hunk in hunks {
        let start_index = hunk.old_start.saturating_sub(1);
        if start_index < cursor || start_index > old_lines.len() {
            return Err(ToolError::PatchApply(
                "invalid hunk start position".to_string(),
            ));
        }
        result.extend(old_lines[cursor..start_index].iter().map(|l| l.to_string()));
        cursor = start_index;

        for raw_line in &hunk.lines {
            if raw_line.starts_with("\\ No newline at end of file") {
                continue;
            }
            if raw_line.is_empty() {
                return Err(ToolError::PatchApply("invalid hunk line".to_string()));
            }

            let op = raw_line.chars().next().expect("hunk line is non-empty");
            let text = &raw_line[op.len_utf8()..];
            match op {
                ' ' => {
                    if cursor >= old_lines.len() || old_lines[cursor] != text {
                        return Err(ToolError::PatchApply(
                            "context line does not match current content".to_string(),
                        ));
                    }
                    result.push(text.to_string());
                    cursor += 1;
                }
                '-' => {
                    if cursor >= old_lines.len() || old_lines[cursor] != text {
                        return Err(ToolError::PatchApply(
                            "deletion line does not match current content".to_string(),
                        ));
                    }
                    cursor += 1;
                }
                '+' => result.push(text.to_string()),
                other => {
                    return Err(ToolError::PatchApply(format!(
                        "unsupported hunk operation: {other}"
                    )));
                }
            }
        }
    }

    result.extend(old_lines[cursor..].iter().map(|l| l.to_string()));
    let mut after = result.join("\n");
    if before.ends_with('\n') && !after.is_empty() && !after.ends_with('\n') {
        after.push('\n');
    }
    Ok(after)
}

fn compute_patch_preview(
    workspace_root: &Path,
    patch: &str,
) -> ToolResult<(PathBuf, String, WritePreview)> {
    let (patch_path, hunks) = parse_single_file_patch(patch)?;
    let root = ensure_workspace_root(workspace_root)?;
    let (target, canonical) = resolve_workspace_path(&root, &patch_path)?;
    let before = read_text_if_exists(&target)?;
    let after = apply_hunks(&before, &hunks)?;
    let preview = build_preview(&canonical, &before, &after);
    Ok((target, after, preview))
}

pub fn apply_patch(
    workspace_root: &Path,
    patch: &str,
    mode: PatchMode,
    preview: Option<&Value>,
) -> ToolResult<Value> {
    let (target, after, actual) = compute_patch_preview(workspace_root, patch)?;
    if mode == PatchMode::Preview {
        return serde_json::to_value(&actual).map_err(|e| ToolError::InvalidInput(e.to_string()));
    }

    if let Some(provided) = preview {
        validate_preview(provided, &actual)?;
    }
    atomic_write(&target, &after)?;
    applied_output(&actual)
}
