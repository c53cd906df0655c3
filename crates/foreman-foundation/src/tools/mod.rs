//! The closed tool set.
//!
//! Tools are a table lookup, not a trait object zoo: [`dispatch`] maps a
//! registered name onto its concrete handler. Handlers are synchronous;
//! the executor runs them on a blocking worker under a wall-clock timeout.
//! Every handler error becomes a `failed` run, never an HTTP error.

use std::path::{Component, Path, PathBuf};

use serde_json::{Map, Value};
use thiserror::Error;

pub mod readonly;
pub mod write_ops;

/// Registry seed: `(tool_name, permission_profile, description)`.
pub const DEFAULT_TOOLS: &[(&str, &str, &str)] = &[
    ("read_file", "workspace_read", "Read a file from session workspace."),
    ("list_dir", "workspace_read", "List files in session workspace."),
    (
        "run_shell_readonly",
        "shell_readonly",
        "Run allowlisted readonly shell commands.",
    ),
    ("write_file_preview", "workspace_write_preview", "Preview file write."),
    ("write_file_apply", "workspace_write_apply", "Apply file write."),
    ("apply_patch", "workspace_patch", "Apply patch in preview/apply mode."),
];

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("missing required input: {0}")]
    MissingInput(&'static str),

    #[error("{0}")]
    InvalidInput(String),

    #[error("path '{path}' is outside workspace '{root}'")]
    WorkspaceBoundary { path: String, root: String },

    #[error("command is not allowlisted: {0}")]
    NotAllowlisted(String),

    #[error("provided preview does not match current file state")]
    PreviewMismatch,

    #[error("{0}")]
    PatchFormat(String),

    #[error("{0}")]
    PatchApply(String),

    #[error("command timed out after {0}s")]
    CommandTimeout(u64),

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

pub type ToolResult<T> = Result<T, ToolError>;

/// Invoke a tool by name with JSON-shaped inputs. `timeout_sec` is the
/// executor's wall-clock budget; only the shell tool consumes it directly.
pub fn dispatch(tool: &str, mut inputs: Map<String, Value>, timeout_sec: u64) -> ToolResult<Value> {
    match tool {
        "read_file" => to_output(readonly::read_file(parse_inputs(inputs)?)?),
        "list_dir" => to_output(readonly::list_dir(parse_inputs(inputs)?)?),
        "run_shell_readonly" => {
            // Forward the bounded budget unless the step already pinned one.
            inputs
                .entry("timeout_sec".to_string())
                .or_insert_with(|| Value::from(timeout_sec.min(readonly::SHELL_TIMEOUT_SEC_MAX)));
            to_output(readonly::run_shell_readonly(parse_inputs(inputs)?)?)
        }
        "write_file_preview" => {
            let root = require_str(&inputs, "workspace_root")?;
            let path = require_str(&inputs, "path")?;
            let content = require_str(&inputs, "content")?;
            to_output(write_ops::write_file_preview(Path::new(root), path, content)?)
        }
        "write_file_apply" => {
            let root = require_str(&inputs, "workspace_root")?.to_string();
            let path = require_str(&inputs, "path")?.to_string();
            let content = require_str(&inputs, "content")?.to_string();
            let preview = inputs.get("preview").cloned();
            write_ops::write_file_apply(
                Path::new(&root),
                &path,
                &content,
                preview.as_ref(),
            )
        }
        "apply_patch" => {
            let root = require_str(&inputs, "workspace_root")?.to_string();
            let patch = require_str(&inputs, "patch")?.to_string();
            let mode = write_ops::PatchMode::parse(require_str(&inputs, "mode")?)?;
            let preview = inputs.get("preview").cloned();
            write_ops::apply_patch(Path::new(&root), &patch, mode, preview.as_ref())
        }
        other => Err(ToolError::UnknownTool(other.to_string())),
    }
}

fn parse_inputs<T: serde::de::DeserializeOwned>(inputs: Map<String, Value>) -> ToolResult<T> {
    serde_json::from_value(Value::Object(inputs))
        .map_err(|e| ToolError::InvalidInput(e.to_string()))
}

fn to_output<T: serde::Serialize>(output: T) -> ToolResult<Value> {
    serde_json::to_value(output).map_err(|e| ToolError::InvalidInput(e.to_string()))
}

fn require_str<'a>(inputs: &'a Map<String, Value>, key: &'static str) -> ToolResult<&'a str> {
    inputs
        .get(key)
        .ok_or(ToolError::MissingInput(key))?
        .as_str()
        .ok_or_else(|| ToolError::InvalidInput(format!("input '{key}' must be a string")))
}

// ─────────────────────────────────────────────────────────────────────────────
// Workspace boundary
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) fn ensure_workspace_root(root: &Path) -> ToolResult<PathBuf> {
    if !root.is_dir() {
        return Err(ToolError::InvalidInput(
            "workspace_root must be an existing directory".to_string(),
        ));
    }
    Ok(root.canonicalize()?)
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Resolve `relative` against a canonicalized workspace root. Rejects
/// `..` escapes, absolute paths outside the root, and symlinked ancestors
/// that lead out of the workspace. Returns the absolute target and the
/// canonical workspace-relative path (forward slashes).
pub(crate) fn resolve_workspace_path(
    root: &Path,
    relative: &str,
) -> ToolResult<(PathBuf, String)> {
    let boundary_error = || ToolError::WorkspaceBoundary {
        path: relative.to_string(),
        root: root.display().to_string(),
    };

    let target = normalize_lexically(&root.join(relative));
    if !target.starts_with(root) {
        return Err(boundary_error());
    }

    // Symlinks in already-existing ancestors can still point outside the
    // root; canonicalize the deepest existing ancestor and re-check.
    let mut existing = target.clone();
    while !existing.exists() {
        match existing.parent() {
            Some(parent) => existing = parent.to_path_buf(),
            None => break,
        }
    }
    if existing.exists() && !existing.canonicalize()?.starts_with(root) {
        return Err(boundary_error());
    }

    let canonical = target
        .strip_prefix(root)
        .map_err(|_| boundary_error())?
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/");
    Ok((target, canonical))
}
