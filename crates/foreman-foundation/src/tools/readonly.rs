//! Readonly workspace tools: file read, directory listing, and the
//! allowlisted shell.

use std::io::Read;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::{ToolError, ToolResult, ensure_workspace_root, resolve_workspace_path};

/// Hard ceiling on the shell tool's own timeout input.
pub const SHELL_TIMEOUT_SEC_MAX: u64 = 30;

/// Token prefixes a shell command must start with to be accepted.
pub const ALLOWLIST_COMMAND_PREFIXES: &[&[&str]] = &[
    &["ls"],
    &["cat"],
    &["rg"],
    &["find"],
    &["git", "status"],
    &["git", "diff"],
    &["python", "-m", "pytest", "-q"],
];

// ─────────────────────────────────────────────────────────────────────────────
// read_file
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ReadFileInput {
    pub workspace_root: String,
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct ReadFileOutput {
    pub path: String,
    pub content: String,
}

pub fn read_file(params: ReadFileInput) -> ToolResult<ReadFileOutput> {
    if params.path.is_empty() {
        return Err(ToolError::InvalidInput("path must not be empty".to_string()));
    }
    let root = ensure_workspace_root(std::path::Path::new(&params.workspace_root))?;
    let (target, _) = resolve_workspace_path(&root, &params.path)?;
    let content = std::fs::read_to_string(&target)?;
    Ok(ReadFileOutput {
        path: params.path,
        content,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// list_dir
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListDirInput {
    pub workspace_root: String,
    #[serde(default = "default_list_path")]
    pub path: String,
}

fn default_list_path() -> String {
    ".".to_string()
}

#[derive(Debug, Serialize)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

#[derive(Debug, Serialize)]
pub struct ListDirOutput {
    pub path: String,
    pub entries: Vec<DirEntry>,
}

pub fn list_dir(params: ListDirInput) -> ToolResult<ListDirOutput> {
    let root = ensure_workspace_root(std::path::Path::new(&params.workspace_root))?;
    let (target, _) = resolve_workspace_path(&root, &params.path)?;
    if !target.is_dir() {
        return Err(ToolError::InvalidInput(
            "target path is not a directory".to_string(),
        ));
    }

    let mut entries = Vec::new();
    for entry in std::fs::read_dir(&target)? {
        let entry = entry?;
        entries.push(DirEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            is_dir: entry.file_type()?.is_dir(),
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(ListDirOutput {
        path: params.path,
        entries,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// run_shell_readonly
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RunShellReadonlyInput {
    pub workspace_root: String,
    pub command: String,
    #[serde(default = "default_shell_timeout")]
    pub timeout_sec: u64,
}

fn default_shell_timeout() -> u64 {
    SHELL_TIMEOUT_SEC_MAX
}

#[derive(Debug, Serialize)]
pub struct RunShellReadonlyOutput {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

fn tokens_match_allowlist(tokens: &[String]) -> bool {
    ALLOWLIST_COMMAND_PREFIXES.iter().any(|prefix| {
        tokens.len() >= prefix.len()
            && prefix
                .iter()
                .zip(tokens.iter())
                .all(|(expected, actual)| actual.as_str() == *expected)
    })
}

/// Whether a raw command string would pass the allowlist.
pub fn is_allowlisted_command(command: &str) -> bool {
    match shell_words::split(command) {
        Ok(tokens) => !tokens.is_empty() && tokens_match_allowlist(&tokens),
        Err(_) => false,
    }
}

fn parse_allowlisted_command(command: &str) -> ToolResult<Vec<String>> {
    let tokens = shell_words::split(command)
        .map_err(|_| ToolError::InvalidInput("command could not be parsed".to_string()))?;
    if tokens.is_empty() {
        return Err(ToolError::InvalidInput("command must not be empty".to_string()));
    }
    if !tokens_match_allowlist(&tokens) {
        return Err(ToolError::NotAllowlisted(command.to_string()));
    }
    Ok(tokens)
}

pub fn run_shell_readonly(params: RunShellReadonlyInput) -> ToolResult<RunShellReadonlyOutput> {
    if params.command.is_empty() {
        return Err(ToolError::InvalidInput("command must not be empty".to_string()));
    }
    if params.timeout_sec == 0 || params.timeout_sec > SHELL_TIMEOUT_SEC_MAX {
        return Err(ToolError::InvalidInput(format!(
            "timeout_sec must be between 1 and {SHELL_TIMEOUT_SEC_MAX}"
        )));
    }
    let root = ensure_workspace_root(std::path::Path::new(&params.workspace_root))?;
    let tokens = parse_allowlisted_command(&params.command)?;

    let mut child = Command::new(&tokens[0])
        .args(&tokens[1..])
        .current_dir(&root)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let deadline = Instant::now() + Duration::from_secs(params.timeout_sec);
    loop {
        if child.try_wait()?.is_some() {
            break;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ToolError::CommandTimeout(params.timeout_sec));
        }
        std::thread::sleep(Duration::from_millis(25));
    }

    let exit_code = child.try_wait()?.and_then(|s| s.code()).unwrap_or(-1);
    let mut stdout = String::new();
    let mut stderr = String::new();
    if let Some(mut pipe) = child.stdout.take() {
        pipe.read_to_string(&mut stdout)?;
    }
    if let Some(mut pipe) = child.stderr.take() {
        pipe.read_to_string(&mut stderr)?;
    }

    Ok(RunShellReadonlyOutput {
        command: params.command,
        exit_code,
        stdout,
        stderr,
    })
}
