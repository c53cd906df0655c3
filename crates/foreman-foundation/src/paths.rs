//! On-disk layout.
//!
//! ```text
//! <project_root>/
//!   <data_root>/                      (default: sibling `data/` of the DB file)
//!     sessions/<session_id>/workspace/   tool sandbox
//!     sessions/<session_id>/artifacts/   run_<run_id>_<N>_<safe_name>
//! ```
//!
//! Artifact paths recorded in the database are relative to the project
//! root, one level above `data_root`.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct DataPaths {
    project_root: PathBuf,
    data_root: PathBuf,
}

impl DataPaths {
    pub fn new(data_root: PathBuf) -> Self {
        let project_root = data_root
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            project_root,
            data_root,
        }
    }

    /// Resolve the data root from the daemon's boot configuration: an
    /// explicit `--data-root`, or a `data/` directory next to the DB file.
    pub fn from_db_path(db_path: &Path, data_root: Option<PathBuf>) -> Self {
        let data_root = data_root.unwrap_or_else(|| {
            db_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."))
                .join("data")
        });
        Self::new(data_root)
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn session_workspace(&self, session_id: &str) -> PathBuf {
        self.data_root
            .join("sessions")
            .join(session_id)
            .join("workspace")
    }

    pub fn session_artifacts(&self, session_id: &str) -> PathBuf {
        self.data_root
            .join("sessions")
            .join(session_id)
            .join("artifacts")
    }

    pub fn ensure_session_dirs(&self, session_id: &str) -> std::io::Result<()> {
        std::fs::create_dir_all(self.session_workspace(session_id))?;
        std::fs::create_dir_all(self.session_artifacts(session_id))?;
        Ok(())
    }

    /// Artifact file location for the `index`-th artifact of a run.
    /// Re-runs get fresh run ids, so files are written exactly once.
    pub fn artifact_file(
        &self,
        session_id: &str,
        run_id: i64,
        index: usize,
        name: &str,
    ) -> PathBuf {
        self.session_artifacts(session_id)
            .join(format!("run_{run_id}_{index}_{}", sanitize_name(name)))
    }

    /// Project-root-relative form of a path under this layout, with
    /// forward slashes; this is the canonical form recorded in the database.
    pub fn relative_to_project(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.project_root).unwrap_or(path);
        relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
