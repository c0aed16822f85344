//! Per-job staging directories.
//!
//! Layout under the storage root:
//!
//! ```text
//! <root>/<job_id>/input/<file_name>
//! <root>/<job_id>/output/<artifact>
//! ```

use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> StorageError + '_ {
    move |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Clone)]
pub struct JobStorage {
    root: PathBuf,
}

impl JobStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.root.join(job_id)
    }

    pub fn input_dir(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id).join("input")
    }

    pub fn output_dir(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id).join("output")
    }

    pub fn output_path(&self, job_id: &str, file_name: &str) -> PathBuf {
        self.output_dir(job_id).join(file_name)
    }

    /// Write the accepted payload and create the output directory.
    ///
    /// `file_name` must already be sanitized to a bare name.
    pub async fn stage_input(
        &self,
        job_id: &str,
        file_name: &str,
        payload: &[u8],
    ) -> Result<PathBuf, StorageError> {
        let input_dir = self.input_dir(job_id);
        let output_dir = self.output_dir(job_id);
        tokio::fs::create_dir_all(&input_dir)
            .await
            .map_err(io_err(&input_dir))?;
        tokio::fs::create_dir_all(&output_dir)
            .await
            .map_err(io_err(&output_dir))?;

        let path = input_dir.join(file_name);
        tokio::fs::write(&path, payload).await.map_err(io_err(&path))?;

        tracing::debug!(job_id, path = %path.display(), bytes = payload.len(), "Staged input file");
        Ok(path)
    }

    /// Delete everything stored for a job. Missing directories are fine.
    pub async fn remove(&self, job_id: &str) -> Result<bool, StorageError> {
        let dir = self.job_dir(job_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_err(&dir)(e)),
        }
    }
}
