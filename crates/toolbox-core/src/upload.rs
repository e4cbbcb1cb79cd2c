//! Upload materializer: per-job temp directory and sanitized input files.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

use crate::error::{EngineError, format_bytes};

const MAX_NAME_LEN: usize = 120;
const FALLBACK_NAME: &str = "input.bin";

/// One multipart file part, held in memory until the job is admitted.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub original_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

impl UploadedFile {
    pub fn new(
        original_name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        Self {
            original_name: original_name.into(),
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// An uploaded file after it has been written into the job's input directory.
#[derive(Debug, Clone)]
pub struct MaterializedInput {
    pub path: PathBuf,
    pub original_name: String,
    pub content_type: String,
    pub size: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct UploadLimits {
    pub max_files: usize,
    pub max_file_bytes: u64,
}

impl UploadLimits {
    /// Count and per-file size checks. An empty list is left to the caller,
    /// since not every tool needs an upload.
    pub fn check(&self, files: &[UploadedFile]) -> Result<(), EngineError> {
        if files.len() > self.max_files {
            return Err(EngineError::too_large(format!(
                "Too many files: {} (max {}).",
                files.len(),
                self.max_files
            )));
        }
        if let Some(file) = files.iter().find(|f| f.size() > self.max_file_bytes) {
            return Err(EngineError::too_large(format!(
                "File too large: {} is {} (max {}).",
                sanitize_file_name(&file.original_name),
                format_bytes(file.size()),
                format_bytes(self.max_file_bytes)
            )));
        }
        Ok(())
    }
}

/// Reduce a client-supplied file name to `[A-Za-z0-9._-]`, at most 120 bytes.
///
/// Path separators and `..` sequences become `_` before anything else, so
/// the result is always a single path component.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect::<String>()
        .replace("..", "_")
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_NAME_LEN)
        .collect();

    if cleaned.is_empty() || cleaned == "." {
        FALLBACK_NAME.to_owned()
    } else {
        cleaned
    }
}

/// The job's private directory tree: `<root>/in` for uploads, `<root>/out`
/// for artifacts, plus whatever scratch space the converters need.
///
/// The root is created with a random name by [`tempfile`], so no two jobs
/// share it and its path cannot be predicted. It is removed by
/// [`Self::close`], or by `Drop` if the job future is abandoned.
#[derive(Debug)]
pub struct JobWorkspace {
    job_id: Uuid,
    dir: TempDir,
    input_dir: PathBuf,
    output_dir: PathBuf,
}

impl JobWorkspace {
    pub fn create_in(temp_root: &Path, job_id: Uuid) -> Result<Self, EngineError> {
        let dir = tempfile::Builder::new()
            .prefix("toolbox-")
            .tempdir_in(temp_root)?;
        let input_dir = dir.path().join("in");
        let output_dir = dir.path().join("out");
        std::fs::create_dir(&input_dir)?;
        std::fs::create_dir(&output_dir)?;
        debug!(job_id = %job_id, root = %dir.path().display(), "created job workspace");
        Ok(Self {
            job_id,
            dir,
            input_dir,
            output_dir,
        })
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn input_dir(&self) -> &Path {
        &self.input_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Write every upload into `in/` under a sanitized, de-duplicated name,
    /// preserving upload order.
    pub async fn materialize(
        &self,
        files: &[UploadedFile],
    ) -> Result<Vec<MaterializedInput>, EngineError> {
        let mut used = HashSet::new();
        let mut out = Vec::with_capacity(files.len());
        for file in files {
            let name = unique_name(&sanitize_file_name(&file.original_name), &mut used);
            let path = self.input_dir.join(&name);
            if path.parent() != Some(self.input_dir.as_path()) {
                return Err(EngineError::validation("Invalid file name."));
            }

            let mut handle = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await?;
            handle.write_all(&file.bytes).await?;
            handle.flush().await?;

            out.push(MaterializedInput {
                path,
                original_name: file.original_name.clone(),
                content_type: file.content_type.clone(),
                size: file.size(),
            });
        }
        Ok(out)
    }

    /// Remove the whole tree now, surfacing any failure to the caller.
    pub fn close(self) -> io::Result<()> {
        self.dir.close()
    }
}

fn unique_name(name: &str, used: &mut HashSet<String>) -> String {
    if used.insert(name.to_owned()) {
        return name.to_owned();
    }
    let (stem, ext) = match name.rfind('.') {
        Some(idx) if idx > 0 => (&name[..idx], &name[idx..]),
        _ => (name, ""),
    };
    let mut n = 1;
    loop {
        let candidate = format!("{stem}-{n}{ext}");
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}
