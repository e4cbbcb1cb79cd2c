//! Per-tool conversion backends.
//!
//! Each native program gets one [`Converter`] implementation that turns a
//! [`ConversionContext`] into a [`ConvertedArtifact`] inside the job's output
//! directory. The engine only talks to the trait, so admission, validation
//! and error mapping do not know which binary did the work.

pub mod chromium;
pub mod ghostscript;
pub mod office;
pub mod qpdf;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{EngineError, FailureKind};
use crate::exec::classify::{Advisory, check_outcome};
use crate::exec::{CommandRunner, CommandSpec};
use crate::tool::{JobOptions, ToolId};
use crate::upload::{JobWorkspace, MaterializedInput};

pub use chromium::{ChromiumConverter, validate_target_url};
pub use ghostscript::GhostscriptConverter;
pub use office::OfficeConverter;
pub use qpdf::QpdfConverter;

/// Everything a converter may touch while running one job.
pub struct ConversionContext<'a> {
    pub job_id: Uuid,
    pub tool: ToolId,
    pub options: &'a JobOptions,
    pub inputs: &'a [MaterializedInput],
    pub workspace: &'a JobWorkspace,
    pub runner: &'a dyn CommandRunner,
    pub timeout: Duration,
    pub hardened: bool,
}

impl ConversionContext<'_> {
    /// The first upload; single-input tools operate on it alone.
    pub fn primary_input(&self) -> Result<&MaterializedInput, EngineError> {
        self.inputs
            .first()
            .ok_or_else(|| EngineError::validation("No files provided."))
    }

    pub fn output_path(&self, file_name: &str) -> PathBuf {
        self.workspace.output_dir().join(file_name)
    }

    /// Run one command and classify its outcome.
    pub async fn execute(&self, spec: &CommandSpec) -> Result<Option<Advisory>, EngineError> {
        info!(job_id = %self.job_id, tool = %self.tool, command = %spec, "running");
        let output = self.runner.run(spec, self.timeout).await?;
        check_outcome(spec, &output)
    }

    /// Confirm that `program` left a regular file at `path`.
    pub async fn expect_output(
        &self,
        program: &'static str,
        path: PathBuf,
        advisory: Option<Advisory>,
    ) -> Result<ConvertedArtifact, EngineError> {
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(ConvertedArtifact { path, advisory }),
            _ => {
                warn!(job_id = %self.job_id, program, path = %path.display(), "command produced no output");
                Err(EngineError::Execution {
                    kind: FailureKind::Generic,
                    program,
                })
            }
        }
    }
}

/// The produced file, still inside the job's workspace.
#[derive(Debug, Clone)]
pub struct ConvertedArtifact {
    pub path: PathBuf,
    pub advisory: Option<Advisory>,
}

impl ConvertedArtifact {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output.bin".to_owned())
    }

    pub fn content_type(&self) -> &'static str {
        guess_mime(&self.path)
    }
}

/// Content type from the file extension.
pub fn guess_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("pdf") => "application/pdf",
        Some("docx") => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        Some("pptx") => {
            "application/vnd.openxmlformats-officedocument.presentationml.presentation"
        }
        Some("xlsx") => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        _ => "application/octet-stream",
    }
}

#[async_trait]
pub trait Converter: Send + Sync {
    /// Tools this backend handles.
    fn tools(&self) -> &'static [ToolId];

    /// Option checks that must pass before a slot is taken or disk touched.
    fn preflight(&self, _tool: ToolId, _options: &JobOptions, _hardened: bool) -> Result<(), EngineError> {
        Ok(())
    }

    async fn convert(&self, ctx: &ConversionContext<'_>) -> Result<ConvertedArtifact, EngineError>;
}

/// Tool id → backend lookup.
#[derive(Clone, Default)]
pub struct ConverterRegistry {
    by_tool: HashMap<ToolId, Arc<dyn Converter>>,
}

impl ConverterRegistry {
    /// LibreOffice, Ghostscript, qpdf and Chromium backends.
    pub fn standard() -> Self {
        let mut registry = Self::default();
        registry.register(Arc::new(OfficeConverter));
        registry.register(Arc::new(GhostscriptConverter));
        registry.register(Arc::new(QpdfConverter));
        registry.register(Arc::new(ChromiumConverter));
        registry
    }

    /// Later registrations replace earlier ones for the same tool.
    pub fn register(&mut self, converter: Arc<dyn Converter>) {
        for tool in converter.tools() {
            self.by_tool.insert(*tool, Arc::clone(&converter));
        }
    }

    pub fn get(&self, tool: ToolId) -> Result<&dyn Converter, EngineError> {
        self.by_tool
            .get(&tool)
            .map(|c| c.as_ref())
            .ok_or_else(|| EngineError::validation(format!("Tool not implemented: {tool}.")))
    }
}

#[cfg(test)]
mod test {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn standard_registry_covers_every_tool() {
        let registry = ConverterRegistry::standard();
        for tool in ToolId::iter() {
            assert!(registry.get(tool).is_ok(), "{tool} has no converter");
        }
    }

    #[test]
    fn empty_registry_rejects_tool() {
        let err = ConverterRegistry::default()
            .get(ToolId::RepairPdf)
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn mime_follows_extension() {
        assert_eq!(guess_mime(Path::new("/x/out.PDF")), "application/pdf");
        assert!(guess_mime(Path::new("a.docx")).contains("wordprocessingml"));
        assert!(guess_mime(Path::new("a.pptx")).contains("presentationml"));
        assert!(guess_mime(Path::new("a.xlsx")).contains("spreadsheetml"));
        assert_eq!(guess_mime(Path::new("a.odt")), "application/octet-stream");
        assert_eq!(guess_mime(Path::new("noext")), "application/octet-stream");
    }

    #[test]
    fn artifact_reports_base_name() {
        let artifact = ConvertedArtifact {
            path: PathBuf::from("/tmp/toolbox-x/out/deck.pdf"),
            advisory: None,
        };
        assert_eq!(artifact.file_name(), "deck.pdf");
        assert_eq!(artifact.content_type(), "application/pdf");
    }
}
