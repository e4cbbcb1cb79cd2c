//! The job pipeline: validate → admit → probe → materialize → convert →
//! validate output → read artifact → clean up → release.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::Serialize;
use strum::IntoEnumIterator;
use tracing::{info, warn};
use uuid::Uuid;

use crate::admission::AdmissionController;
use crate::convert::{ConversionContext, ConverterRegistry};
use crate::error::{EngineError, format_bytes};
use crate::exec::classify::Advisory;
use crate::exec::{CommandRunner, ProcessRunner};
use crate::probe::{BinaryProbe, ShellProbe, ensure_dependencies};
use crate::tool::{JobOptions, ToolId};
use crate::upload::{JobWorkspace, UploadLimits, UploadedFile};
use crate::validate::validate_pptx_conversion;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Parent of every per-job temp directory.
    pub temp_root: PathBuf,
    pub timeout: Duration,
    pub limits: UploadLimits,
    /// Cap on the summed upload size for PowerPoint → PDF.
    pub pptx_max_bytes: u64,
    pub max_concurrent: usize,
    /// Enables SSRF checks for HTML → PDF targets.
    pub hardened: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            temp_root: std::env::temp_dir(),
            timeout: Duration::from_millis(120_000),
            limits: UploadLimits {
                max_files: 20,
                max_file_bytes: 1024 * 1024 * 1024,
            },
            pptx_max_bytes: 200 * 1024 * 1024,
            max_concurrent: 2,
            hardened: true,
        }
    }
}

/// One conversion request, fully received but not yet admitted.
#[derive(Debug)]
pub struct ConversionJob {
    pub id: Uuid,
    pub tool: ToolId,
    pub options: JobOptions,
    pub files: Vec<UploadedFile>,
}

impl ConversionJob {
    pub fn new(tool: ToolId, options: JobOptions, files: Vec<UploadedFile>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tool,
            options,
            files,
        }
    }

    fn total_bytes(&self) -> u64 {
        self.files.iter().map(UploadedFile::size).sum()
    }
}

/// The artifact, read into memory before its directory was removed.
#[derive(Debug, Clone)]
pub struct JobOutput {
    pub job_id: Uuid,
    pub bytes: Bytes,
    pub file_name: String,
    pub content_type: &'static str,
    pub advisory: Option<Advisory>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BinaryStatus {
    pub name: &'static str,
    pub available: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCapability {
    pub tool: ToolId,
    pub output_extension: &'static str,
    pub binaries: Vec<BinaryStatus>,
    pub available: bool,
}

pub struct Engine {
    settings: EngineSettings,
    admission: AdmissionController,
    runner: Arc<dyn CommandRunner>,
    probe: Arc<dyn BinaryProbe>,
    registry: ConverterRegistry,
}

impl Engine {
    /// Engine that spawns real processes and probes the real `PATH`.
    pub fn new(settings: EngineSettings) -> Self {
        Self::with_backends(settings, Arc::new(ProcessRunner), Arc::new(ShellProbe))
    }

    pub fn with_backends(
        settings: EngineSettings,
        runner: Arc<dyn CommandRunner>,
        probe: Arc<dyn BinaryProbe>,
    ) -> Self {
        Self {
            admission: AdmissionController::new(settings.max_concurrent),
            settings,
            runner,
            probe,
            registry: ConverterRegistry::standard(),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    /// Checks that need no slot and no disk: upload limits and tool options.
    pub fn precheck(&self, job: &ConversionJob) -> Result<(), EngineError> {
        if job.files.is_empty() && job.tool.requires_upload() {
            return Err(EngineError::validation("No files provided."));
        }
        self.settings.limits.check(&job.files)?;
        if job.tool == ToolId::PowerpointToPdf && job.total_bytes() > self.settings.pptx_max_bytes {
            return Err(EngineError::too_large(format!(
                "PowerPoint upload too large: {} (max {}).",
                format_bytes(job.total_bytes()),
                format_bytes(self.settings.pptx_max_bytes)
            )));
        }
        self.registry
            .get(job.tool)?
            .preflight(job.tool, &job.options, self.settings.hardened)
    }

    /// Run a job end to end. The temp directory is gone and the admission
    /// slot released by the time this returns, on every path.
    pub async fn run(&self, job: ConversionJob) -> Result<JobOutput, EngineError> {
        self.precheck(&job)?;

        let queued_at = Instant::now();
        let _permit = self.admission.acquire().await?;
        info!(
            job_id = %job.id,
            tool = %job.tool,
            files = job.files.len(),
            waited_ms = queued_at.elapsed().as_millis() as u64,
            "job admitted"
        );

        ensure_dependencies(self.probe.as_ref(), job.tool).await?;

        let workspace = JobWorkspace::create_in(&self.settings.temp_root, job.id)?;
        let started = Instant::now();
        let result = self.execute(&job, &workspace).await;
        if let Err(e) = workspace.close() {
            warn!(job_id = %job.id, error = %e, "failed to remove job workspace");
        }

        match &result {
            Ok(output) => info!(
                job_id = %job.id,
                tool = %job.tool,
                bytes = output.bytes.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "job finished"
            ),
            Err(e) => warn!(
                job_id = %job.id,
                tool = %job.tool,
                elapsed_ms = started.elapsed().as_millis() as u64,
                error = %e,
                "job failed"
            ),
        }
        result
    }

    async fn execute(&self, job: &ConversionJob, workspace: &JobWorkspace) -> Result<JobOutput, EngineError> {
        let inputs = workspace.materialize(&job.files).await?;
        let converter = self.registry.get(job.tool)?;
        let ctx = ConversionContext {
            job_id: job.id,
            tool: job.tool,
            options: &job.options,
            inputs: &inputs,
            workspace,
            runner: self.runner.as_ref(),
            timeout: self.settings.timeout,
            hardened: self.settings.hardened,
        };
        let artifact = converter.convert(&ctx).await?;

        if job.tool.validates_output() {
            let source = ctx.primary_input()?;
            validate_pptx_conversion(&source.path, &artifact.path).await?;
        }

        let bytes = tokio::fs::read(&artifact.path).await?;
        Ok(JobOutput {
            job_id: job.id,
            bytes: Bytes::from(bytes),
            file_name: artifact.file_name(),
            content_type: artifact.content_type(),
            advisory: artifact.advisory,
        })
    }

    /// Every tool with its binaries and whether they resolve right now.
    pub async fn capabilities(&self) -> Vec<ToolCapability> {
        let mut out = Vec::new();
        for tool in ToolId::iter() {
            let mut binaries = Vec::new();
            for binary in tool.dependencies() {
                binaries.push(BinaryStatus {
                    name: binary.program(),
                    available: self.probe.is_available(binary.program()).await,
                });
            }
            out.push(ToolCapability {
                tool,
                output_extension: tool.output_extension(),
                available: binaries.iter().all(|b| b.available),
                binaries,
            });
        }
        out
    }
}

#[cfg(test)]
mod test {
    use tracing_test::traced_test;

    use super::*;
    use crate::error::FailureKind;
    use crate::testing::{FakeOutcome, FakeProbe, FakeRunner, pdf_with_pages, pptx_with_slides};

    fn settings(root: &tempfile::TempDir) -> EngineSettings {
        EngineSettings {
            temp_root: root.path().to_path_buf(),
            timeout: Duration::from_secs(5),
            ..EngineSettings::default()
        }
    }

    fn engine(root: &tempfile::TempDir, runner: Arc<FakeRunner>, probe: FakeProbe) -> Engine {
        Engine::with_backends(settings(root), runner, Arc::new(probe))
    }

    fn pdf_job(tool: ToolId, options: &str) -> ConversionJob {
        ConversionJob::new(
            tool,
            JobOptions::parse(Some(options)).unwrap(),
            vec![UploadedFile::new("in.pdf", "application/pdf", pdf_with_pages(1, 612.0, 792.0))],
        )
    }

    fn is_empty_dir(root: &tempfile::TempDir) -> bool {
        std::fs::read_dir(root.path()).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn compress_returns_artifact_and_cleans_up() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new());
        let engine = engine(&root, runner.clone(), FakeProbe::all_installed());

        let out = engine
            .run(pdf_job(ToolId::CompressPdf, r#"{"quality":"small"}"#))
            .await
            .unwrap();
        assert_eq!(out.file_name, "compressed.pdf");
        assert_eq!(out.content_type, "application/pdf");
        assert!(out.bytes.starts_with(b"%PDF"));
        assert!(runner.calls()[0].to_string().contains("-dPDFSETTINGS=/screen"));
        assert!(is_empty_dir(&root));
        assert_eq!(engine.admission().snapshot().active_jobs, 0);
    }

    #[tokio::test]
    async fn missing_dependency_fails_before_workspace_exists() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new());
        let engine = engine(&root, runner.clone(), FakeProbe::missing(&["qpdf"]));

        let err = engine.run(pdf_job(ToolId::RepairPdf, "{}")).await.unwrap_err();
        assert!(matches!(err, EngineError::DependencyMissing { binary: "qpdf", .. }));
        assert!(runner.calls().is_empty());
        assert!(is_empty_dir(&root));
    }

    #[tokio::test]
    async fn pptx_page_mismatch_is_output_validation_error() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new().with_pdf(3, 960.0, 540.0));
        let engine = engine(&root, runner, FakeProbe::all_installed());
        let job = ConversionJob::new(
            ToolId::PowerpointToPdf,
            JobOptions::default(),
            vec![UploadedFile::new(
                "deck.pptx",
                "application/vnd.openxmlformats-officedocument.presentationml.presentation",
                pptx_with_slides(5, 12_192_000, 6_858_000),
            )],
        );

        let err = engine.run(job).await.unwrap_err();
        assert!(matches!(err, EngineError::OutputValidation(_)));
        assert!(is_empty_dir(&root));
    }

    #[tokio::test]
    async fn pptx_small_quality_goes_through_ghostscript() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new().with_pdf(2, 960.0, 540.0));
        let engine = engine(&root, runner.clone(), FakeProbe::all_installed());
        let job = ConversionJob::new(
            ToolId::PowerpointToPdf,
            JobOptions::parse(Some(r#"{"quality":"small"}"#)).unwrap(),
            vec![UploadedFile::new("deck.pptx", "", pptx_with_slides(2, 12_192_000, 6_858_000))],
        );

        let out = engine.run(job).await.unwrap();
        assert_eq!(out.file_name, "powerpoint-optimized.pdf");
        let programs: Vec<_> = runner.calls().iter().map(|c| c.program()).collect();
        assert_eq!(programs, ["soffice", "gs"]);
    }

    #[tokio::test]
    async fn deck_named_like_the_optimized_output_is_not_overwritten() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new().with_pdf(1, 960.0, 540.0));
        let engine = engine(&root, runner.clone(), FakeProbe::all_installed());
        let job = ConversionJob::new(
            ToolId::PowerpointToPdf,
            JobOptions::parse(Some(r#"{"quality":"small"}"#)).unwrap(),
            vec![UploadedFile::new(
                "powerpoint-optimized.pptx",
                "",
                pptx_with_slides(1, 12_192_000, 6_858_000),
            )],
        );

        let out = engine.run(job).await.unwrap();
        assert_eq!(out.file_name, "powerpoint-optimized.pdf");

        let calls = runner.calls();
        let gs = &calls[1];
        let gs_output = PathBuf::from(gs.value_with_prefix("-sOutputFile=").unwrap());
        let gs_input = PathBuf::from(gs.arg_values().last().unwrap());
        assert_ne!(gs_input, gs_output);
        assert_eq!(gs_input.parent().and_then(|p| p.file_name()).unwrap(), "soffice");
        assert_eq!(gs_output.parent().and_then(|p| p.file_name()).unwrap(), "out");
        assert!(is_empty_dir(&root));
    }

    #[tokio::test]
    async fn pptx_total_size_cap_applies_before_admission() {
        let root = tempfile::tempdir().unwrap();
        let mut settings = settings(&root);
        settings.pptx_max_bytes = 8;
        let runner = Arc::new(FakeRunner::new());
        let engine = Engine::with_backends(settings, runner.clone(), Arc::new(FakeProbe::all_installed()));
        let job = ConversionJob::new(
            ToolId::PowerpointToPdf,
            JobOptions::default(),
            vec![UploadedFile::new("a.pptx", "", vec![0u8; 16])],
        );
        assert!(matches!(engine.run(job).await, Err(EngineError::PayloadTooLarge(_))));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn classified_failure_and_timeout_clean_up() {
        let root = tempfile::tempdir().unwrap();
        let failing = Arc::new(FakeRunner::new().with_outcome(FakeOutcome::Fail {
            status: 2,
            stderr: "invalid password".into(),
        }));
        let engine = engine(&root, failing, FakeProbe::all_installed());
        let err = engine.run(pdf_job(ToolId::UnlockPdf, "{}")).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Execution {
                kind: FailureKind::PasswordProtected,
                ..
            }
        ));
        assert!(is_empty_dir(&root));

        let slow = Arc::new(FakeRunner::new().with_outcome(FakeOutcome::TimeOut));
        let engine = Engine::with_backends(settings(&root), slow, Arc::new(FakeProbe::all_installed()));
        let err = engine.run(pdf_job(ToolId::PdfToPdfa, "{}")).await.unwrap_err();
        assert!(matches!(err, EngineError::Timeout { program: "gs", .. }));
        assert!(is_empty_dir(&root));
    }

    #[tokio::test]
    async fn missing_output_is_execution_failure() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new().with_outcome(FakeOutcome::NoOutput));
        let engine = engine(&root, runner, FakeProbe::all_installed());
        let err = engine.run(pdf_job(ToolId::RepairPdf, "{}")).await.unwrap_err();
        assert_eq!(err.to_string(), "qpdf failed");
    }

    #[tokio::test]
    async fn font_warning_becomes_advisory() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(
            FakeRunner::new().with_outcome(FakeOutcome::SucceedWithStderr("font Calibri replaced".into())),
        );
        let engine = engine(&root, runner, FakeProbe::all_installed());
        let job = ConversionJob::new(
            ToolId::WordToPdf,
            JobOptions::default(),
            vec![UploadedFile::new("letter.docx", "", "PK")],
        );
        let out = engine.run(job).await.unwrap();
        assert_eq!(out.file_name, "letter.pdf");
        assert_eq!(out.advisory, Some(Advisory::FontSubstitution));
    }

    #[tokio::test]
    async fn preflight_rejects_before_spawning() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new());
        let engine = engine(&root, runner.clone(), FakeProbe::all_installed());

        for url in ["javascript:alert(1)", "ftp://x", "http://127.0.0.1/admin"] {
            let options = JobOptions::parse(Some(&format!(r#"{{"url":"{url}"}}"#))).unwrap();
            let job = ConversionJob::new(ToolId::HtmlToPdf, options, Vec::new());
            assert!(matches!(engine.run(job).await, Err(EngineError::Validation(_))), "{url}");
        }
        let protect = engine.run(pdf_job(ToolId::ProtectPdf, "{}")).await;
        assert!(matches!(protect, Err(EngineError::Validation(_))));
        let empty = ConversionJob::new(ToolId::CompressPdf, JobOptions::default(), Vec::new());
        assert!(matches!(engine.run(empty).await, Err(EngineError::Validation(_))));

        assert!(runner.calls().is_empty());
        assert!(is_empty_dir(&root));
    }

    #[tokio::test]
    async fn capacity_plus_one_jobs_run_at_most_capacity_at_once() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new().with_delay(Duration::from_millis(150)));
        let engine = Arc::new(engine(&root, runner.clone(), FakeProbe::all_installed()));
        let capacity = engine.admission().capacity();

        let started = Instant::now();
        let mut handles = Vec::new();
        for _ in 0..=capacity {
            let engine = Arc::clone(&engine);
            handles.push(tokio::spawn(async move {
                engine.run(pdf_job(ToolId::CompressPdf, "{}")).await.map(|_| started.elapsed())
            }));
        }
        let mut finished = Vec::new();
        for h in handles {
            finished.push(h.await.unwrap().unwrap());
        }
        finished.sort();

        assert_eq!(runner.peak_concurrency(), capacity);
        // the extra job had to wait for a full run of one of the first
        assert!(finished[capacity] >= Duration::from_millis(300));
        assert!(is_empty_dir(&root));
    }

    #[tokio::test]
    #[traced_test]
    async fn passwords_never_reach_logs() {
        let root = tempfile::tempdir().unwrap();
        let engine = engine(&root, Arc::new(FakeRunner::new()), FakeProbe::all_installed());
        engine
            .run(pdf_job(ToolId::ProtectPdf, r#"{"password":"hunter2-secret"}"#))
            .await
            .unwrap();
        assert!(logs_contain("<redacted>"));
        assert!(!logs_contain("hunter2-secret"));
    }

    #[tokio::test]
    async fn capabilities_report_missing_binaries() {
        let root = tempfile::tempdir().unwrap();
        let engine = engine(&root, Arc::new(FakeRunner::new()), FakeProbe::missing(&["chromium"]));
        let caps = engine.capabilities().await;
        assert_eq!(caps.len(), ToolId::iter().count());
        let html = caps.iter().find(|c| c.tool == ToolId::HtmlToPdf).unwrap();
        assert!(!html.available);
        assert!(caps.iter().filter(|c| c.tool != ToolId::HtmlToPdf).all(|c| c.available));
    }
}
