use async_trait::async_trait;

use super::{ConversionContext, ConvertedArtifact, Converter};
use crate::error::EngineError;
use crate::exec::CommandSpec;
use crate::tool::{Binary, JobOptions, ToolId};

/// qpdf exits 3 when it succeeded with warnings (e.g. a recovered xref).
const QPDF_SUCCESS: &[i32] = &[0, 3];

#[derive(Debug, Clone, Copy, Default)]
pub struct QpdfConverter;

#[async_trait]
impl Converter for QpdfConverter {
    fn tools(&self) -> &'static [ToolId] {
        &[ToolId::RepairPdf, ToolId::UnlockPdf, ToolId::ProtectPdf]
    }

    fn preflight(&self, tool: ToolId, options: &JobOptions, _hardened: bool) -> Result<(), EngineError> {
        if tool == ToolId::ProtectPdf && options.get_non_empty("password").is_none() {
            return Err(EngineError::validation("Missing password option for protect-pdf."));
        }
        Ok(())
    }

    async fn convert(&self, ctx: &ConversionContext<'_>) -> Result<ConvertedArtifact, EngineError> {
        let input = &ctx.primary_input()?.path;
        let base = CommandSpec::new(Binary::Qpdf).success_codes(QPDF_SUCCESS);

        let (spec, output) = match ctx.tool {
            ToolId::RepairPdf => {
                let output = ctx.output_path("repaired.pdf");
                (base.arg("--linearize").arg(input).arg(&output), output)
            }
            ToolId::UnlockPdf => {
                let output = ctx.output_path("unlocked.pdf");
                let password = ctx.options.get_str("password").unwrap_or_default();
                let spec = base
                    .secret_arg(format!("--password={password}"))
                    .arg("--decrypt")
                    .arg(input)
                    .arg(&output);
                (spec, output)
            }
            ToolId::ProtectPdf => {
                let output = ctx.output_path("protected.pdf");
                let password = ctx
                    .options
                    .get_non_empty("password")
                    .ok_or_else(|| EngineError::validation("Missing password option for protect-pdf."))?;
                let spec = base
                    .arg("--encrypt")
                    .secret_arg(password.clone())
                    .secret_arg(password)
                    .args(["256", "--"])
                    .arg(input)
                    .arg(&output);
                (spec, output)
            }
            other => {
                return Err(EngineError::validation(format!(
                    "Tool not implemented: {other}."
                )));
            }
        };

        let advisory = ctx.execute(&spec).await?;
        ctx.expect_output(spec.program(), output, advisory).await
    }
}

#[cfg(test)]
mod test {
    use std::path::Path;
    use std::sync::Arc;

    use super::*;
    use crate::engine::{ConversionJob, Engine, EngineSettings};
    use crate::testing::{FakeProbe, FakeRunner, pdf_with_pages};
    use crate::upload::UploadedFile;

    /// Run `tool` on a one-page PDF and return the argv qpdf received.
    async fn qpdf_args(tool: ToolId, options: &str) -> Vec<String> {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new());
        let settings = EngineSettings {
            temp_root: root.path().to_path_buf(),
            ..EngineSettings::default()
        };
        let engine = Engine::with_backends(settings, runner.clone(), Arc::new(FakeProbe::all_installed()));
        let job = ConversionJob::new(
            tool,
            JobOptions::parse(Some(options)).unwrap(),
            vec![UploadedFile::new("in.pdf", "application/pdf", pdf_with_pages(1, 612.0, 792.0))],
        );
        engine.run(job).await.unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].program(), "qpdf");
        calls[0]
            .arg_values()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    fn assert_in_out(args: &[String], output: &str) {
        let [.., input, out] = args else {
            panic!("expected input and output paths in {args:?}");
        };
        assert!(Path::new(input).ends_with("in/in.pdf"), "{input}");
        assert!(Path::new(out).ends_with(Path::new("out").join(output)), "{out}");
    }

    #[tokio::test]
    async fn protect_passes_both_passwords_and_aes256() {
        let args = qpdf_args(ToolId::ProtectPdf, r#"{"password":"s3cret pw"}"#).await;
        assert_eq!(args.len(), 7);
        assert_eq!(args[..5], ["--encrypt", "s3cret pw", "s3cret pw", "256", "--"]);
        assert_in_out(&args, "protected.pdf");
    }

    #[tokio::test]
    async fn unlock_passes_password_then_decrypt() {
        let args = qpdf_args(ToolId::UnlockPdf, r#"{"password":"open-me"}"#).await;
        assert_eq!(args.len(), 4);
        assert_eq!(args[..2], ["--password=open-me", "--decrypt"]);
        assert_in_out(&args, "unlocked.pdf");

        let args = qpdf_args(ToolId::UnlockPdf, "{}").await;
        assert_eq!(args[..2], ["--password=", "--decrypt"]);
    }

    #[tokio::test]
    async fn repair_linearizes() {
        let args = qpdf_args(ToolId::RepairPdf, "{}").await;
        assert_eq!(args.len(), 3);
        assert_eq!(args[0], "--linearize");
        assert_in_out(&args, "repaired.pdf");
    }

    #[test]
    fn protect_requires_password() {
        let empty = JobOptions::parse(Some(r#"{"password":""}"#)).unwrap();
        let set = JobOptions::parse(Some(r#"{"password":"pw"}"#)).unwrap();
        assert!(matches!(
            QpdfConverter.preflight(ToolId::ProtectPdf, &empty, true),
            Err(EngineError::Validation(_))
        ));
        assert!(QpdfConverter.preflight(ToolId::ProtectPdf, &set, true).is_ok());
        // unlock tolerates an empty password (owner-password-only files)
        assert!(QpdfConverter.preflight(ToolId::UnlockPdf, &empty, true).is_ok());
    }
}
