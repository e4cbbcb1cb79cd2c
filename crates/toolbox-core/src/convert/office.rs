use std::io;
use std::path::Path;

use async_trait::async_trait;
use tracing::debug;
use url::Url;

use super::ghostscript::compress_command;
use super::{ConversionContext, ConvertedArtifact, Converter};
use crate::error::EngineError;
use crate::exec::CommandSpec;
use crate::tool::{Binary, Quality, ToolId};

const OPTIMIZED: &str = "powerpoint-optimized.pdf";

/// LibreOffice headless conversion into `out_dir`.
///
/// `profile_dir` becomes a private user installation so concurrent jobs do
/// not fight over the operator's LibreOffice profile lock.
pub fn soffice_command(
    input: &Path,
    out_dir: &Path,
    target_ext: &str,
    profile_dir: &Path,
) -> Result<CommandSpec, EngineError> {
    let profile = Url::from_directory_path(profile_dir).map_err(|_| {
        EngineError::Io(io::Error::other(format!(
            "profile path is not absolute: {}",
            profile_dir.display()
        )))
    })?;
    Ok(CommandSpec::new(Binary::Soffice)
        .arg(format!("-env:UserInstallation={profile}"))
        .args(["--headless", "--nologo", "--nofirststartwizard", "--convert-to", target_ext, "--outdir"])
        .arg(out_dir)
        .arg(input))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OfficeConverter;

#[async_trait]
impl Converter for OfficeConverter {
    fn tools(&self) -> &'static [ToolId] {
        &[
            ToolId::WordToPdf,
            ToolId::PowerpointToPdf,
            ToolId::ExcelToPdf,
            ToolId::PdfToWord,
            ToolId::PdfToPowerpoint,
            ToolId::PdfToExcel,
        ]
    }

    async fn convert(&self, ctx: &ConversionContext<'_>) -> Result<ConvertedArtifact, EngineError> {
        let input = &ctx.primary_input()?.path;
        let ext = ctx.tool.output_extension();
        // Named after the upload, so kept apart from the fixed names in `out/`.
        let out_dir = ctx.workspace.root().join("soffice");
        tokio::fs::create_dir(&out_dir).await?;
        let profile = ctx.workspace.root().join("lo-profile");

        let spec = soffice_command(input, &out_dir, ext, &profile)?;
        let advisory = ctx.execute(&spec).await?;

        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "input".to_owned());
        let converted = ctx
            .expect_output(spec.program(), out_dir.join(format!("{stem}.{ext}")), advisory)
            .await?;

        if ctx.tool != ToolId::PowerpointToPdf {
            return Ok(converted);
        }

        // Slide decks default to high fidelity; gs only runs when asked to shrink.
        let quality = ctx.options.quality_or(Quality::High);
        let compress_mode = ctx
            .options
            .get_non_empty("compressMode")
            .unwrap_or_else(|| "none".to_owned());
        if quality != Quality::Small && compress_mode == "none" {
            return Ok(converted);
        }

        debug!(job_id = %ctx.job_id, ?quality, compress_mode, "re-writing slide PDF through gs");
        let output = ctx.output_path(OPTIMIZED);
        let spec = compress_command(&converted.path, &output, quality);
        let gs_advisory = ctx.execute(&spec).await?;
        ctx.expect_output(spec.program(), output, converted.advisory.or(gs_advisory))
            .await
    }
}
