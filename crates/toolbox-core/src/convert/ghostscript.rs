use std::path::Path;

use async_trait::async_trait;

use super::{ConversionContext, ConvertedArtifact, Converter};
use crate::error::EngineError;
use crate::exec::CommandSpec;
use crate::tool::{Binary, Quality, ToolId};

const COMPRESSED: &str = "compressed.pdf";
const ARCHIVE: &str = "archive-pdfa.pdf";

/// `gs` invocation that rewrites a PDF with the given quality profile.
pub fn compress_command(input: &Path, output: &Path, quality: Quality) -> CommandSpec {
    CommandSpec::new(Binary::Ghostscript)
        .args(["-sDEVICE=pdfwrite", "-dCompatibilityLevel=1.4"])
        .arg(format!("-dPDFSETTINGS={}", quality.pdf_settings()))
        .args(["-dNOPAUSE", "-dQUIET", "-dBATCH"])
        .arg_with_path("-sOutputFile=", output)
        .arg(input)
}

/// PDF/A-2b with an RGB process colour model.
pub fn pdfa_command(input: &Path, output: &Path) -> CommandSpec {
    CommandSpec::new(Binary::Ghostscript)
        .args([
            "-dPDFA=2",
            "-dBATCH",
            "-dNOPAUSE",
            "-dNOOUTERSAVE",
            "-sProcessColorModel=DeviceRGB",
            "-sDEVICE=pdfwrite",
            "-sPDFACompatibilityPolicy=1",
        ])
        .arg_with_path("-sOutputFile=", output)
        .arg(input)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GhostscriptConverter;

#[async_trait]
impl Converter for GhostscriptConverter {
    fn tools(&self) -> &'static [ToolId] {
        &[ToolId::CompressPdf, ToolId::PdfToPdfa]
    }

    async fn convert(&self, ctx: &ConversionContext<'_>) -> Result<ConvertedArtifact, EngineError> {
        let input = ctx.primary_input()?;
        let (spec, output) = match ctx.tool {
            ToolId::CompressPdf => {
                let output = ctx.output_path(COMPRESSED);
                let quality = ctx.options.quality_or(Quality::Balanced);
                (compress_command(&input.path, &output, quality), output)
            }
            ToolId::PdfToPdfa => {
                let output = ctx.output_path(ARCHIVE);
                (pdfa_command(&input.path, &output), output)
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
    use super::*;

    #[test]
    fn compress_maps_quality_to_profile() {
        let spec = compress_command(
            Path::new("/w/in/a.pdf"),
            Path::new("/w/out/compressed.pdf"),
            Quality::Small,
        );
        assert_eq!(
            spec.to_string(),
            "gs -sDEVICE=pdfwrite -dCompatibilityLevel=1.4 -dPDFSETTINGS=/screen \
             -dNOPAUSE -dQUIET -dBATCH -sOutputFile=/w/out/compressed.pdf /w/in/a.pdf"
        );
    }

    #[test]
    fn pdfa_forces_rgb_and_level_two() {
        let spec = pdfa_command(Path::new("/w/in/a.pdf"), Path::new("/w/out/archive-pdfa.pdf"));
        let rendered = spec.to_string();
        assert!(rendered.contains("-dPDFA=2"));
        assert!(rendered.contains("-sProcessColorModel=DeviceRGB"));
        assert_eq!(
            spec.value_with_prefix("-sOutputFile=").as_deref(),
            Some("/w/out/archive-pdfa.pdf")
        );
    }
}
