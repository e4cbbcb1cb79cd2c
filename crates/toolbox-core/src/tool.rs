//! Tool catalog: the fixed set of conversions the engine runs, the native
//! binaries each one needs, and the per-job option map.

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoStaticStr};

use crate::error::EngineError;

/// Conversions accepted by `POST /api/convert`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
    IntoStaticStr,
    Serialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum ToolId {
    WordToPdf,
    PowerpointToPdf,
    ExcelToPdf,
    PdfToWord,
    PdfToPowerpoint,
    PdfToExcel,
    PdfToPdfa,
    CompressPdf,
    RepairPdf,
    UnlockPdf,
    ProtectPdf,
    HtmlToPdf,
}

/// Native programs the engine shells out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Binary {
    Soffice,
    Ghostscript,
    Qpdf,
    Chromium,
}

impl Binary {
    /// Executable name looked up on `PATH`.
    pub fn program(self) -> &'static str {
        match self {
            Binary::Soffice => "soffice",
            Binary::Ghostscript => "gs",
            Binary::Qpdf => "qpdf",
            Binary::Chromium => "chromium",
        }
    }
}

impl fmt::Display for Binary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program())
    }
}

impl ToolId {
    /// Binaries that must resolve on `PATH` before the job touches disk.
    pub fn dependencies(self) -> &'static [Binary] {
        match self {
            ToolId::WordToPdf
            | ToolId::PowerpointToPdf
            | ToolId::ExcelToPdf
            | ToolId::PdfToWord
            | ToolId::PdfToPowerpoint
            | ToolId::PdfToExcel => &[Binary::Soffice],
            ToolId::PdfToPdfa | ToolId::CompressPdf => &[Binary::Ghostscript],
            ToolId::RepairPdf | ToolId::UnlockPdf | ToolId::ProtectPdf => &[Binary::Qpdf],
            ToolId::HtmlToPdf => &[Binary::Chromium],
        }
    }

    /// Extension of the artifact this tool produces.
    pub fn output_extension(self) -> &'static str {
        match self {
            ToolId::PdfToWord => "docx",
            ToolId::PdfToPowerpoint => "pptx",
            ToolId::PdfToExcel => "xlsx",
            _ => "pdf",
        }
    }

    /// `false` only for tools that fetch their input themselves.
    pub fn requires_upload(self) -> bool {
        !matches!(self, ToolId::HtmlToPdf)
    }

    /// Whether the produced artifact is cross-checked against the input.
    pub fn validates_output(self) -> bool {
        matches!(self, ToolId::PowerpointToPdf)
    }
}

/// Ghostscript output profile selected by the `quality` option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Quality {
    High,
    #[default]
    Balanced,
    Small,
}

impl Quality {
    /// Unknown values fall back to [`Quality::Balanced`].
    pub fn parse_lossy(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "high" => Quality::High,
            "small" => Quality::Small,
            _ => Quality::Balanced,
        }
    }

    /// Value for Ghostscript's `-dPDFSETTINGS`.
    pub fn pdf_settings(self) -> &'static str {
        match self {
            Quality::High => "/prepress",
            Quality::Balanced => "/ebook",
            Quality::Small => "/screen",
        }
    }
}

/// Tool-specific options decoded from the `options` form field.
///
/// The map is untyped on the wire; accessors coerce scalars to strings the
/// same way a browser would stringify them. `Debug` never prints values,
/// since `password` lives here.
#[derive(Clone, Default)]
pub struct JobOptions {
    values: Map<String, Value>,
}

impl JobOptions {
    /// Decode the raw form field. An absent or blank field is an empty map;
    /// anything that is not a JSON object is rejected.
    pub fn parse(raw: Option<&str>) -> Result<Self, EngineError> {
        let raw = raw.map(str::trim).unwrap_or_default();
        if raw.is_empty() {
            return Ok(Self::default());
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(values)) => Ok(Self { values }),
            Ok(_) => Err(EngineError::validation("options must be a JSON object.")),
            Err(_) => Err(EngineError::validation("options is not valid JSON.")),
        }
    }

    pub fn from_map(values: Map<String, Value>) -> Self {
        Self { values }
    }

    /// String view of a scalar option; `null`, arrays and objects read as absent.
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.values.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Like [`Self::get_str`] but treats an empty string as absent.
    pub fn get_non_empty(&self, key: &str) -> Option<String> {
        self.get_str(key).filter(|v| !v.is_empty())
    }

    pub fn quality_or(&self, default: Quality) -> Quality {
        self.get_str("quality")
            .map(|q| Quality::parse_lossy(&q))
            .unwrap_or(default)
    }
}

impl fmt::Debug for JobOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobOptions")
            .field("keys", &self.values.keys().collect::<Vec<_>>())
            .finish()
    }
}
