//! Error taxonomy for the conversion pipeline.
//!
//! The `Display` text of every variant is written for the person sitting in
//! front of the browser: the UI shows it verbatim, so it has to say what went
//! wrong and, where possible, what to try next.

use std::time::Duration;

use thiserror::Error;

use crate::tool::ToolId;

/// Stable categories for a native command that exited unsuccessfully.
///
/// Native diagnostics are free text; the classifier in
/// [`crate::exec::classify`] maps them onto one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    PasswordProtected,
    FontSubstitution,
    CorruptInput,
    Generic,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::PasswordProtected => "password_protected",
            FailureKind::FontSubstitution => "font_substitution",
            FailureKind::CorruptInput => "corrupt_input",
            FailureKind::Generic => "generic",
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    /// Missing or wrong pairing key.
    #[error("Pairing key missing or invalid. Pair this browser with the local engine and retry.")]
    Unauthorized,

    /// The request came from a browser origin outside the allowlist.
    #[error("Origin not allowed: {0}")]
    OriginRejected(String),

    /// Bad tool id, bad options, missing required option.
    #[error("{0}")]
    Validation(String),

    /// Too many files or a file above the configured byte limit.
    #[error("{0}")]
    PayloadTooLarge(String),

    /// A native binary needed by the tool is not on `PATH`.
    #[error("Missing dependency: {binary}. Install it and retry{}.", tool.map(|t| format!(" (tool: {t})")).unwrap_or_default())]
    DependencyMissing {
        binary: &'static str,
        tool: Option<ToolId>,
    },

    /// The command did not finish within the configured wall-clock budget.
    #[error(
        "{program} timed out after {}. Try a smaller file, a lower quality setting, or browser mode.",
        format_duration(*after)
    )]
    Timeout {
        program: &'static str,
        after: Duration,
    },

    /// The command exited unsuccessfully; `kind` is the classified cause.
    #[error("{}", execution_message(*kind, program))]
    Execution {
        kind: FailureKind,
        program: &'static str,
    },

    /// The produced artifact does not plausibly match the input.
    #[error("{0}. Retry in browser mode or switch between the High/Balanced quality options.")]
    OutputValidation(String),

    /// A PPTX or PDF container could not be opened for inspection.
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// The admission controller has been shut down.
    #[error("engine unavailable: {0}")]
    Unavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        EngineError::Validation(message.into())
    }

    pub fn too_large(message: impl Into<String>) -> Self {
        EngineError::PayloadTooLarge(message.into())
    }
}

/// `512 bytes`, `64KB`, `1.5MB`: binary units, at most one decimal.
pub fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;
    if bytes >= MIB {
        format!("{}MB", one_decimal(bytes as f64 / MIB as f64))
    } else if bytes >= KIB {
        format!("{}KB", one_decimal(bytes as f64 / KIB as f64))
    } else {
        format!("{bytes} bytes")
    }
}

/// `120s`, `1.5s`, `250ms`.
pub fn format_duration(d: Duration) -> String {
    if d < Duration::from_secs(1) {
        format!("{}ms", d.as_millis())
    } else {
        format!("{}s", one_decimal(d.as_secs_f64()))
    }
}

fn one_decimal(value: f64) -> String {
    let s = format!("{value:.1}");
    match s.strip_suffix(".0") {
        Some(whole) => whole.to_owned(),
        None => s,
    }
}

fn execution_message(kind: FailureKind, program: &str) -> String {
    match kind {
        FailureKind::PasswordProtected => {
            "The file is encrypted or password-protected. Enter the correct password and retry."
                .to_owned()
        }
        FailureKind::FontSubstitution => {
            "Required fonts are missing; the document could only be rendered with substitute fonts."
                .to_owned()
        }
        FailureKind::CorruptInput => {
            "The file is damaged or in an unsupported format.".to_owned()
        }
        FailureKind::Generic => format!("{program} failed"),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn dependency_message_names_binary_and_tool() {
        let err = EngineError::DependencyMissing {
            binary: "qpdf",
            tool: Some(ToolId::RepairPdf),
        };
        assert_eq!(
            err.to_string(),
            "Missing dependency: qpdf. Install it and retry (tool: repair-pdf)."
        );
    }

    #[test]
    fn timeout_message_suggests_remediation() {
        let err = EngineError::Timeout {
            program: "soffice",
            after: Duration::from_secs(120),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("soffice timed out after 120s"));
        assert!(msg.contains("browser mode"));
    }

    #[test]
    fn sub_second_timeouts_keep_their_precision() {
        let err = EngineError::Timeout {
            program: "gs",
            after: Duration::from_millis(250),
        };
        assert!(err.to_string().starts_with("gs timed out after 250ms."));
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");
        assert_eq!(format_duration(Duration::from_secs(120)), "120s");
    }

    #[test]
    fn byte_counts_stay_readable_below_a_megabyte() {
        assert_eq!(format_bytes(64), "64 bytes");
        assert_eq!(format_bytes(64 * 1024), "64KB");
        assert_eq!(format_bytes(1536 * 1024), "1.5MB");
        assert_eq!(format_bytes(1024 * 1024 * 1024), "1024MB");
    }

    #[test]
    fn generic_execution_message_names_program() {
        let err = EngineError::Execution {
            kind: FailureKind::Generic,
            program: "gs",
        };
        assert_eq!(err.to_string(), "gs failed");
    }
}
