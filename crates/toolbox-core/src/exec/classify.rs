//! Maps native command diagnostics onto [`FailureKind`].
//!
//! The tools print unstructured text whose wording changes between releases,
//! so this is best effort: rules are checked top to bottom and the first
//! match wins. Exit-status allowlists on [`CommandSpec`] cover the cases
//! where a tool documents its codes (qpdf exits 3 for "succeeded with
//! warnings").

use tracing::{debug, warn};

use super::{CommandOutput, CommandSpec};
use crate::error::{EngineError, FailureKind};

struct Rule {
    needles: &'static [&'static str],
    kind: FailureKind,
}

const RULES: &[Rule] = &[
    Rule {
        needles: &["password"],
        kind: FailureKind::PasswordProtected,
    },
    Rule {
        needles: &["font"],
        kind: FailureKind::FontSubstitution,
    },
    Rule {
        needles: &["corrupt", "damaged"],
        kind: FailureKind::CorruptInput,
    },
];

/// Non-fatal notes attached to a successful conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advisory {
    FontSubstitution,
}

impl Advisory {
    pub fn as_str(self) -> &'static str {
        match self {
            Advisory::FontSubstitution => "font-substitution",
        }
    }
}

/// Classify diagnostics of a failed command.
pub fn classify(diagnostics: &str) -> FailureKind {
    let lowered = diagnostics.to_lowercase();
    RULES
        .iter()
        .find(|rule| rule.needles.iter().any(|n| lowered.contains(n)))
        .map(|rule| rule.kind)
        .unwrap_or(FailureKind::Generic)
}

/// Turn a finished command into success (with an optional advisory) or a
/// classified [`EngineError::Execution`].
pub fn check_outcome(
    spec: &CommandSpec,
    output: &CommandOutput,
) -> Result<Option<Advisory>, EngineError> {
    let diagnostics = output.diagnostics();
    if spec.is_success(output.status) {
        if diagnostics.contains("font") {
            debug!(program = spec.program(), "font substitution reported on success");
            return Ok(Some(Advisory::FontSubstitution));
        }
        return Ok(None);
    }

    let kind = classify(&diagnostics);
    warn!(
        program = spec.program(),
        status = ?output.status,
        kind = kind.as_str(),
        "command failed"
    );
    Err(EngineError::Execution {
        kind,
        program: spec.program(),
    })
}
