//! Dependency prober: is the native binary a tool needs resolvable on `PATH`?

use std::process::Stdio;

use async_trait::async_trait;
use tracing::warn;

use crate::error::EngineError;
use crate::tool::ToolId;

#[async_trait]
pub trait BinaryProbe: Send + Sync {
    async fn is_available(&self, program: &str) -> bool;
}

/// Probes with `command -v`, passing the program name as a positional
/// argument so it is never spliced into the shell script.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellProbe;

#[async_trait]
impl BinaryProbe for ShellProbe {
    #[cfg(unix)]
    async fn is_available(&self, program: &str) -> bool {
        let status = tokio::process::Command::new("sh")
            .args(["-c", "command -v \"$1\"", "toolbox-probe", program])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match status {
            Ok(status) => status.success(),
            Err(e) => {
                warn!(program, error = %e, "dependency probe could not start sh");
                false
            }
        }
    }

    #[cfg(not(unix))]
    async fn is_available(&self, program: &str) -> bool {
        tokio::process::Command::new("where")
            .arg(program)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

/// Fail fast, naming the first missing binary and the tool that wanted it.
pub async fn ensure_dependencies(probe: &dyn BinaryProbe, tool: ToolId) -> Result<(), EngineError> {
    for binary in tool.dependencies() {
        if !probe.is_available(binary.program()).await {
            return Err(EngineError::DependencyMissing {
                binary: binary.program(),
                tool: Some(tool),
            });
        }
    }
    Ok(())
}
