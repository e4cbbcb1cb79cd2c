//! Conversion job pipeline for the local toolbox engine.
//!
//! [`Engine::run`] takes a received [`ConversionJob`] through admission,
//! dependency probing, upload materialization, the native converter and
//! output validation, and returns the artifact bytes. HTTP concerns live in
//! the `toolbox-engine` binary.

pub mod admission;
pub mod convert;
pub mod engine;
pub mod error;
pub mod exec;
pub mod pairing;
pub mod probe;
pub mod tool;
pub mod upload;
pub mod validate;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use admission::{AdmissionController, AdmissionPermit, AdmissionSnapshot};
pub use convert::{ConvertedArtifact, Converter, ConverterRegistry};
pub use engine::{ConversionJob, Engine, EngineSettings, JobOutput, ToolCapability};
pub use error::{EngineError, FailureKind, format_bytes, format_duration};
pub use exec::classify::Advisory;
pub use exec::{CommandOutput, CommandRunner, CommandSpec, ProcessRunner};
pub use pairing::{PairingKey, PairingSource};
pub use probe::{BinaryProbe, ShellProbe};
pub use tool::{Binary, JobOptions, Quality, ToolId};
pub use upload::{UploadLimits, UploadedFile};
