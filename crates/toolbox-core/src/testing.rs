//! In-process stand-ins for native binaries, plus synthetic PDF/PPTX
//! fixtures. Compiled for tests and behind the `test-util` feature.

use std::collections::HashSet;
use std::ffi::OsStr;
use std::io::{Cursor, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use lopdf::{Document, Object, Stream, dictionary};
use zip::write::SimpleFileOptions;

use crate::error::EngineError;
use crate::exec::{CommandOutput, CommandRunner, CommandSpec};
use crate::probe::BinaryProbe;
use crate::tool::Binary;

/// What a [`FakeRunner`] does with each command.
#[derive(Debug, Clone)]
pub enum FakeOutcome {
    /// Exit 0 and write the expected output file.
    Succeed,
    /// Exit 0, write output, and print `stderr`.
    SucceedWithStderr(String),
    /// Exit with `status` and print `stderr`; no output.
    Fail { status: i32, stderr: String },
    /// Exit 0 without writing anything.
    NoOutput,
    /// Behave as if the wall-clock budget ran out.
    TimeOut,
}

/// Records every command it is asked to run and fakes the result.
///
/// Output paths are recovered from the command line the same way the real
/// programs interpret it, so converters see the file they expect.
#[derive(Debug)]
pub struct FakeRunner {
    outcome: FakeOutcome,
    delay: Duration,
    pdf_pages: usize,
    page_size: (f64, f64),
    calls: Mutex<Vec<CommandSpec>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl Default for FakeRunner {
    fn default() -> Self {
        Self {
            outcome: FakeOutcome::Succeed,
            delay: Duration::ZERO,
            pdf_pages: 1,
            page_size: (612.0, 792.0),
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_outcome(mut self, outcome: FakeOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Shape of PDFs written as output.
    pub fn with_pdf(mut self, pages: usize, width: f64, height: f64) -> Self {
        self.pdf_pages = pages;
        self.page_size = (width, height);
        self
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Highest number of commands that were running at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn output_path(spec: &CommandSpec) -> Option<PathBuf> {
        match spec.binary() {
            Binary::Soffice => {
                let out_dir = spec.value_after("--outdir")?;
                let ext = spec.value_after("--convert-to")?.to_str()?;
                let input = PathBuf::from(spec.arg_values().last()?);
                let stem = input.file_stem()?.to_string_lossy().into_owned();
                Some(PathBuf::from(out_dir).join(format!("{stem}.{ext}")))
            }
            Binary::Ghostscript => spec.value_with_prefix("-sOutputFile=").map(PathBuf::from),
            Binary::Chromium => spec.value_with_prefix("--print-to-pdf=").map(PathBuf::from),
            Binary::Qpdf => spec.arg_values().last().map(PathBuf::from),
        }
    }

    async fn write_output(&self, spec: &CommandSpec) -> Result<(), EngineError> {
        let Some(path) = Self::output_path(spec) else {
            return Ok(());
        };
        let bytes = if path.extension() == Some(OsStr::new("pdf")) {
            pdf_with_pages(self.pdf_pages, self.page_size.0, self.page_size.1)
        } else {
            pptx_with_slides(1, 12_192_000, 6_858_000)
        };
        tokio::fs::write(&path, bytes).await?;
        Ok(())
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, spec: &CommandSpec, timeout: Duration) -> Result<CommandOutput, EngineError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(spec.clone());
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match &self.outcome {
            FakeOutcome::Succeed => {
                self.write_output(spec).await?;
                Ok(CommandOutput::success())
            }
            FakeOutcome::SucceedWithStderr(stderr) => {
                self.write_output(spec).await?;
                Ok(CommandOutput {
                    status: Some(0),
                    stderr: stderr.clone(),
                    ..CommandOutput::default()
                })
            }
            FakeOutcome::Fail { status, stderr } => Ok(CommandOutput::failure(*status, stderr.clone())),
            FakeOutcome::NoOutput => Ok(CommandOutput::success()),
            FakeOutcome::TimeOut => Err(EngineError::Timeout {
                program: spec.program(),
                after: timeout,
            }),
        }
    }
}

/// Reports every program as installed except the listed ones.
#[derive(Debug, Default)]
pub struct FakeProbe {
    missing: HashSet<String>,
}

impl FakeProbe {
    pub fn all_installed() -> Self {
        Self::default()
    }

    pub fn missing(programs: &[&str]) -> Self {
        Self {
            missing: programs.iter().map(|p| (*p).to_owned()).collect(),
        }
    }
}

#[async_trait]
impl BinaryProbe for FakeProbe {
    async fn is_available(&self, program: &str) -> bool {
        !self.missing.contains(program)
    }
}

/// A minimal PDF with `pages` blank pages of `width`×`height` points.
pub fn pdf_with_pages(pages: usize, width: f64, height: f64) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let kids: Vec<Object> = (0..pages)
        .map(|_| {
            let content_id = doc.add_object(Stream::new(dictionary! {}, Vec::new()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => Object::Reference(pages_id),
                "Contents" => Object::Reference(content_id),
            });
            Object::Reference(page_id)
        })
        .collect();

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => Object::Integer(pages as i64),
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(width.round() as i64),
                Object::Integer(height.round() as i64),
            ],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => Object::Reference(pages_id),
    });
    doc.trailer.set("Root", Object::Reference(catalog_id));

    let mut buf = Vec::new();
    if doc.save_to(&mut buf).is_err() {
        buf.clear();
    }
    buf
}

/// A PPTX-shaped archive with `slides` slide parts and the given `sldSz` in EMU.
pub fn pptx_with_slides(slides: usize, cx: u64, cy: u64) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();

    let mut parts = vec![(
        "ppt/presentation.xml".to_owned(),
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><p:presentation xmlns:p="http://schemas.openxmlformats.org/presentationml/2006/main"><p:sldSz cx="{cx}" cy="{cy}"/><p:notesSz cx="6858000" cy="9144000"/></p:presentation>"#
        ),
    )];
    for i in 1..=slides {
        parts.push((format!("ppt/slides/slide{i}.xml"), "<p:sld/>".to_owned()));
        parts.push((
            format!("ppt/slides/_rels/slide{i}.xml.rels"),
            "<Relationships/>".to_owned(),
        ));
    }

    for (name, body) in parts {
        if writer.start_file(name, options).is_err() || writer.write_all(body.as_bytes()).is_err() {
            return Vec::new();
        }
    }
    writer.finish().map(Cursor::into_inner).unwrap_or_default()
}
