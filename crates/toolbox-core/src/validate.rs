//! Post-conversion checks for PowerPoint → PDF.
//!
//! LibreOffice can exit 0 after dropping slides or rescaling a template, so
//! the produced PDF is compared with the source deck: page count against
//! slide count, and first-page aspect ratio against the declared slide size.

use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::LazyLock;

use lopdf::{Document, Object, ObjectId};
use regex::Regex;
use tracing::{debug, info};

use crate::error::EngineError;

/// Largest tolerated difference between source and output width/height ratios.
pub const ASPECT_RATIO_TOLERANCE: f64 = 0.08;

/// PowerPoint stores sizes in EMU; 12700 EMU = 1 pt.
const EMU_PER_POINT: f64 = 12_700.0;

/// 16:9 default used when `presentation.xml` declares no size.
const DEFAULT_SLIDE_SIZE_PT: (f64, f64) = (960.0, 540.0);

static SLIDE_PART: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^ppt/slides/slide\d+\.xml$").expect("valid regex"));
static SLIDE_SIZE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<(?:p:)?sldSz\b[^>]*>").expect("valid regex"));
static CX_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\bcx="(\d+)""#).expect("valid regex"));
static CY_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\bcy="(\d+)""#).expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeckMeta {
    pub slide_count: usize,
    pub width_pt: f64,
    pub height_pt: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PdfMeta {
    pub page_count: usize,
    pub width_pt: f64,
    pub height_pt: f64,
}

/// Slide count and nominal slide size of a PPTX archive.
pub fn read_deck_meta(pptx: &[u8]) -> Result<DeckMeta, EngineError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(pptx))
        .map_err(|e| EngineError::InvalidDocument(format!("not a PPTX archive: {e}")))?;

    let slide_count = archive
        .file_names()
        .filter(|name| SLIDE_PART.is_match(name))
        .count();

    let mut presentation = String::new();
    let (width_pt, height_pt) = match archive.by_name("ppt/presentation.xml") {
        Ok(mut entry) => {
            entry.read_to_string(&mut presentation)?;
            slide_size(&presentation).unwrap_or(DEFAULT_SLIDE_SIZE_PT)
        }
        Err(_) => DEFAULT_SLIDE_SIZE_PT,
    };

    Ok(DeckMeta {
        slide_count,
        width_pt,
        height_pt,
    })
}

fn slide_size(presentation_xml: &str) -> Option<(f64, f64)> {
    let tag = SLIDE_SIZE_TAG.find(presentation_xml)?.as_str();
    let cx: f64 = CX_ATTR.captures(tag)?[1].parse().ok()?;
    let cy: f64 = CY_ATTR.captures(tag)?[1].parse().ok()?;
    (cx > 0.0 && cy > 0.0).then(|| (cx / EMU_PER_POINT, cy / EMU_PER_POINT))
}

/// Page count and first-page size (rotation applied) of a PDF.
pub fn read_pdf_meta(pdf: &[u8]) -> Result<PdfMeta, EngineError> {
    let doc = Document::load_mem(pdf)
        .map_err(|e| EngineError::InvalidDocument(format!("unreadable PDF: {e}")))?;
    let pages = doc.get_pages();
    let Some((_, &first)) = pages.iter().next() else {
        return Ok(PdfMeta {
            page_count: 0,
            width_pt: 0.0,
            height_pt: 0.0,
        });
    };

    let media_box = inherited(&doc, first, b"MediaBox")
        .ok_or_else(|| EngineError::InvalidDocument("first page has no MediaBox".into()))?;
    let coords = resolve(&doc, media_box)
        .as_array()
        .map_err(|e| EngineError::InvalidDocument(format!("MediaBox is not an array: {e}")))?
        .iter()
        .map(|o| number(resolve(&doc, o)))
        .collect::<Option<Vec<f64>>>()
        .filter(|c| c.len() == 4)
        .ok_or_else(|| EngineError::InvalidDocument("malformed MediaBox".into()))?;

    let mut width = (coords[2] - coords[0]).abs();
    let mut height = (coords[3] - coords[1]).abs();
    let rotate = inherited(&doc, first, b"Rotate")
        .and_then(|o| number(resolve(&doc, o)))
        .unwrap_or(0.0) as i64;
    if rotate.rem_euclid(180) == 90 {
        std::mem::swap(&mut width, &mut height);
    }

    Ok(PdfMeta {
        page_count: pages.len(),
        width_pt: width,
        height_pt: height,
    })
}

/// Look up a page attribute, walking `/Parent` links for inherited values.
fn inherited<'a>(doc: &'a Document, page: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut current = page;
    // Bounded walk; a malformed tree must not loop forever.
    for _ in 0..64 {
        let dict = doc.get_object(current).and_then(|o| o.as_dict()).ok()?;
        if let Ok(value) = dict.get(key) {
            return Some(value);
        }
        current = dict.get(b"Parent").and_then(|p| p.as_reference()).ok()?;
    }
    None
}

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> &'a Object {
    match obj {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(obj),
        other => other,
    }
}

fn number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(f) => Some(*f as f64),
        _ => None,
    }
}

/// Compare the deck with the produced PDF.
///
/// A deck with zero slide parts (unusual packaging) skips the count check.
pub fn compare(deck: &DeckMeta, pdf: &PdfMeta) -> Result<(), EngineError> {
    if pdf.page_count == 0 {
        return Err(EngineError::OutputValidation(
            "The converted PDF has no pages".into(),
        ));
    }
    if deck.slide_count > 0 && deck.slide_count != pdf.page_count {
        return Err(EngineError::OutputValidation(format!(
            "Page count mismatch (slides {}, PDF pages {})",
            deck.slide_count, pdf.page_count
        )));
    }
    let source_ratio = deck.width_pt / deck.height_pt;
    let output_ratio = pdf.width_pt / pdf.height_pt;
    let diff = (source_ratio - output_ratio).abs();
    if !diff.is_finite() || diff > ASPECT_RATIO_TOLERANCE {
        return Err(EngineError::OutputValidation(format!(
            "Page size ratio check failed (slide ratio {source_ratio:.3}, PDF ratio {output_ratio:.3})"
        )));
    }
    Ok(())
}

/// Validate a PPTX → PDF conversion from files on disk.
pub async fn validate_pptx_conversion(pptx: &Path, pdf: &Path) -> Result<(), EngineError> {
    let pptx_bytes = tokio::fs::read(pptx).await?;
    let pdf_bytes = tokio::fs::read(pdf).await?;
    let (deck, meta) = tokio::task::spawn_blocking(move || {
        Ok::<_, EngineError>((read_deck_meta(&pptx_bytes)?, read_pdf_meta(&pdf_bytes)?))
    })
    .await
    .map_err(|e| EngineError::Io(std::io::Error::other(e)))??;

    debug!(?deck, pdf = ?meta, "comparing PPTX with converted PDF");
    compare(&deck, &meta)?;
    info!(slides = deck.slide_count, pages = meta.page_count, "PPTX output validated");
    Ok(())
}
