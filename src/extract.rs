//! Page-addressable text extraction for uploaded documents.
//!
//! Every supported format is split into physical pages (PDF pages, PPTX
//! slides, form-feed separated text). Page text is returned exactly as the
//! parser produced it: no trimming, no whitespace collapsing. Citation
//! quotes are later matched against this text, so any normalization here
//! would silently break highlighting.

use std::io::Read;

use crate::error::ExtractionError;
use crate::models::{Document, PageText};

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
/// Maximum slides to process in a pptx.
const PPTX_MAX_SLIDES: usize = 2_000;

const PAGE_BREAK: char = '\u{000C}';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Pptx,
    PlainText,
}

impl DocumentKind {
    /// Detects the format from the file extension.
    pub fn from_file_name(file_name: &str) -> Result<Self, ExtractionError> {
        let ext = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "pdf" => Ok(DocumentKind::Pdf),
            "pptx" => Ok(DocumentKind::Pptx),
            "txt" | "text" | "md" | "markdown" => Ok(DocumentKind::PlainText),
            _ => Err(ExtractionError::UnsupportedContentType(
                file_name.to_string(),
            )),
        }
    }
}

/// Splits a document into pages.
///
/// Fails when the bytes cannot be parsed or when no page carries any
/// non-whitespace text.
pub fn extract(bytes: &[u8], file_name: &str) -> Result<Document, ExtractionError> {
    let raw_pages = match DocumentKind::from_file_name(file_name)? {
        DocumentKind::Pdf => extract_pdf_pages(bytes)?,
        DocumentKind::Pptx => extract_pptx_slides(bytes)?,
        DocumentKind::PlainText => extract_text_pages(bytes)?,
    };

    if raw_pages.iter().all(|text| text.trim().is_empty()) {
        return Err(ExtractionError::NoPages(file_name.to_string()));
    }

    let pages = raw_pages
        .into_iter()
        .enumerate()
        .map(|(index, text)| PageText {
            page_number: index as u32 + 1,
            text,
        })
        .collect();

    Ok(Document {
        file_name: file_name.to_string(),
        pages,
    })
}

/// Text of a single 1-based page, used when re-opening a page for viewing.
pub fn extract_page(
    bytes: &[u8],
    file_name: &str,
    page_number: u32,
) -> Result<Option<String>, ExtractionError> {
    let document = extract(bytes, file_name)?;
    Ok(document
        .pages
        .into_iter()
        .find(|page| page.page_number == page_number)
        .map(|page| page.text))
}

fn extract_pdf_pages(bytes: &[u8]) -> Result<Vec<String>, ExtractionError> {
    pdf_extract::extract_text_from_mem_by_pages(bytes).map_err(|e| ExtractionError::Pdf(e.to_string()))
}

fn extract_text_pages(bytes: &[u8]) -> Result<Vec<String>, ExtractionError> {
    let text = std::str::from_utf8(bytes).map_err(|e| ExtractionError::Encoding(e.to_string()))?;
    Ok(text.split(PAGE_BREAK).map(str::to_string).collect())
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractionError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractionError::Ooxml(e.to_string()))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractionError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractionError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

fn extract_pptx_slides(bytes: &[u8]) -> Result<Vec<String>, ExtractionError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractionError::Ooxml(e.to_string()))?;
    let mut slide_names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("ppt/slides/slide") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    slide_names.sort_by_key(|name| {
        name.trim_start_matches("ppt/slides/slide")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });

    let mut slides = Vec::with_capacity(slide_names.len());
    for name in slide_names.into_iter().take(PPTX_MAX_SLIDES) {
        let xml = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)?;
        slides.push(extract_slide_paragraphs(&xml)?);
    }
    Ok(slides)
}

/// Concatenates `<a:t>` runs, one line per `<a:p>` paragraph.
fn extract_slide_paragraphs(xml: &[u8]) -> Result<String, ExtractionError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut paragraph = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractionError::Ooxml(e.to_string()))?;
                paragraph.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    if !paragraph.is_empty() {
                        if !out.is_empty() {
                            out.push('\n');
                        }
                        out.push_str(&paragraph);
                        paragraph.clear();
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractionError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}
