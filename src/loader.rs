//! Page-aware text extraction for uploaded documents.
//!
//! The declared filename selects the format; the bytes are then parsed into
//! one [`PageRecord`] per page, numbered from 1 in source order:
//!
//! - **PDF** via `pdf-extract`, one record per page.
//! - **PPTX** via `zip` + `quick-xml`, one record per slide (ordered by the
//!   slide number in `ppt/slides/slideN.xml`).
//!
//! Page text is whitespace-trimmed. A document with no pages yields an empty
//! vector; anything that cannot be parsed is a [`RagError::Load`].

use std::io::Read;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::error::RagError;
use crate::models::PageRecord;
use crate::tenant::TenantId;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Pptx,
}

impl DocumentFormat {
    /// Resolve the format from a declared filename's extension.
    pub fn from_filename(filename: &str) -> Option<Self> {
        let ext = std::path::Path::new(filename)
            .extension()?
            .to_str()?
            .to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(DocumentFormat::Pdf),
            "pptx" => Some(DocumentFormat::Pptx),
            _ => None,
        }
    }
}

/// Parse `bytes` into page records owned by `tenant`.
pub fn load_pages(
    bytes: &[u8],
    filename: &str,
    tenant: &TenantId,
) -> Result<Vec<PageRecord>, RagError> {
    let format = DocumentFormat::from_filename(filename)
        .ok_or_else(|| RagError::Load(format!("unsupported file type: {}", filename)))?;

    let pages = match format {
        DocumentFormat::Pdf => pdf_pages(bytes)?,
        DocumentFormat::Pptx => pptx_pages(bytes)?,
    };

    let records: Vec<PageRecord> = pages
        .into_iter()
        .enumerate()
        .map(|(i, text)| PageRecord {
            page_number: i as u32 + 1,
            text: text.trim().to_string(),
            tenant_id: tenant.clone(),
        })
        .collect();

    tracing::info!(
        tenant = %tenant,
        filename,
        pages = records.len(),
        "documents loaded"
    );
    Ok(records)
}

fn pdf_pages(bytes: &[u8]) -> Result<Vec<String>, RagError> {
    // pdf-extract panics on some malformed inputs instead of returning an error.
    match catch_unwind(AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem_by_pages(bytes)
    })) {
        Ok(Ok(pages)) => Ok(pages),
        Ok(Err(e)) => Err(RagError::Load(format!("PDF extraction failed: {}", e))),
        Err(_) => Err(RagError::Load("PDF extraction failed: malformed document".into())),
    }
}

fn pptx_pages(bytes: &[u8]) -> Result<Vec<String>, RagError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| RagError::Load(format!("PPTX extraction failed: {}", e)))?;
    let mut slide_names: Vec<(u32, String)> = archive
        .file_names()
        .filter(|n| n.starts_with("ppt/slides/slide") && n.ends_with(".xml"))
        .filter_map(|n| {
            n.trim_start_matches("ppt/slides/slide")
                .trim_end_matches(".xml")
                .parse::<u32>()
                .ok()
                .map(|num| (num, n.to_string()))
        })
        .collect();
    slide_names.sort_by_key(|(num, _)| *num);

    let mut pages = Vec::with_capacity(slide_names.len());
    for (_, name) in slide_names {
        let xml = read_zip_entry_bounded(&mut archive, &name)?;
        pages.push(extract_a_t_elements(&xml)?);
    }
    Ok(pages)
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
) -> Result<Vec<u8>, RagError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| RagError::Load(e.to_string()))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| RagError::Load(e.to_string()))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(RagError::Load(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

/// Collect `<a:t>` runs of one slide. Runs inside a paragraph are
/// concatenated; paragraphs are separated by newlines.
fn extract_a_t_elements(xml: &[u8]) -> Result<String, RagError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| RagError::Load(format!("PPTX extraction failed: {}", e)))?;
                out.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" if !out.is_empty() && !out.ends_with('\n') => out.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(RagError::Load(format!("PPTX extraction failed: {}", e))),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant() -> TenantId {
        TenantId::new("T1").unwrap()
    }

    #[test]
    fn format_from_extension() {
        assert_eq!(DocumentFormat::from_filename("a.pdf"), Some(DocumentFormat::Pdf));
        assert_eq!(DocumentFormat::from_filename("Deck.PPTX"), Some(DocumentFormat::Pptx));
        assert_eq!(DocumentFormat::from_filename("notes.txt"), None);
        assert_eq!(DocumentFormat::from_filename("pdf"), None);
    }

    #[test]
    fn unsupported_extension_is_load_error() {
        let err = load_pages(b"hello", "notes.txt", &tenant()).unwrap_err();
        assert!(matches!(err, RagError::Load(_)));
    }

    #[test]
    fn invalid_pdf_is_load_error() {
        let err = load_pages(b"not a pdf", "doc.pdf", &tenant()).unwrap_err();
        assert!(matches!(err, RagError::Load(_)));
    }

    #[test]
    fn truncated_pdf_is_load_error() {
        let err = load_pages(b"%PDF-1.4\n1 0 obj << /Type", "doc.pdf", &tenant()).unwrap_err();
        assert!(matches!(err, RagError::Load(_)));
    }

    #[test]
    fn invalid_pptx_is_load_error() {
        let err = load_pages(b"not a zip", "deck.pptx", &tenant()).unwrap_err();
        assert!(matches!(err, RagError::Load(_)));
    }

    fn minimal_pptx(slides: &[(u32, &str)]) -> Vec<u8> {
        use std::io::Write;
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            for (num, text) in slides {
                zip.start_file(
                    format!("ppt/slides/slide{}.xml", num),
                    zip::write::SimpleFileOptions::default(),
                )
                .unwrap();
                let xml = format!(
                    "<?xml version=\"1.0\"?><p:sld xmlns:a=\"http://schemas.openxmlformats.org/drawingml/2006/main\" xmlns:p=\"http://schemas.openxmlformats.org/presentationml/2006/main\"><p:cSld><p:spTree><p:sp><p:txBody><a:p><a:r><a:t>{}</a:t></a:r></a:p></p:txBody></p:sp></p:spTree></p:cSld></p:sld>",
                    text
                );
                zip.write_all(xml.as_bytes()).unwrap();
            }
            zip.start_file("ppt/slides/_rels/slide1.xml.rels", zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(b"<Relationships/>").unwrap();
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn slides_are_pages_in_numeric_order() {
        let bytes = minimal_pptx(&[(10, "tenth"), (2, "second"), (1, "first &amp; best")]);
        let pages = load_pages(&bytes, "deck.pptx", &tenant()).unwrap();
        let texts: Vec<&str> = pages.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(texts, vec!["first & best", "second", "tenth"]);
        let numbers: Vec<u32> = pages.iter().map(|p| p.page_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert!(pages.iter().all(|p| p.tenant_id == tenant()));
    }

    #[test]
    fn slide_paragraphs_become_lines() {
        let xml = br#"<p:sld xmlns:a="a" xmlns:p="p"><a:p><a:r><a:t>Hello </a:t></a:r><a:r><a:t>world</a:t></a:r></a:p><a:p><a:r><a:t>Second</a:t></a:r></a:p></p:sld>"#;
        let text = extract_a_t_elements(xml).unwrap();
        assert_eq!(text, "Hello world\nSecond\n");
    }
}
