//! Document loading: PDF, Word (docx), HTML and plain text.
//!
//! [`load`] dispatches on the file extension and returns the extracted
//! [`TextUnit`]s. Extraction never panics on malformed input; it returns
//! [`PipelineError::Load`] and the ingestion batch moves on to the next file.

use std::io::Read;
use std::path::Path;

use quick_xml::events::Event;
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::models::{Document, DocumentKind, SourceMetadata, TextUnit};

/// Maximum decompressed bytes read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Elements whose content is never user-visible text.
const HIDDEN_HTML_ELEMENTS: &[&str] = &["script", "style", "head", "noscript", "template"];

/// Elements that start a new block of text.
const BLOCK_HTML_ELEMENTS: &[&str] = &[
    "p", "div", "section", "article", "header", "footer", "main", "aside", "nav", "h1", "h2",
    "h3", "h4", "h5", "h6", "li", "ul", "ol", "table", "tr", "blockquote", "pre", "dl", "dt",
    "dd", "form", "hr", "title",
];

/// Resolve the [`Document`] for a path from its extension.
pub fn detect(path: &Path) -> Result<Document> {
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_default();

    match DocumentKind::from_extension(&extension) {
        Some(kind) => Ok(Document {
            path: path.to_path_buf(),
            kind,
        }),
        None => Err(PipelineError::UnsupportedFormat {
            path: path.to_path_buf(),
            extension: if extension.is_empty() {
                "(none)".to_string()
            } else {
                format!(".{}", extension.to_ascii_lowercase())
            },
        }),
    }
}

/// Load a file into text units tagged with its source metadata.
pub fn load(path: &Path) -> Result<Vec<TextUnit>> {
    let document = detect(path)?;
    let bytes = std::fs::read(path).map_err(|e| PipelineError::load(path, e))?;
    load_bytes(&document, &bytes)
}

/// Extract text units from the raw bytes of an already-detected document.
pub fn load_bytes(document: &Document, bytes: &[u8]) -> Result<Vec<TextUnit>> {
    let path = document.path.as_path();
    let pages: Vec<String> = match document.kind {
        DocumentKind::Pdf => extract_pdf_pages(bytes).map_err(|e| PipelineError::load(path, e))?,
        DocumentKind::Docx => vec![extract_docx(bytes).map_err(|e| PipelineError::load(path, e))?],
        DocumentKind::Html => vec![html_to_text(&decode_utf8(path, bytes)?)],
        DocumentKind::Txt => vec![decode_utf8(path, bytes)?],
    };

    let paginated = document.kind == DocumentKind::Pdf;
    let document_id = document.id();
    let units: Vec<TextUnit> = pages
        .into_iter()
        .enumerate()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(i, text)| TextUnit {
            text: text.trim().to_string(),
            source: SourceMetadata {
                document_id: document_id.clone(),
                kind: document.kind,
                page: paginated.then_some(i as u32 + 1),
            },
        })
        .collect();

    debug!(path = %path.display(), kind = document.kind.as_str(), units = units.len(), "loaded document");
    Ok(units)
}

fn decode_utf8(path: &Path, bytes: &[u8]) -> Result<String> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    String::from_utf8(bytes.to_vec())
        .map_err(|e| PipelineError::load(path, format!("invalid UTF-8: {}", e)))
}

/// Extract the text of each page. `pdf-extract` separates pages with form
/// feeds; a document without them yields a single page.
fn extract_pdf_pages(bytes: &[u8]) -> std::result::Result<Vec<String>, String> {
    let text = pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| format!("PDF extraction failed: {}", e))?;
    Ok(text.split('\u{c}').map(|page| page.to_string()).collect())
}

fn extract_docx(bytes: &[u8]) -> std::result::Result<String, String> {
    let mut archive =
        zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| e.to_string())?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| "word/document.xml not found".to_string())?;

    let mut xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut xml)
        .map_err(|e| e.to_string())?;
    if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err("word/document.xml exceeds size limit".to_string());
    }

    extract_word_paragraphs(&xml)
}

/// Collect `w:t` runs, turning paragraph ends into blank lines so the
/// chunker can split on them.
fn extract_word_paragraphs(xml: &[u8]) -> std::result::Result<String, String> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                let text = te.unescape().map_err(|e| e.to_string())?;
                out.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push_str("\n\n"),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => out.push('\t'),
                b"br" | b"cr" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }

    Ok(out.trim().to_string())
}

/// Strip markup from an HTML document, keeping visible text with block
/// elements separated by blank lines.
pub fn html_to_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len() / 2);
    let mut rest = html;

    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix("<!--") {
            rest = match after.find("-->") {
                Some(end) => &after[end + 3..],
                None => "",
            };
            continue;
        }

        let Some(open) = rest.find('<') else {
            out.push_str(&decode_entities(rest));
            break;
        };
        if open > 0 {
            out.push_str(&decode_entities(&rest[..open]));
            rest = &rest[open..];
            continue;
        }

        // A `<` not followed by a tag name is literal text.
        let starts_tag = rest[1..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '/' || c == '!' || c == '?');
        if !starts_tag {
            out.push('<');
            rest = &rest[1..];
            continue;
        }

        let Some(close) = rest.find('>') else {
            break;
        };
        let tag = &rest[1..close];
        rest = &rest[close + 1..];

        let is_closing = tag.starts_with('/');
        let name = tag
            .trim_start_matches('/')
            .split(|c: char| c.is_whitespace() || c == '/')
            .next()
            .unwrap_or("")
            .to_ascii_lowercase();

        if !is_closing && !tag.ends_with('/') && HIDDEN_HTML_ELEMENTS.contains(&name.as_str()) {
            let closing = format!("</{}", name);
            rest = match rest.to_ascii_lowercase().find(&closing) {
                Some(pos) => {
                    let after = &rest[pos..];
                    after.find('>').map(|end| &after[end + 1..]).unwrap_or("")
                }
                None => "",
            };
            continue;
        }

        if name == "br" {
            out.push('\n');
        } else if BLOCK_HTML_ELEMENTS.contains(&name.as_str()) {
            out.push_str("\n\n");
        } else if name == "td" || name == "th" {
            out.push(' ');
        }
    }

    normalize_whitespace(&out)
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];

        let decoded = rest.find(';').filter(|&end| end <= 10).and_then(|end| {
            let entity = &rest[1..end];
            let ch = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some(' '),
                _ => entity
                    .strip_prefix("#x")
                    .or_else(|| entity.strip_prefix("#X"))
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|d| d.parse().ok()))
                    .and_then(char::from_u32),
            };
            ch.map(|c| (c, end))
        });

        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &rest[end + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Collapse runs of spaces within lines and runs of blank lines between
/// paragraphs.
fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_blank = false;

    for line in text.lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            pending_blank = !out.is_empty();
            continue;
        }
        if !out.is_empty() {
            out.push_str(if pending_blank { "\n\n" } else { "\n" });
        }
        out.push_str(&collapsed);
        pending_blank = false;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn doc(name: &str) -> Document {
        detect(Path::new(name)).unwrap()
    }

    #[test]
    fn unsupported_extension_returns_error() {
        let err = detect(Path::new("timetable.xlsx")).unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedFormat { ref extension, .. } if extension == ".xlsx"));
        let err = detect(Path::new("README")).unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedFormat { .. }));
    }

    #[test]
    fn extension_detection_is_case_insensitive() {
        assert_eq!(doc("Brochure.PDF").kind, DocumentKind::Pdf);
        assert_eq!(doc("index.HTM").kind, DocumentKind::Html);
    }

    #[test]
    fn invalid_pdf_returns_load_error() {
        let err = load_bytes(&doc("x.pdf"), b"not a pdf").unwrap_err();
        assert!(matches!(err, PipelineError::Load { .. }));
    }

    #[test]
    fn invalid_zip_returns_load_error_for_docx() {
        let err = load_bytes(&doc("x.docx"), b"not a zip").unwrap_err();
        assert!(matches!(err, PipelineError::Load { .. }));
    }

    #[test]
    fn invalid_utf8_text_returns_load_error() {
        let err = load_bytes(&doc("x.txt"), &[0x66, 0xff, 0xfe, 0x67]).unwrap_err();
        assert!(matches!(err, PipelineError::Load { .. }));
    }

    #[test]
    fn text_unit_carries_metadata() {
        let units = load_bytes(
            &doc("data/library.txt"),
            b"\xEF\xBB\xBFThe library is open from 9 AM to 7 PM.\n",
        )
        .unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].text, "The library is open from 9 AM to 7 PM.");
        assert_eq!(units[0].source.document_id, "data/library.txt");
        assert_eq!(units[0].source.kind, DocumentKind::Txt);
        assert_eq!(units[0].source.page, None);
    }

    #[test]
    fn blank_text_yields_no_units() {
        let units = load_bytes(&doc("empty.txt"), b"  \n\n ").unwrap();
        assert!(units.is_empty());
    }

    #[test]
    fn word_paragraphs_become_blank_lines() {
        let xml = br#"<?xml version="1.0"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body><w:p><w:r><w:t>Hostel fees</w:t></w:r><w:r><w:t xml:space="preserve"> are due in July.</w:t></w:r></w:p><w:p><w:r><w:t>Mess &amp; laundry extra.</w:t></w:r></w:p></w:body></w:document>"#;
        let text = extract_word_paragraphs(xml).unwrap();
        assert_eq!(text, "Hostel fees are due in July.\n\nMess & laundry extra.");
    }

    #[test]
    fn html_drops_scripts_and_keeps_blocks() {
        let html = r#"<html><head><title>Ignored</title><style>p { color: red }</style></head>
            <body><script>var x = "<p>";</script><h1>Library</h1>
            <p>Open 9&nbsp;AM &ndash; 7 PM &amp; weekends.</p><!-- hidden --><p>Call&#32;ext.&#x34;2</p></body></html>"#;
        let text = html_to_text(html);
        assert!(!text.contains("Ignored"));
        assert!(!text.contains("var x"));
        assert!(!text.contains("hidden"));
        assert!(!text.contains('<'));
        assert!(text.contains("Library\n\nOpen 9 AM &ndash; 7 PM & weekends."));
        assert!(text.contains("Call ext.42"));
    }

    #[test]
    fn html_bare_less_than_is_text() {
        let text = html_to_text(
            "<p>Students scoring < 40 marks must re-register.</p><p>Fee: 5000 INR</p><p>a<3 b</p>",
        );
        assert_eq!(
            text,
            "Students scoring < 40 marks must re-register.\n\nFee: 5000 INR\n\na<3 b"
        );
    }

    #[test]
    fn html_line_breaks_and_cells() {
        let text = html_to_text("<table><tr><td>Fee</td><td>Amount</td></tr></table>Line one<br/>Line two");
        assert!(text.contains("Fee Amount"));
        assert!(text.contains("Line one\nLine two"));
    }

    #[test]
    fn load_missing_file_is_load_error() {
        let err = load(&PathBuf::from("/nonexistent/dir/prospectus.txt")).unwrap_err();
        assert!(matches!(err, PipelineError::Load { .. }));
    }
}
