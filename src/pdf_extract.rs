// src/pdf_extract.rs

use lopdf::content::Content;
use lopdf::{Document, Object, StringFormat};
use std::panic::{AssertUnwindSafe, catch_unwind};
use tracing::{debug, info, warn};

/// Result of attempting to read the text layer of a PDF.
#[derive(Debug)]
pub enum PdfContent {
    /// The PDF contains extractable text.
    Text(String),
    /// Too little embedded text; scanned or image-only, needs OCR.
    ScannedImage { chars: usize },
    /// The file could not be parsed.
    Error(String),
}

/// Vertical movement (text space units) that starts a new output line.
const LINE_TOLERANCE: f32 = 2.0;

/// TJ kerning adjustments more negative than this read as a word gap.
const TJ_SPACE_THRESHOLD: f32 = -200.0;

/// Non-whitespace characters, the unit the scanned-PDF threshold counts.
pub fn meaningful_chars(text: &str) -> usize {
    text.chars().filter(|c| !c.is_whitespace()).count()
}

/// Main entry point: takes raw PDF bytes and returns `PdfContent`.
///
/// Phase 1 walks each page's content stream and rebuilds lines from the
/// vertical position of text runs. If that yields too little, phase 2 asks
/// `pdf-extract` (which understands more font encodings) and keeps whichever
/// recovered more.
pub fn extract_text_from_pdf(pdf_bytes: &[u8], min_chars: usize) -> PdfContent {
    let doc = match Document::load_mem(pdf_bytes) {
        Ok(d) => d,
        Err(e) => return PdfContent::Error(format!("Failed to parse PDF: {e}")),
    };

    let layout_text = layout_text(&doc);
    let layout_chars = meaningful_chars(&layout_text);
    if layout_chars >= min_chars && printable_ratio(&layout_text) >= 0.8 {
        info!(chars = layout_chars, "Text extracted from content streams");
        return PdfContent::Text(layout_text);
    }

    let fallback = match catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text_from_mem(pdf_bytes))) {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            warn!(error = %e, "pdf-extract failed, may be scanned or corrupted");
            String::new()
        }
        Err(_) => {
            warn!("pdf-extract panicked, ignoring its output");
            String::new()
        }
    };

    let best = if alnum_count(&fallback) > alnum_count(&layout_text) {
        fallback
    } else {
        layout_text
    };
    let chars = meaningful_chars(&best);
    if chars < min_chars {
        info!(chars, min_chars, "Extracted text too short, treating as scanned");
        PdfContent::ScannedImage { chars }
    } else {
        info!(chars, "Text extracted successfully");
        PdfContent::Text(best)
    }
}

fn alnum_count(text: &str) -> usize {
    text.chars().filter(|c| c.is_alphanumeric()).count()
}

fn printable_ratio(text: &str) -> f64 {
    let total = meaningful_chars(text);
    if total == 0 {
        return 0.0;
    }
    let printable = text
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control() && *c != '\u{fffd}')
        .count();
    printable as f64 / total as f64
}

/// All pages, separated by a blank line.
fn layout_text(doc: &Document) -> String {
    let mut pages = Vec::new();
    for (page_num, page_id) in doc.get_pages() {
        let content = match doc.get_page_content(page_id).and_then(|c| Content::decode(&c)) {
            Ok(c) => c,
            Err(e) => {
                debug!(page = page_num, error = %e, "Could not decode page content");
                continue;
            }
        };
        let text = page_text(&content);
        if !text.trim().is_empty() {
            pages.push(text);
        }
    }
    pages.join("\n\n")
}

/// Tracks where the last text run was placed so runs can be joined with a
/// space (same line) or a newline (moved vertically).
#[derive(Default)]
struct LineBuilder {
    out: String,
    y: f32,
    line_y: f32,
    leading: f32,
    last_y: Option<f32>,
    repositioned: bool,
}

impl LineBuilder {
    fn move_to(&mut self, y: f32) {
        self.y = y;
        self.line_y = y;
        self.repositioned = true;
    }

    fn next_line(&mut self) {
        let y = self.line_y - self.leading.max(LINE_TOLERANCE + 1.0);
        self.move_to(y);
    }

    fn show(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        match self.last_y {
            Some(last) if (last - self.y).abs() > LINE_TOLERANCE => self.out.push('\n'),
            Some(_) if self.repositioned && !self.out.ends_with([' ', '\n']) => self.out.push(' '),
            _ => {}
        }
        self.out.push_str(text);
        self.last_y = Some(self.y);
        self.repositioned = false;
    }
}

fn page_text(content: &Content) -> String {
    let mut b = LineBuilder::default();

    for op in &content.operations {
        let args = &op.operands;
        match op.operator.as_str() {
            "BT" => {
                b.y = 0.0;
                b.line_y = 0.0;
            }
            "Tm" => {
                if let Some(y) = args.get(5).and_then(number) {
                    b.move_to(y);
                }
            }
            "Td" => {
                if let Some(ty) = args.get(1).and_then(number) {
                    b.move_to(b.line_y + ty);
                }
            }
            "TD" => {
                if let Some(ty) = args.get(1).and_then(number) {
                    b.leading = -ty;
                    b.move_to(b.line_y + ty);
                }
            }
            "TL" => {
                if let Some(l) = args.first().and_then(number) {
                    b.leading = l;
                }
            }
            "T*" => b.next_line(),
            "Tj" => {
                if let Some(s) = args.first().and_then(string_text) {
                    b.show(&s);
                }
            }
            "'" => {
                b.next_line();
                if let Some(s) = args.first().and_then(string_text) {
                    b.show(&s);
                }
            }
            "\"" => {
                b.next_line();
                if let Some(s) = args.get(2).and_then(string_text) {
                    b.show(&s);
                }
            }
            "TJ" => {
                if let Some(Object::Array(items)) = args.first() {
                    let mut run = String::new();
                    for item in items {
                        match item {
                            Object::String(..) => {
                                if let Some(s) = string_text(item) {
                                    run.push_str(&s);
                                }
                            }
                            other => {
                                if number(other).is_some_and(|n| n < TJ_SPACE_THRESHOLD)
                                    && !run.ends_with(' ')
                                {
                                    run.push(' ');
                                }
                            }
                        }
                    }
                    b.show(&run);
                }
            }
            _ => {}
        }
    }
    b.out
}

fn number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r as f32),
        _ => None,
    }
}

/// Decode a PDF string operand: UTF-16BE when it carries a BOM, otherwise
/// one byte per character (covers the standard single-byte encodings for
/// ASCII text).
fn string_text(obj: &Object) -> Option<String> {
    let Object::String(bytes, format) = obj else {
        return None;
    };
    if bytes.starts_with(&[0xFE, 0xFF]) {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        return Some(String::from_utf16_lossy(&units));
    }
    if matches!(format, StringFormat::Hexadecimal)
        && bytes.len() % 2 == 0
        && bytes.iter().step_by(2).all(|b| *b == 0)
    {
        // Two-byte codes with a zero high byte: treat as UTF-16 without BOM.
        return Some(bytes.chunks_exact(2).map(|c| c[1] as char).collect());
    }
    Some(bytes.iter().map(|&b| b as char).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::tests::make_pdf;
    use lopdf::content::Operation;

    #[test]
    fn test_garbage_bytes() {
        let result = extract_text_from_pdf(b"this is not a pdf", 50);
        assert!(matches!(result, PdfContent::Error(_)));
    }

    #[test]
    fn test_lines_follow_vertical_position() {
        let bytes = make_pdf(&[&[
            "Invoice #INV-2024-001",
            "Date: 03/15/2024",
            "Acme Corp",
            "Widget A 2 25.00 50.00",
            "Total: $54.00",
        ]]);
        match extract_text_from_pdf(&bytes, 50) {
            PdfContent::Text(text) => {
                let lines: Vec<&str> = text.lines().map(str::trim).collect();
                assert_eq!(lines[0], "Invoice #INV-2024-001");
                assert_eq!(lines[2], "Acme Corp");
                assert_eq!(lines[4], "Total: $54.00");
            }
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[test]
    fn test_short_text_is_scanned() {
        let bytes = make_pdf(&[&["Scan 1"]]);
        assert!(matches!(
            extract_text_from_pdf(&bytes, 50),
            PdfContent::ScannedImage { .. }
        ));
    }

    #[test]
    fn test_same_line_runs_joined_with_space() {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Td", vec![Object::Integer(50), Object::Integer(700)]),
                Operation::new("Tj", vec![Object::string_literal("Widget A")]),
                Operation::new("Td", vec![Object::Integer(200), Object::Integer(0)]),
                Operation::new("Tj", vec![Object::string_literal("50.00")]),
                Operation::new("Td", vec![Object::Integer(-200), Object::Integer(-14)]),
                Operation::new(
                    "TJ",
                    vec![Object::Array(vec![
                        Object::string_literal("Sub"),
                        Object::Integer(-20),
                        Object::string_literal("total"),
                        Object::Integer(-400),
                        Object::string_literal("50.00"),
                    ])],
                ),
                Operation::new("ET", vec![]),
            ],
        };
        assert_eq!(page_text(&content), "Widget A 50.00\nSubtotal 50.00");
    }

    #[test]
    fn test_utf16_strings() {
        let obj = Object::String(vec![0xFE, 0xFF, 0x00, b'H', 0x00, b'i'], StringFormat::Literal);
        assert_eq!(string_text(&obj).as_deref(), Some("Hi"));
    }
}
