//! PDF reading: optional external Markdown conversion, otherwise native page-aware extraction.
//!
//! The native path extracts each page separately with `lopdf`, joins the pages with a single
//! newline, splits the body and labels every chunk with the page its first character falls on.
//! Page labels honour the document's `/PageLabels` tree (roman numerals, letters, prefixes) and
//! fall back to 1-based page numbers.
//!
//! When enhanced conversion is enabled the external tool is tried first. A successful conversion
//! is read as Markdown and carries no page labels; any failure falls through to the native path.

use super::page_tracker::{PageTracker, PdfPage};
use super::{ReaderContext, ReaderError, file_name_of, metadata, read_bytes, split_body, text};
use crate::types::Chunk;
use lopdf::{Dictionary, Document, Object};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Maximum nesting followed inside the `/PageLabels` number tree.
const MAX_LABEL_TREE_DEPTH: usize = 32;

/// Largest value rendered as roman numerals or letters; larger values print as decimals.
const MAX_STYLED_LABEL_VALUE: i64 = 100_000;

/// Settings for the external PDF-to-Markdown converter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnhancedPdfConfig {
    /// Whether conversion is attempted at all.
    pub enabled: bool,
    /// Converter executable, invoked as
    /// `<command> -v --abort-on-error --to md --output <dir> <file>`.
    pub command: String,
}

impl Default for EnhancedPdfConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            command: "docling".to_string(),
        }
    }
}

/// Outcome of the enhanced conversion attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnhancedConversion {
    /// Conversion is switched off.
    Disabled,
    /// The tool exited successfully and produced this Markdown file.
    Succeeded(PathBuf),
    /// The tool could not be run, failed, or produced no output.
    Failed(String),
}

/// Run the external converter for `path` and classify the result.
pub fn attempt_conversion(config: &EnhancedPdfConfig, path: &Path) -> EnhancedConversion {
    if !config.enabled {
        return EnhancedConversion::Disabled;
    }

    let parent = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let expected = parent.join(format!("{stem}.md"));

    tracing::debug!(
        command = %config.command,
        path = %path.display(),
        "Attempting enhanced PDF conversion"
    );
    let status = Command::new(&config.command)
        .arg("-v")
        .arg("--abort-on-error")
        .args(["--to", "md"])
        .arg("--output")
        .arg(&parent)
        .arg(path)
        .status();

    match status {
        Err(error) => EnhancedConversion::Failed(format!("failed to spawn converter: {error}")),
        Ok(status) if !status.success() => {
            EnhancedConversion::Failed(format!("converter exited with {status}"))
        }
        Ok(_) if !expected.is_file() => EnhancedConversion::Failed(format!(
            "converter produced no output at {}",
            expected.display()
        )),
        Ok(_) => EnhancedConversion::Succeeded(expected),
    }
}

pub(super) fn load(ctx: &ReaderContext, path: &Path) -> Result<Vec<Chunk>, ReaderError> {
    let file_name = file_name_of(path);

    match attempt_conversion(&ctx.enhanced_pdf, path) {
        EnhancedConversion::Succeeded(markdown) => {
            let mut chunks = text::load(ctx, &markdown)?;
            metadata::stamp(&mut chunks, ctx, &file_name);
            tracing::info!(
                path = %path.display(),
                chunks = chunks.len(),
                "Enhanced PDF conversion succeeded; chunks carry no page labels"
            );
            return Ok(chunks);
        }
        EnhancedConversion::Failed(reason) => {
            tracing::warn!(
                path = %path.display(),
                reason = %reason,
                "Enhanced PDF conversion failed; using native extraction"
            );
        }
        EnhancedConversion::Disabled => {}
    }

    let pages = extract_pages(&read_bytes(path)?)?;
    if pages.is_empty() {
        tracing::debug!(path = %path.display(), "PDF has no pages");
        return Ok(Vec::new());
    }

    let tracker = PageTracker::new(pages)?;
    let mut chunks = split_body(ctx, tracker.body(), &file_name)?;
    tracker.label_chunks(&mut chunks);
    Ok(chunks)
}

/// Extract the text and label of every page, in page order.
pub fn extract_pages(bytes: &[u8]) -> Result<Vec<PdfPage>, ReaderError> {
    let document = Document::load_mem(bytes).map_err(|e| ReaderError::Pdf(e.to_string()))?;
    let page_numbers: Vec<u32> = document.get_pages().keys().copied().collect();
    let labels = page_labels(&document, page_numbers.len());

    collect_pages(page_numbers, labels, |page_number| {
        document.extract_text(&[page_number])
    })
}

/// Pair page texts with labels; the first page that fails to extract fails the document.
fn collect_pages<E, F>(
    page_numbers: Vec<u32>,
    labels: Vec<String>,
    mut extract: F,
) -> Result<Vec<PdfPage>, ReaderError>
where
    E: std::fmt::Display,
    F: FnMut(u32) -> Result<String, E>,
{
    page_numbers
        .into_iter()
        .zip(labels)
        .map(|(page_number, label)| {
            let text = extract(page_number).map_err(|error| {
                tracing::error!(page = page_number, error = %error, "Failed to extract page text");
                ReaderError::Pdf(format!("page {page_number}: {error}"))
            })?;
            Ok(PdfPage { label, text })
        })
        .collect()
}

/// One `/PageLabels` range: applies from `first_page` (0-based) until the next range.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LabelRange {
    first_page: usize,
    style: Option<u8>,
    prefix: String,
    start: i64,
}

impl LabelRange {
    fn label_for(&self, page_index: usize) -> String {
        let offset = i64::try_from(page_index.saturating_sub(self.first_page)).unwrap_or(i64::MAX);
        let value = self.start.saturating_add(offset);
        let styled = (1..=MAX_STYLED_LABEL_VALUE).contains(&value);
        let number = match self.style {
            Some(b'D') => value.to_string(),
            Some(b'R' | b'r' | b'A' | b'a') if !styled => value.to_string(),
            Some(b'R') => to_roman(value),
            Some(b'r') => to_roman(value).to_lowercase(),
            Some(b'A') => to_letters(value),
            Some(b'a') => to_letters(value).to_lowercase(),
            _ => String::new(),
        };
        format!("{}{number}", self.prefix)
    }
}

/// Labels for `page_count` pages, decimal page numbers where no label range applies.
fn page_labels(document: &Document, page_count: usize) -> Vec<String> {
    let mut ranges = label_ranges(document);
    ranges.sort_by_key(|range| range.first_page);

    (0..page_count)
        .map(|index| {
            ranges
                .iter()
                .rev()
                .find(|range| range.first_page <= index)
                .map(|range| range.label_for(index))
                .filter(|label| !label.is_empty())
                .unwrap_or_else(|| (index + 1).to_string())
        })
        .collect()
}

fn label_ranges(document: &Document) -> Vec<LabelRange> {
    let Ok(catalog) = document.catalog() else {
        return Vec::new();
    };
    let Some(tree) = catalog
        .get(b"PageLabels")
        .ok()
        .and_then(|object| as_dict(document, object))
    else {
        return Vec::new();
    };

    let mut ranges = Vec::new();
    collect_number_tree(document, tree, 0, &mut ranges);
    ranges
}

fn collect_number_tree(
    document: &Document,
    node: &Dictionary,
    depth: usize,
    ranges: &mut Vec<LabelRange>,
) {
    if depth > MAX_LABEL_TREE_DEPTH {
        tracing::debug!("Page label tree too deep; ignoring remaining nodes");
        return;
    }

    if let Some(nums) = node
        .get(b"Nums")
        .ok()
        .and_then(|object| as_array(document, object))
    {
        for pair in nums.chunks(2) {
            let [key, value] = pair else { continue };
            let (Some(first_page), Some(entry)) =
                (as_integer(document, key), as_dict(document, value))
            else {
                continue;
            };
            let Ok(first_page) = usize::try_from(first_page) else {
                continue;
            };
            ranges.push(parse_label_entry(document, first_page, entry));
        }
    }

    if let Some(kids) = node
        .get(b"Kids")
        .ok()
        .and_then(|object| as_array(document, object))
    {
        for kid in kids {
            if let Some(child) = as_dict(document, kid) {
                collect_number_tree(document, child, depth + 1, ranges);
            }
        }
    }
}

fn parse_label_entry(document: &Document, first_page: usize, entry: &Dictionary) -> LabelRange {
    let style = entry
        .get(b"S")
        .ok()
        .and_then(|object| match resolve(document, object) {
            Some(Object::Name(name)) => name.first().copied(),
            _ => None,
        });
    let prefix = entry
        .get(b"P")
        .ok()
        .and_then(|object| match resolve(document, object) {
            Some(Object::String(bytes, _)) => Some(decode_text_string(bytes)),
            _ => None,
        })
        .unwrap_or_default();
    let start = entry
        .get(b"St")
        .ok()
        .and_then(|object| as_integer(document, object))
        .filter(|start| *start >= 1)
        .unwrap_or(1);

    LabelRange {
        first_page,
        style,
        prefix,
        start,
    }
}

fn resolve<'a>(document: &'a Document, object: &'a Object) -> Option<&'a Object> {
    match object {
        Object::Reference(id) => document.get_object(*id).ok(),
        other => Some(other),
    }
}

fn as_dict<'a>(document: &'a Document, object: &'a Object) -> Option<&'a Dictionary> {
    match resolve(document, object)? {
        Object::Dictionary(dict) => Some(dict),
        _ => None,
    }
}

fn as_array<'a>(document: &'a Document, object: &'a Object) -> Option<&'a Vec<Object>> {
    match resolve(document, object)? {
        Object::Array(items) => Some(items),
        _ => None,
    }
}

fn as_integer(document: &Document, object: &Object) -> Option<i64> {
    match resolve(document, object)? {
        Object::Integer(value) => Some(*value),
        _ => None,
    }
}

/// Decode a PDF text string: UTF-16BE with a byte order mark, otherwise single-byte.
fn decode_text_string(bytes: &[u8]) -> String {
    if let Some(utf16) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = utf16
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        bytes.iter().map(|byte| char::from(*byte)).collect()
    }
}

fn to_roman(value: i64) -> String {
    const NUMERALS: [(i64, &str); 13] = [
        (1000, "M"),
        (900, "CM"),
        (500, "D"),
        (400, "CD"),
        (100, "C"),
        (90, "XC"),
        (50, "L"),
        (40, "XL"),
        (10, "X"),
        (9, "IX"),
        (5, "V"),
        (4, "IV"),
        (1, "I"),
    ];
    if value < 1 {
        return value.to_string();
    }
    let mut remaining = value;
    let mut out = String::new();
    for (amount, numeral) in NUMERALS {
        while remaining >= amount {
            out.push_str(numeral);
            remaining -= amount;
        }
    }
    out
}

/// A..Z, then AA..ZZ, then AAA.. as defined for `/PageLabels` letter styles.
fn to_letters(value: i64) -> String {
    if value < 1 {
        return value.to_string();
    }
    let index = (value - 1) as usize;
    let letter = char::from(b'A' + (index % 26) as u8);
    std::iter::repeat_n(letter, index / 26 + 1).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::readers::test_support::context;
    use lopdf::content::{Content, Operation};
    use lopdf::{Stream, dictionary};
    use std::io::Write;

    fn build_pdf(pages: &[&str], labels: Option<Object>) -> Document {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
            "Encoding" => "WinAnsiEncoding",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids: Vec<Object> = Vec::new();
        for text in pages {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 12.into()]),
                    Operation::new("Td", vec![72.into(), 720.into()]),
                    Operation::new("Tj", vec![Object::string_literal(*text)]),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id =
                doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }

        let page_count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => page_count,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            }),
        );

        let mut catalog = dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        };
        if let Some(labels) = labels {
            catalog.set("PageLabels", labels);
        }
        let catalog_id = doc.add_object(catalog);
        doc.trailer.set("Root", catalog_id);
        doc
    }

    fn pdf_file(doc: &mut Document, dir: &Path) -> PathBuf {
        let path = dir.join("report.pdf");
        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        std::fs::File::create(&path)
            .unwrap()
            .write_all(&bytes)
            .unwrap();
        path
    }

    fn roman_then_decimal() -> Object {
        Object::Dictionary(dictionary! {
            "Nums" => vec![
                0.into(),
                Object::Dictionary(dictionary! { "S" => "r" }),
                2.into(),
                Object::Dictionary(dictionary! {
                    "S" => "D",
                    "P" => Object::string_literal("A-"),
                    "St" => 7,
                }),
            ],
        })
    }

    #[test]
    fn label_styles_format_numbers() {
        assert_eq!(to_roman(4), "IV");
        assert_eq!(to_roman(1994), "MCMXCIV");
        assert_eq!(to_letters(1), "A");
        assert_eq!(to_letters(26), "Z");
        assert_eq!(to_letters(28), "BB");
    }

    #[test]
    fn page_labels_follow_label_tree() {
        let doc = build_pdf(&["a", "b", "c", "d"], Some(roman_then_decimal()));
        assert_eq!(page_labels(&doc, 4), vec!["i", "ii", "A-7", "A-8"]);
    }

    #[test]
    fn huge_label_starts_do_not_overflow() {
        let decimal = Object::Dictionary(dictionary! {
            "Nums" => vec![0.into(), Object::Dictionary(dictionary! { "S" => "D", "St" => i64::MAX })],
        });
        let doc = build_pdf(&["a", "b"], Some(decimal));
        let max = i64::MAX.to_string();
        assert_eq!(page_labels(&doc, 2), vec![max.clone(), max]);

        let roman = Object::Dictionary(dictionary! {
            "Nums" => vec![
                0.into(),
                Object::Dictionary(dictionary! { "S" => "R", "St" => 1_000_000_000_000_i64 }),
            ],
        });
        let doc = build_pdf(&["a", "b"], Some(roman));
        assert_eq!(page_labels(&doc, 2), vec!["1000000000000", "1000000000001"]);
    }

    #[test]
    fn styled_labels_stay_styled_up_to_the_cap() {
        let range = LabelRange {
            first_page: 0,
            style: Some(b'a'),
            prefix: String::new(),
            start: MAX_STYLED_LABEL_VALUE,
        };
        assert!(range.label_for(0).chars().all(|c| c.is_ascii_lowercase()));
        assert_eq!(range.label_for(1), (MAX_STYLED_LABEL_VALUE + 1).to_string());
    }

    #[test]
    fn page_extraction_failure_fails_the_document() {
        let labels = vec!["1".to_string(), "2".to_string(), "3".to_string()];
        let error = collect_pages(vec![1, 2, 3], labels, |page| {
            if page == 2 {
                Err("broken content stream")
            } else {
                Ok(format!("page {page}"))
            }
        })
        .unwrap_err();

        assert!(matches!(error, ReaderError::Pdf(message) if message.contains("page 2")));
    }

    #[test]
    fn page_extraction_keeps_labels_in_order() {
        let pages = collect_pages(vec![1, 2], vec!["i".into(), "ii".into()], |page| {
            Ok::<_, String>(format!("text {page}"))
        })
        .unwrap();
        assert_eq!(
            pages,
            vec![
                PdfPage { label: "i".into(), text: "text 1".into() },
                PdfPage { label: "ii".into(), text: "text 2".into() },
            ]
        );
    }

    #[test]
    fn page_labels_default_to_page_numbers() {
        let doc = build_pdf(&["a", "b"], None);
        assert_eq!(page_labels(&doc, 2), vec!["1", "2"]);
    }

    #[test]
    fn decodes_utf16_prefixes() {
        assert_eq!(decode_text_string(&[0xFE, 0xFF, 0x00, 0x41, 0x00, 0x2D]), "A-");
        assert_eq!(decode_text_string(b"App-"), "App-");
    }

    #[test]
    fn native_extraction_labels_chunks_by_page() {
        let dir = tempfile::tempdir().unwrap();
        let mut doc = build_pdf(&["Alpha one", "Beta two"], Some(roman_then_decimal()));
        let path = pdf_file(&mut doc, dir.path());

        let chunks = load(&context(2), &path).unwrap();

        let alpha = chunks
            .iter()
            .find(|chunk| chunk.text.contains("Alpha"))
            .expect("first page chunk");
        let beta = chunks
            .iter()
            .find(|chunk| chunk.text.contains("Beta"))
            .expect("second page chunk");
        assert_eq!(alpha.metadata.page_number.as_deref(), Some("i"));
        assert_eq!(beta.metadata.page_number.as_deref(), Some("ii"));
        assert_eq!(alpha.metadata.file_name, "report.pdf");
        for (index, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.metadata.chunk_number, index);
        }
    }

    #[test]
    fn invalid_pdf_is_rejected() {
        assert!(matches!(
            extract_pages(b"not a pdf").unwrap_err(),
            ReaderError::Pdf(_)
        ));
    }

    #[test]
    fn disabled_conversion_is_not_attempted() {
        let config = EnhancedPdfConfig::default();
        assert_eq!(
            attempt_conversion(&config, Path::new("/tmp/a.pdf")),
            EnhancedConversion::Disabled
        );
    }

    #[test]
    fn missing_converter_falls_back_to_native() {
        let dir = tempfile::tempdir().unwrap();
        let mut doc = build_pdf(&["Alpha one", "Beta two"], None);
        let path = pdf_file(&mut doc, dir.path());
        let config = EnhancedPdfConfig {
            enabled: true,
            command: "definitely-not-an-installed-converter".into(),
        };

        assert!(matches!(
            attempt_conversion(&config, &path),
            EnhancedConversion::Failed(_)
        ));
        let ctx = context(2).with_enhanced_pdf(config);
        let chunks = load(&ctx, &path).unwrap();
        assert!(chunks.iter().any(|chunk| chunk.metadata.page_number.is_some()));
    }

    #[cfg(unix)]
    #[test]
    fn successful_conversion_reads_markdown() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-converter");
        std::fs::write(
            &script,
            "#!/bin/sh\nstem=$(basename \"$7\" .pdf)\nprintf 'converted markdown body' > \"$6/$stem.md\"\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let path = dir.path().join("scan.pdf");
        std::fs::write(&path, b"%PDF-1.4 placeholder").unwrap();
        let config = EnhancedPdfConfig {
            enabled: true,
            command: script.display().to_string(),
        };
        let ctx = context(16).with_enhanced_pdf(config);

        let chunks = load(&ctx, &path).unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "converted markdown body");
        assert_eq!(chunks[0].metadata.file_name, "scan.pdf");
        assert_eq!(chunks[0].metadata.page_number, None);
    }

    #[cfg(unix)]
    #[test]
    fn converter_without_output_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.pdf");
        let config = EnhancedPdfConfig {
            enabled: true,
            command: "true".into(),
        };
        assert!(matches!(
            attempt_conversion(&config, &path),
            EnhancedConversion::Failed(reason) if reason.contains("no output")
        ));
    }
}
