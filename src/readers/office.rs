//! DOCX and PPTX text extraction over the OOXML zip container.

use super::{ReaderContext, ReaderError, file_name_of, read_bytes, split_body};
use crate::types::Chunk;
use quick_xml::Reader;
use quick_xml::events::Event;
use std::io::{Cursor, Read};
use std::path::Path;

/// Maximum decompressed bytes read from a single zip entry (zip-bomb guard).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Signature of OLE compound files (`.ppt`, `.doc`).
const COMPOUND_FILE_MAGIC: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

type Archive<'a> = zip::ZipArchive<Cursor<&'a [u8]>>;

pub(super) fn load_docx(ctx: &ReaderContext, path: &Path) -> Result<Vec<Chunk>, ReaderError> {
    let bytes = read_bytes(path)?;
    let body = docx_text(&bytes)?;
    split_body(ctx, &body, &file_name_of(path))
}

pub(super) fn load_pptx(ctx: &ReaderContext, path: &Path) -> Result<Vec<Chunk>, ReaderError> {
    let bytes = read_bytes(path)?;
    let body = pptx_text(&bytes)?;
    split_body(ctx, &body, &file_name_of(path))
}

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, ReaderError> {
    if bytes.starts_with(&COMPOUND_FILE_MAGIC) {
        return Err(ReaderError::Office(
            "legacy binary Office format is not supported; save it as .pptx or .docx".to_string(),
        ));
    }
    zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| ReaderError::Office(e.to_string()))
}

fn read_entry_bounded(archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>, ReaderError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ReaderError::Office(format!("{name}: {e}")))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| ReaderError::Office(e.to_string()))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ReaderError::Office(format!(
            "zip entry {name} exceeds size limit ({MAX_XML_ENTRY_BYTES} bytes)"
        )));
    }
    Ok(out)
}

/// Text of `word/document.xml`, one line per paragraph.
fn docx_text(bytes: &[u8]) -> Result<String, ReaderError> {
    let mut archive = open_archive(bytes)?;
    let xml = read_entry_bounded(&mut archive, "word/document.xml")?;
    let paragraphs = collect_text_runs(&xml, b"p")?;
    Ok(paragraphs.join("\n"))
}

/// Text of every slide in numeric order, slides separated by a blank line.
fn pptx_text(bytes: &[u8]) -> Result<String, ReaderError> {
    let mut archive = open_archive(bytes)?;
    let mut slide_names: Vec<String> = archive
        .file_names()
        .filter(|name| name.starts_with("ppt/slides/slide") && name.ends_with(".xml"))
        .map(str::to_string)
        .collect();
    slide_names.sort_by_key(|name| {
        name.trim_start_matches("ppt/slides/slide")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });

    let mut slides = Vec::with_capacity(slide_names.len());
    for name in slide_names {
        let xml = read_entry_bounded(&mut archive, &name)?;
        let text = collect_text_runs(&xml, b"p")?.join("\n");
        if !text.is_empty() {
            slides.push(text);
        }
    }
    Ok(slides.join("\n\n"))
}

/// Concatenate `<t>` runs, starting a new block at the end of each `block` element.
///
/// Both WordprocessingML (`w:t`, `w:p`) and DrawingML (`a:t`, `a:p`) share local names, so one
/// walker serves both formats. Line breaks become `'\n'` and in-run tabs become `'\t'`; tab stops
/// declared in paragraph properties are not runs and are skipped. Empty blocks are dropped.
fn collect_text_runs(xml: &[u8], block: &[u8]) -> Result<Vec<String>, ReaderError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    let mut blocks = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    let mut in_run = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::End(e)) if e.local_name().as_ref() == b"t" => in_text = false,
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"r" => in_run = true,
            Ok(Event::End(e)) if e.local_name().as_ref() == b"r" => in_run = false,
            Ok(Event::Start(e) | Event::Empty(e)) => match e.local_name().as_ref() {
                b"br" | b"cr" => current.push('\n'),
                b"tab" if in_run => current.push('\t'),
                _ => {}
            },
            Ok(Event::End(e)) if e.local_name().as_ref() == block => {
                let text = current.trim();
                if !text.is_empty() {
                    blocks.push(text.to_string());
                }
                current.clear();
            }
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ReaderError::Office(e.to_string()))?;
                current.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ReaderError::Office(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    let trailing = current.trim();
    if !trailing.is_empty() {
        blocks.push(trailing.to_string());
    }
    Ok(blocks)
}
