use super::{ReaderContext, ReaderError, file_name_of, metadata, read_to_string, split_body};
use crate::types::Chunk;
use serde::Serialize;
use serde_json::Value;
use serde_json::ser::Formatter;
use std::io;
use std::path::Path;

/// Read a JSON file.
///
/// A top-level array yields one chunk per element; any other value is serialized and split.
pub(super) fn load(ctx: &ReaderContext, path: &Path) -> Result<Vec<Chunk>, ReaderError> {
    let raw = read_to_string(path)?;
    let document: Value = serde_json::from_str(&raw)?;
    let file_name = file_name_of(path);

    match document {
        Value::Array(items) => {
            let mut chunks = items
                .iter()
                .map(|item| {
                    let text = canonical_json(item)?;
                    Ok(Chunk::new(
                        text,
                        None,
                        metadata::base_metadata(ctx, &file_name),
                    ))
                })
                .collect::<Result<Vec<_>, ReaderError>>()?;
            metadata::stamp(&mut chunks, ctx, &file_name);
            Ok(chunks)
        }
        other => split_body(ctx, &canonical_json(&other)?, &file_name),
    }
}

/// Serialize with sorted object keys and `", "` / `": "` separators.
pub(super) fn canonical_json<T: Serialize>(value: &T) -> Result<String, ReaderError> {
    let mut out = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, SpacedFormatter);
    // Re-enter through Value so map keys come out in sorted order.
    serde_json::to_value(value)?.serialize(&mut serializer)?;
    Ok(String::from_utf8_lossy(&out).into_owned())
}

struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}
