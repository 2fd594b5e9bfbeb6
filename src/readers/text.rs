use super::{ReaderContext, ReaderError, file_name_of, read_to_string, split_body};
use crate::types::Chunk;
use std::path::Path;

/// Read a UTF-8 text or Markdown file and split it once.
pub(super) fn load(ctx: &ReaderContext, path: &Path) -> Result<Vec<Chunk>, ReaderError> {
    let body = read_to_string(path)?;
    split_body(ctx, &body, &file_name_of(path))
}
