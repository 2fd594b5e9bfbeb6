//! Provenance stamping shared by every reader.

use super::ReaderContext;
use crate::types::{Chunk, ChunkMetadata};

pub(crate) fn base_metadata(ctx: &ReaderContext, file_name: &str) -> ChunkMetadata {
    ChunkMetadata::for_document(&ctx.document_id, ctx.data_source_id, file_name)
}

/// Stamp document id, collection id, file name and a contiguous chunk number on each chunk.
///
/// Chunk numbers are reassigned from zero in slice order; page labels are left untouched.
pub fn stamp(chunks: &mut [Chunk], ctx: &ReaderContext, file_name: &str) {
    for (chunk_number, chunk) in chunks.iter_mut().enumerate() {
        chunk.metadata.document_id.clone_from(&ctx.document_id);
        chunk.metadata.data_source_id = ctx.data_source_id;
        file_name.clone_into(&mut chunk.metadata.file_name);
        chunk.metadata.chunk_number = chunk_number;
    }
}
