//! Maps character offsets in a joined multi-page body back to page labels.

use super::ReaderError;
use crate::types::Chunk;

/// One extracted page: its display label and text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfPage {
    /// Page label as shown by viewers ("iv", "A-3", "12").
    pub label: String,
    /// Extracted page text.
    pub text: String,
}

/// Page boundaries of a body built by joining page texts with a single `\n`.
///
/// `starts` holds one cumulative offset per page plus a trailing sentinel, all in characters.
/// Every page is counted as its length plus one separator, so the sentinel equals the body
/// length plus one.
#[derive(Debug, Clone)]
pub struct PageTracker {
    labels: Vec<String>,
    lengths: Vec<usize>,
    starts: Vec<usize>,
    body: String,
}

impl PageTracker {
    /// Build the tracker and validate the page accounting.
    pub fn new(pages: Vec<PdfPage>) -> Result<Self, ReaderError> {
        let mut labels = Vec::with_capacity(pages.len());
        let mut lengths = Vec::with_capacity(pages.len());
        let mut starts = Vec::with_capacity(pages.len() + 1);
        let mut texts = Vec::with_capacity(pages.len());
        let mut offset = 0;

        for page in pages {
            let length = page.text.chars().count();
            starts.push(offset);
            offset += length + 1;
            lengths.push(length);
            labels.push(page.label);
            texts.push(page.text);
        }
        starts.push(offset);

        let tracker = Self {
            labels,
            lengths,
            starts,
            body: texts.join("\n"),
        };
        tracker.check_consistency()?;
        Ok(tracker)
    }

    /// Verify that the sentinel offset equals the body length plus one.
    pub fn check_consistency(&self) -> Result<(), ReaderError> {
        let expected = self.body.chars().count() + 1;
        let actual = self.starts.last().copied().unwrap_or_default();
        if actual == expected {
            Ok(())
        } else {
            Err(ReaderError::PageAccounting { expected, actual })
        }
    }

    /// The joined document body.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Cumulative page start offsets including the sentinel.
    pub fn starts(&self) -> &[usize] {
        &self.starts
    }

    /// Character length of each page.
    pub fn lengths(&self) -> &[usize] {
        &self.lengths
    }

    /// Label of the last page whose start is at or before `offset`.
    ///
    /// Offsets past the final page resolve to the final page; `None` only when there are no pages.
    pub fn find_label(&self, offset: usize) -> Option<&str> {
        let mut found = None;
        for (label, start) in self.labels.iter().zip(&self.starts) {
            if *start <= offset {
                found = Some(label.as_str());
            } else {
                break;
            }
        }
        found
    }

    /// Set `page_number` on every chunk with a known start offset.
    pub fn label_chunks(&self, chunks: &mut [Chunk]) {
        for chunk in chunks.iter_mut() {
            if let Some(start) = chunk.start_char
                && let Some(label) = self.find_label(start)
            {
                chunk.metadata.page_number = Some(label.to_string());
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn corrupt_sentinel(&mut self, delta: usize) {
        if let Some(last) = self.starts.last_mut() {
            *last += delta;
        }
    }
}
