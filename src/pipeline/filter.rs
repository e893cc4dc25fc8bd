//! Content-quality filter applied between extraction and chunking.

use tracing::debug;

use crate::extract::{Metadata, RawDocument};
use crate::{GranthError, Result};

/// A raw document that carries enough text to be worth indexing.
///
/// Only [`filter_documents`] constructs these, so holding one proves the
/// trimmed content met the minimum length.
#[derive(Debug, Clone, PartialEq)]
pub struct FilteredDocument(RawDocument);

impl FilteredDocument {
    #[inline]
    pub fn content(&self) -> &str {
        self.0.content()
    }

    #[inline]
    pub fn metadata(&self) -> &Metadata {
        self.0.metadata()
    }

    #[inline]
    pub fn into_inner(self) -> RawDocument {
        self.0
    }
}

/// Keep documents whose trimmed content has at least `min_length` characters
#[inline]
pub fn filter_documents(documents: Vec<RawDocument>, min_length: usize) -> Vec<FilteredDocument> {
    let total = documents.len();
    let kept: Vec<FilteredDocument> = documents
        .into_iter()
        .filter(|document| document.content().trim().chars().count() >= min_length)
        .map(FilteredDocument)
        .collect();

    debug!(
        "Content filter kept {} of {} documents (min {} chars)",
        kept.len(),
        total,
        min_length
    );
    kept
}

/// Like [`filter_documents`], but an empty result is an error naming `source`
#[inline]
pub fn require_content(
    documents: Vec<RawDocument>,
    min_length: usize,
    source: &str,
) -> Result<Vec<FilteredDocument>> {
    let kept = filter_documents(documents, min_length);
    if kept.is_empty() {
        return Err(GranthError::EmptyContent(source.to_string()));
    }
    Ok(kept)
}
