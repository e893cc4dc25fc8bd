//! PDF extraction, one document per page.

use serde_json::Value;
use std::path::Path;
use tracing::{debug, warn};

use super::{Metadata, RawDocument};
use crate::{GranthError, Result};

/// Extract one raw document per non-empty page of a PDF file
#[inline]
pub fn extract_pages(path: &Path) -> Result<Vec<RawDocument>> {
    let bytes = std::fs::read(path)?;

    let pages = pdf_extract::extract_text_from_mem_by_pages(&bytes).map_err(|e| {
        GranthError::Extraction(format!("Failed to parse PDF {}: {}", path.display(), e))
    })?;

    let total_pages = pages.len();
    let source = path.display().to_string();
    let mut documents = Vec::with_capacity(total_pages);

    for (index, text) in pages.into_iter().enumerate() {
        if text.trim().is_empty() {
            debug!("Skipping empty PDF page {} of {}", index + 1, source);
            continue;
        }

        let mut metadata = Metadata::new();
        metadata.insert("source".to_string(), Value::String(source.clone()));
        metadata.insert("loader".to_string(), Value::String("pdf".to_string()));
        metadata.insert("page".to_string(), Value::from(index + 1));
        metadata.insert("total_pages".to_string(), Value::from(total_pages));
        documents.push(RawDocument::new(text, metadata));
    }

    if documents.is_empty() && total_pages > 0 {
        warn!("PDF {} has {} pages but no extractable text", source, total_pages);
    }

    debug!(
        "Extracted {} of {} pages from {}",
        documents.len(),
        total_pages,
        source
    );
    Ok(documents)
}
