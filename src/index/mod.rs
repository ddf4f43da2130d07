//! Vector index port.
//!
//! The index holds one vector per segment plus the metadata needed for
//! exact-match filtering. Vector dimension is a hard invariant: every
//! write is checked and mismatches are rejected.

mod memory;

pub use memory::InMemoryIndex;

use crate::core::{Segment, SegmentMetadata};
use crate::error::Result;

/// A metadata filter for exact-match and filtered ANN lookups.
///
/// All present fields must match. `law_name` matches when the segment's
/// source filename contains it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataFilter {
    /// Exact normalized article number (`第三十条`).
    pub article_number: Option<String>,
    /// Chapter label; matches when the stored chapter heading starts with it.
    pub chapter: Option<String>,
    /// Law short name; matches against the source filename.
    pub law_name: Option<String>,
}

impl MetadataFilter {
    /// Whether a segment's metadata satisfies this filter.
    #[must_use]
    pub fn matches(&self, metadata: &SegmentMetadata) -> bool {
        if let Some(article) = &self.article_number
            && metadata.article_number.as_deref() != Some(article.as_str())
        {
            return false;
        }
        if let Some(chapter) = &self.chapter
            && !metadata
                .chapter
                .as_deref()
                .is_some_and(|c| c.starts_with(chapter.as_str()))
        {
            return false;
        }
        if let Some(law_name) = &self.law_name
            && !metadata
                .source_filename
                .as_deref()
                .is_some_and(|f| f.contains(law_name.as_str()))
        {
            return false;
        }
        true
    }

    /// Whether the filter constrains anything at all.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.article_number.is_none() && self.chapter.is_none() && self.law_name.is_none()
    }
}

/// A scored hit from an ANN search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Segment id of the hit.
    pub segment_id: i64,
    /// Cosine similarity against the query vector.
    pub score: f32,
}

/// Port for the vector index.
///
/// Writes become visible atomically per call; ingestion upserts a whole
/// batch after its store transaction commits.
pub trait VectorIndex: Send + Sync {
    /// Vector dimension the index was configured with.
    fn dimensions(&self) -> usize;

    /// Inserts or replaces the vector and metadata for a segment.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::IndexError::DimensionMismatch`] when the
    /// vector length differs from the configured dimension, and an error
    /// when the segment has no assigned id.
    fn upsert(&self, segment: &Segment, vector: &[f32]) -> Result<()>;

    /// Removes every entry belonging to a document. Missing documents are
    /// a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn delete_document(&self, document_id: &str) -> Result<()>;

    /// Approximate nearest-neighbor search by cosine similarity, optionally
    /// constrained by a metadata filter. Results are sorted by score
    /// descending, ties broken by segment id for determinism.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn search_ann(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>>;

    /// Pure metadata lookup; returns up to `k` matching segment ids in
    /// (document, ordinal) order.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn search_by_metadata(&self, filter: &MetadataFilter, k: usize) -> Result<Vec<i64>>;

    /// Number of indexed segments.
    fn len(&self) -> usize;

    /// Whether the index holds no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(article: Option<&str>, chapter: Option<&str>, source: Option<&str>) -> SegmentMetadata {
        SegmentMetadata {
            article_number: article.map(ToString::to_string),
            chapter: chapter.map(ToString::to_string),
            source_filename: source.map(ToString::to_string),
            ..SegmentMetadata::default()
        }
    }

    #[test]
    fn test_filter_article_exact_match() {
        let filter = MetadataFilter {
            article_number: Some("第三十条".to_string()),
            ..MetadataFilter::default()
        };
        assert!(filter.matches(&meta(Some("第三十条"), None, None)));
        assert!(!filter.matches(&meta(Some("第三十一条"), None, None)));
        assert!(!filter.matches(&meta(None, None, None)));
    }

    #[test]
    fn test_filter_chapter_prefix_match() {
        let filter = MetadataFilter {
            chapter: Some("第二章".to_string()),
            ..MetadataFilter::default()
        };
        assert!(filter.matches(&meta(None, Some("第二章 自然人"), None)));
        assert!(!filter.matches(&meta(None, Some("第三章 法人"), None)));
    }

    #[test]
    fn test_filter_law_name_in_source() {
        let filter = MetadataFilter {
            law_name: Some("民法典".to_string()),
            ..MetadataFilter::default()
        };
        assert!(filter.matches(&meta(None, None, Some("中华人民共和国民法典.txt"))));
        assert!(!filter.matches(&meta(None, None, Some("环境保护法.txt"))));
        assert!(!filter.matches(&meta(None, None, None)));
    }

    #[test]
    fn test_filter_conjunction() {
        let filter = MetadataFilter {
            article_number: Some("第三十条".to_string()),
            law_name: Some("环境保护法".to_string()),
            ..MetadataFilter::default()
        };
        assert!(filter.matches(&meta(Some("第三十条"), None, Some("环境保护法.txt"))));
        assert!(!filter.matches(&meta(Some("第三十条"), None, Some("民法典.txt"))));
    }

    #[test]
    fn test_filter_is_empty() {
        assert!(MetadataFilter::default().is_empty());
        let filter = MetadataFilter {
            chapter: Some("第一章".to_string()),
            ..MetadataFilter::default()
        };
        assert!(!filter.is_empty());
    }
}
