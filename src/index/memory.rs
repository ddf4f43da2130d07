//! In-memory vector index.
//!
//! Brute-force cosine scan over the stored vectors, guarded by an
//! `RwLock` so ingestion writers and retrieval readers can interleave.
//! Suitable for corpora in the tens of thousands of segments; a real ANN
//! backend slots in behind the same trait.

use super::{MetadataFilter, SearchHit, VectorIndex};
use crate::core::{Segment, SegmentMetadata};
use crate::embedding::cosine_similarity;
use crate::error::{IndexError, Result};
use std::collections::HashMap;
use std::sync::RwLock;

struct Entry {
    document_id: String,
    ordinal: usize,
    vector: Vec<f32>,
    metadata: SegmentMetadata,
}

/// In-memory [`VectorIndex`] implementation.
pub struct InMemoryIndex {
    dimensions: usize,
    entries: RwLock<HashMap<i64, Entry>>,
}

impl InMemoryIndex {
    /// Creates an empty index for vectors of the given dimension.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn read_entries(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<i64, Entry>>> {
        self.entries
            .read()
            .map_err(|e| IndexError::Backend(format!("lock poisoned: {e}")).into())
    }

    fn write_entries(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<i64, Entry>>> {
        self.entries
            .write()
            .map_err(|e| IndexError::Backend(format!("lock poisoned: {e}")).into())
    }
}

impl VectorIndex for InMemoryIndex {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn upsert(&self, segment: &Segment, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                got: vector.len(),
                required: self.dimensions,
            }
            .into());
        }
        let Some(segment_id) = segment.id else {
            return Err(IndexError::Backend(
                "segment has no assigned id; persist it before indexing".to_string(),
            )
            .into());
        };

        let mut entries = self.write_entries()?;
        entries.insert(
            segment_id,
            Entry {
                document_id: segment.document_id.clone(),
                ordinal: segment.ordinal,
                vector: vector.to_vec(),
                metadata: segment.metadata.clone(),
            },
        );
        Ok(())
    }

    fn delete_document(&self, document_id: &str) -> Result<()> {
        let mut entries = self.write_entries()?;
        entries.retain(|_, entry| entry.document_id != document_id);
        Ok(())
    }

    fn search_ann(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>> {
        let entries = self.read_entries()?;
        let mut hits: Vec<SearchHit> = entries
            .iter()
            .filter(|(_, entry)| filter.is_none_or(|f| f.matches(&entry.metadata)))
            .map(|(&segment_id, entry)| SearchHit {
                segment_id,
                score: cosine_similarity(vector, &entry.vector),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.segment_id.cmp(&b.segment_id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    fn search_by_metadata(&self, filter: &MetadataFilter, k: usize) -> Result<Vec<i64>> {
        let entries = self.read_entries()?;
        let mut matched: Vec<(&String, usize, i64)> = entries
            .iter()
            .filter(|(_, entry)| filter.matches(&entry.metadata))
            .map(|(&id, entry)| (&entry.document_id, entry.ordinal, id))
            .collect();

        matched.sort();
        Ok(matched.into_iter().take(k).map(|(_, _, id)| id).collect())
    }

    fn len(&self) -> usize {
        self.entries.read().map_or(0, |entries| entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(id: i64, doc: &str, ordinal: usize, article: Option<&str>) -> Segment {
        let metadata = SegmentMetadata {
            article_number: article.map(ToString::to_string),
            source_filename: Some(format!("{doc}.txt")),
            ..SegmentMetadata::default()
        };
        let mut seg = Segment::new(doc, ordinal, format!("text {id}"), metadata);
        seg.id = Some(id);
        seg
    }

    fn unit(dim: usize, hot: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[hot] = 1.0;
        v
    }

    #[test]
    fn test_upsert_and_len() {
        let index = InMemoryIndex::new(4);
        assert!(index.is_empty());
        index.upsert(&segment(1, "doc-a", 0, None), &unit(4, 0)).unwrap();
        index.upsert(&segment(2, "doc-a", 1, None), &unit(4, 1)).unwrap();
        assert_eq!(index.len(), 2);

        // Upsert replaces.
        index.upsert(&segment(1, "doc-a", 0, None), &unit(4, 2)).unwrap();
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let index = InMemoryIndex::new(4);
        let err = index
            .upsert(&segment(1, "doc-a", 0, None), &unit(3, 0))
            .unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Index(IndexError::DimensionMismatch { got: 3, required: 4 })
        ));
    }

    #[test]
    fn test_unsaved_segment_rejected() {
        let index = InMemoryIndex::new(4);
        let mut seg = segment(1, "doc-a", 0, None);
        seg.id = None;
        assert!(index.upsert(&seg, &unit(4, 0)).is_err());
    }

    #[test]
    fn test_search_ann_orders_by_score() {
        let index = InMemoryIndex::new(4);
        index.upsert(&segment(1, "doc-a", 0, None), &unit(4, 0)).unwrap();
        index.upsert(&segment(2, "doc-a", 1, None), &unit(4, 1)).unwrap();

        let hits = index.search_ann(&unit(4, 1), 10, None).unwrap();
        assert_eq!(hits[0].segment_id, 2);
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn test_search_ann_applies_filter() {
        let index = InMemoryIndex::new(4);
        index
            .upsert(&segment(1, "doc-a", 0, Some("第一条")), &unit(4, 0))
            .unwrap();
        index.upsert(&segment(2, "doc-a", 1, None), &unit(4, 0)).unwrap();

        let filter = MetadataFilter {
            article_number: Some("第一条".to_string()),
            ..MetadataFilter::default()
        };
        let hits = index.search_ann(&unit(4, 0), 10, Some(&filter)).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].segment_id, 1);
    }

    #[test]
    fn test_search_ann_tie_break_deterministic() {
        let index = InMemoryIndex::new(4);
        // Same vector for both: cosine ties, lower id first.
        index.upsert(&segment(9, "doc-a", 0, None), &unit(4, 2)).unwrap();
        index.upsert(&segment(3, "doc-a", 1, None), &unit(4, 2)).unwrap();

        let hits = index.search_ann(&unit(4, 2), 10, None).unwrap();
        assert_eq!(hits[0].segment_id, 3);
        assert_eq!(hits[1].segment_id, 9);
    }

    #[test]
    fn test_search_by_metadata_ordinal_order() {
        let index = InMemoryIndex::new(4);
        index
            .upsert(&segment(7, "doc-a", 2, Some("第三条")), &unit(4, 0))
            .unwrap();
        index
            .upsert(&segment(5, "doc-a", 0, Some("第三条")), &unit(4, 1))
            .unwrap();

        let filter = MetadataFilter {
            article_number: Some("第三条".to_string()),
            ..MetadataFilter::default()
        };
        let ids = index.search_by_metadata(&filter, 10).unwrap();
        assert_eq!(ids, vec![5, 7]);
    }

    #[test]
    fn test_delete_document() {
        let index = InMemoryIndex::new(4);
        index.upsert(&segment(1, "doc-a", 0, None), &unit(4, 0)).unwrap();
        index.upsert(&segment(2, "doc-b", 0, None), &unit(4, 1)).unwrap();

        index.delete_document("doc-a").unwrap();
        assert_eq!(index.len(), 1);

        // Deleting a missing document is a no-op.
        index.delete_document("doc-zz").unwrap();
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_truncates_to_k() {
        let index = InMemoryIndex::new(4);
        for i in 0..10 {
            index
                .upsert(&segment(i, "doc-a", usize::try_from(i).unwrap_or(0), None), &unit(4, 0))
                .unwrap();
        }
        let hits = index.search_ann(&unit(4, 0), 3, None).unwrap();
        assert_eq!(hits.len(), 3);
    }
}
