//! Hybrid retrieval.
//!
//! Combines exact metadata-filtered lookup with vector similarity. A
//! query naming a specific article goes through the precise branch first;
//! only when nothing matches does the engine fall back to weighted vector
//! search. The anti-adjacency rule guarantees that for a precise query an
//! exact article match is never outranked by a neighboring article.

use crate::core::Segment;
use crate::embedding::Embedder;
use crate::error::Result;
use crate::index::{MetadataFilter, VectorIndex};
use crate::query::{QueryAnalyzer, QueryIntent, QueryType};
use crate::storage::Store;
use serde::Serialize;

/// Precision score assigned to exact article matches.
pub const EXACT_MATCH_SCORE: f32 = 1.0;

/// Precision score assigned to chapter-level matches.
pub const CHAPTER_MATCH_SCORE: f32 = 0.8;

/// Score bonus when a vector hit carries an article number.
const ARTICLE_BONUS: f32 = 0.1;

/// Score bonus when a vector hit's source filename contains the law name.
const LAW_NAME_BONUS: f32 = 0.05;

/// Minimum candidate pool for the vector fallback.
const VECTOR_POOL_FLOOR: usize = 20;

/// How a result was matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    /// Exact article-number match.
    ExactArticle,
    /// Chapter-level metadata match.
    Chapter,
    /// Vector similarity with metadata weighting.
    Vector,
}

/// A retrieval result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredSegment {
    /// The matched segment.
    pub segment: Segment,
    /// Final score: precision score for metadata branches, weighted cosine
    /// for the vector branch.
    pub score: f32,
    /// Which branch produced this result.
    pub kind: MatchKind,
}

/// Hybrid search over the index and store.
///
/// Branch order: exact article (when the intent names law + article),
/// chapter (for chapter-level queries), then weighted vector fallback.
/// Vector-index failures degrade to whatever the metadata branches found;
/// an empty result is a success, not an error.
///
/// # Errors
///
/// Returns an error only for store failures; index errors degrade.
pub fn hybrid_search(
    store: &dyn Store,
    index: &dyn VectorIndex,
    embedder: &dyn Embedder,
    analyzer: &QueryAnalyzer,
    query: &str,
    k: usize,
) -> Result<Vec<ScoredSegment>> {
    let intent = analyzer.analyze(query);
    search_with_intent(store, index, embedder, &intent, k)
}

/// Hybrid search against a pre-computed intent (used by the chat
/// orchestrator after query rewriting).
///
/// # Errors
///
/// Returns an error only for store failures; index errors degrade.
pub fn search_with_intent(
    store: &dyn Store,
    index: &dyn VectorIndex,
    embedder: &dyn Embedder,
    intent: &QueryIntent,
    k: usize,
) -> Result<Vec<ScoredSegment>> {
    // Branch A: exact article lookup.
    if intent.has_exact_match_info() {
        let filter = MetadataFilter {
            article_number: intent.article_number.clone(),
            law_name: intent.law_name.clone(),
            ..MetadataFilter::default()
        };
        match exact_lookup(store, index, &filter, k, MatchKind::ExactArticle) {
            Ok(results) if !results.is_empty() => {
                tracing::debug!(
                    query = %intent.original_query,
                    hits = results.len(),
                    "exact article match"
                );
                return Ok(results);
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "exact lookup failed; falling back"),
        }
    }

    // Branch B: chapter lookup.
    if intent.query_type == QueryType::ChapterLevel {
        let filter = MetadataFilter {
            chapter: intent.chapter.clone(),
            law_name: intent.law_name.clone(),
            ..MetadataFilter::default()
        };
        match exact_lookup(store, index, &filter, k, MatchKind::Chapter) {
            Ok(results) if !results.is_empty() => return Ok(results),
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "chapter lookup failed; falling back"),
        }
    }

    // Fallback: vector search with metadata weighting. Index errors
    // degrade to an empty success.
    match vector_search(store, index, embedder, intent, k) {
        Ok(results) => Ok(results),
        Err(e) => {
            tracing::warn!(error = %e, "vector search failed; degrading to empty result");
            Ok(Vec::new())
        }
    }
}

/// Metadata lookup shared by branches A and B. Results come back in
/// ordinal order with the branch's precision score.
fn exact_lookup(
    store: &dyn Store,
    index: &dyn VectorIndex,
    filter: &MetadataFilter,
    k: usize,
    kind: MatchKind,
) -> Result<Vec<ScoredSegment>> {
    let ids = index.search_by_metadata(filter, k)?;
    let segments = store.get_segments_by_ids(&ids)?;
    let score = match kind {
        MatchKind::ExactArticle => EXACT_MATCH_SCORE,
        MatchKind::Chapter => CHAPTER_MATCH_SCORE,
        MatchKind::Vector => 0.0,
    };
    Ok(segments
        .into_iter()
        .map(|segment| ScoredSegment {
            segment,
            score,
            kind,
        })
        .collect())
}

/// Weighted vector fallback.
fn vector_search(
    store: &dyn Store,
    index: &dyn VectorIndex,
    embedder: &dyn Embedder,
    intent: &QueryIntent,
    k: usize,
) -> Result<Vec<ScoredSegment>> {
    let query_vector = embedder.embed_one(&intent.original_query)?;
    let pool = k.max(VECTOR_POOL_FLOOR);
    let hits = index.search_ann(&query_vector, pool, None)?;
    if hits.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<i64> = hits.iter().map(|h| h.segment_id).collect();
    let mut by_id: std::collections::HashMap<i64, Segment> = store
        .get_segments_by_ids(&ids)?
        .into_iter()
        .filter_map(|s| s.id.map(|id| (id, s)))
        .collect();

    let mut results: Vec<ScoredSegment> = hits
        .iter()
        .filter_map(|hit| by_id.remove(&hit.segment_id).map(|segment| (segment, hit)))
        .map(|(segment, hit)| {
            let mut score = hit.score;
            if segment.metadata.article_number.is_some() {
                score += ARTICLE_BONUS;
            }
            if let Some(law_name) = &intent.law_name
                && segment
                    .metadata
                    .source_filename
                    .as_deref()
                    .is_some_and(|f| f.contains(law_name.as_str()))
            {
                score += LAW_NAME_BONUS;
            }
            ScoredSegment {
                segment,
                score,
                kind: MatchKind::Vector,
            }
        })
        .collect();

    // Anti-adjacency: for a precise-article query, any segment whose
    // article number equals the requested one outranks every segment
    // whose does not, regardless of cosine score.
    let wanted = (intent.query_type == QueryType::PreciseArticle)
        .then(|| intent.article_number.clone())
        .flatten();
    results.sort_by(|a, b| {
        if let Some(wanted) = &wanted {
            let a_exact = a.segment.metadata.article_number.as_deref() == Some(wanted.as_str());
            let b_exact = b.segment.metadata.article_number.as_deref() == Some(wanted.as_str());
            if a_exact != b_exact {
                return b_exact.cmp(&a_exact);
            }
        }
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.segment.id.cmp(&b.segment.id))
    });
    results.truncate(k);
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DocCategory, Document, Segment, SegmentMetadata, content_hash};
    use crate::embedding::FallbackEmbedder;
    use crate::index::InMemoryIndex;
    use crate::storage::SqliteStore;

    const DIM: usize = 64;

    struct Fixture {
        store: SqliteStore,
        index: InMemoryIndex,
        embedder: FallbackEmbedder,
        analyzer: QueryAnalyzer,
    }

    fn fixture() -> Fixture {
        let mut store = SqliteStore::in_memory().unwrap();
        store.init().unwrap();
        Fixture {
            store,
            index: InMemoryIndex::new(DIM),
            embedder: FallbackEmbedder::new(DIM),
            analyzer: QueryAnalyzer::new().unwrap(),
        }
    }

    /// Indexes three adjacent articles of 民法典.
    fn seed_minfa(fx: &mut Fixture) {
        let hash = content_hash("minfa".as_bytes());
        let doc = Document::new("民法典.txt", "text/plain", DocCategory::Law, &hash);
        fx.store.insert_document(&doc).unwrap();

        let articles = [
            ("第一千一百九十七条", "网络服务提供者知道或者应当知道网络用户利用其网络服务侵害他人民事权益，未采取必要措施的，与该网络用户承担连带责任。"),
            ("第一千一百九十八条", "宾馆、商场、银行、车站、机场、体育场馆、娱乐场所等经营场所、公共场所的经营者、管理者，未尽到安全保障义务，造成他人损害的，应当承担侵权责任。"),
            ("第一千一百九十九条", "无民事行为能力人在幼儿园、学校或者其他教育机构学习、生活期间受到人身损害的，幼儿园、学校或者其他教育机构应当承担侵权责任。"),
        ];

        let mut segments: Vec<Segment> = articles
            .iter()
            .enumerate()
            .map(|(i, (label, body))| {
                let metadata = SegmentMetadata {
                    article_number: Some((*label).to_string()),
                    source_filename: Some("民法典.txt".to_string()),
                    category: Some("LAW".to_string()),
                    ..SegmentMetadata::default()
                };
                Segment::new(&doc.id, i, format!("{label} {body}"), metadata)
            })
            .collect();

        let texts: Vec<&str> = segments.iter().map(|s| s.text.as_str()).collect();
        let vectors = fx.embedder.embed(&texts).unwrap();
        fx.store.insert_segment_batch(&mut segments, &vectors).unwrap();
        for (segment, vector) in segments.iter().zip(&vectors) {
            fx.index.upsert(segment, vector).unwrap();
        }
    }

    #[test]
    fn test_precise_article_rank_one() {
        let mut fx = fixture();
        seed_minfa(&mut fx);

        let results = hybrid_search(
            &fx.store,
            &fx.index,
            &fx.embedder,
            &fx.analyzer,
            "民法典第1198条",
            3,
        )
        .unwrap();

        assert!(!results.is_empty());
        assert_eq!(
            results[0].segment.metadata.article_number.as_deref(),
            Some("第一千一百九十八条"),
            "anti-adjacency: the exact article must be rank 1"
        );
        assert_eq!(results[0].kind, MatchKind::ExactArticle);
        assert!((results[0].score - EXACT_MATCH_SCORE).abs() < f32::EPSILON);
    }

    #[test]
    fn test_exact_branch_returns_only_matches() {
        let mut fx = fixture();
        seed_minfa(&mut fx);

        let results = hybrid_search(
            &fx.store,
            &fx.index,
            &fx.embedder,
            &fx.analyzer,
            "民法典第1197条",
            3,
        )
        .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(
            results[0].segment.metadata.article_number.as_deref(),
            Some("第一千一百九十七条")
        );
    }

    #[test]
    fn test_unknown_article_falls_back_to_vector() {
        let mut fx = fixture();
        seed_minfa(&mut fx);

        // 第9999条 is not indexed; exact lookup is empty, vector fallback runs.
        let results = hybrid_search(
            &fx.store,
            &fx.index,
            &fx.embedder,
            &fx.analyzer,
            "民法典第9999条 经营场所 安全保障义务",
            3,
        )
        .unwrap();

        assert!(!results.is_empty());
        assert!(results.iter().all(|r| r.kind == MatchKind::Vector));
    }

    #[test]
    fn test_semantic_query_uses_vector_branch() {
        let mut fx = fixture();
        seed_minfa(&mut fx);

        let results = hybrid_search(
            &fx.store,
            &fx.index,
            &fx.embedder,
            &fx.analyzer,
            "经营场所未尽到安全保障义务怎么承担责任",
            2,
        )
        .unwrap();

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.kind == MatchKind::Vector));
        assert!(results[0].score >= results[1].score);
    }

    #[test]
    fn test_anti_adjacency_under_cosine_ties() {
        let mut fx = fixture();
        seed_minfa(&mut fx);

        // Force the vector path for a precise query by removing the law
        // name (no exact-match info without it).
        let intent = fx.analyzer.analyze("第1198条");
        assert!(!intent.has_exact_match_info());
        let results =
            search_with_intent(&fx.store, &fx.index, &fx.embedder, &intent, 3).unwrap();

        assert_eq!(
            results[0].segment.metadata.article_number.as_deref(),
            Some("第一千一百九十八条"),
            "exact article outranks adjacent ones in the vector branch too"
        );
    }

    #[test]
    fn test_chapter_level_branch() {
        let mut fx = fixture();
        let hash = content_hash(b"doc");
        let doc = Document::new("民法典.txt", "text/plain", DocCategory::Law, &hash);
        fx.store.insert_document(&doc).unwrap();

        let metadata = SegmentMetadata {
            article_number: Some("第十三条".to_string()),
            chapter: Some("第二章 自然人".to_string()),
            source_filename: Some("民法典.txt".to_string()),
            ..SegmentMetadata::default()
        };
        let mut segments = vec![Segment::new(
            &doc.id,
            0,
            "第十三条 自然人从出生时起到死亡时止，具有民事权利能力。".to_string(),
            metadata,
        )];
        let texts: Vec<&str> = segments.iter().map(|s| s.text.as_str()).collect();
        let vectors = fx.embedder.embed(&texts).unwrap();
        fx.store.insert_segment_batch(&mut segments, &vectors).unwrap();
        fx.index.upsert(&segments[0], &vectors[0]).unwrap();

        let results = hybrid_search(
            &fx.store,
            &fx.index,
            &fx.embedder,
            &fx.analyzer,
            "民法典第2章",
            5,
        )
        .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].kind, MatchKind::Chapter);
        assert!((results[0].score - CHAPTER_MATCH_SCORE).abs() < f32::EPSILON);
    }

    #[test]
    fn test_empty_index_is_empty_success() {
        let fx = fixture();
        let results = hybrid_search(
            &fx.store,
            &fx.index,
            &fx.embedder,
            &fx.analyzer,
            "任何问题",
            5,
        )
        .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_truncates_to_k() {
        let mut fx = fixture();
        seed_minfa(&mut fx);
        let results = hybrid_search(
            &fx.store,
            &fx.index,
            &fx.embedder,
            &fx.analyzer,
            "侵权责任",
            1,
        )
        .unwrap();
        assert_eq!(results.len(), 1);
    }
}
