//! Segment representation.
//!
//! Segments are the retrieval atom: hierarchy-aware slices of a document
//! produced by the legal splitter, each carrying the metadata needed for
//! exact-match lookup (article number, chapter, source filename).

use serde::{Deserialize, Serialize};

/// Estimates tokens for Chinese-dominant text.
///
/// The contract is `ceil(utf8_byte_len / 3)`; a CJK character is three
/// UTF-8 bytes, so this counts roughly one token per character.
#[must_use]
pub const fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(3)
}

/// A segment of an ingested document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    /// Unique identifier (assigned by the store).
    pub id: Option<i64>,

    /// Id of the owning document.
    pub document_id: String,

    /// 0-based position within the document. Strictly increasing.
    pub ordinal: usize,

    /// Segment text.
    pub text: String,

    /// Estimated token count (`ceil(utf8_len / 3)`).
    pub estimated_tokens: usize,

    /// Hierarchy and provenance metadata.
    pub metadata: SegmentMetadata,
}

/// Metadata attached to a segment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentMetadata {
    /// Enclosing book heading (`第一编 总则`), when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub book: Option<String>,

    /// Enclosing chapter heading (`第二章 自然人`), when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chapter: Option<String>,

    /// Enclosing section heading (`第一节 …`), when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,

    /// Normalized article label (`第三十条`), when the segment is an article.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub article_number: Option<String>,

    /// 1-based part index when a long article was sub-split.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub part: Option<usize>,

    /// Total parts of the sub-split article.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_parts: Option<usize>,

    /// How this segment was produced: `article`, `article_part`, or `paragraph`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub split_type: Option<String>,

    /// Filename the document was ingested from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_filename: Option<String>,

    /// Document category string (`LAW`, `REGULATION`, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    /// Set when the embedding batch for this segment dead-lettered.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub embedding_failed: bool,
}

impl Segment {
    /// Creates a new segment, computing the token estimate from the text.
    #[must_use]
    pub fn new(document_id: &str, ordinal: usize, text: String, metadata: SegmentMetadata) -> Self {
        let estimated_tokens = estimate_tokens(&text);
        Self {
            id: None,
            document_id: document_id.to_string(),
            ordinal,
            text,
            estimated_tokens,
            metadata,
        }
    }

    /// Returns the segment length in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.text.len()
    }

    /// Whether this segment is (a part of) a recognized article.
    #[must_use]
    pub const fn is_article(&self) -> bool {
        self.metadata.article_number.is_some()
    }

    /// Short source tag for context blocks: `[doc:<title> §<article>]`.
    #[must_use]
    pub fn source_tag(&self, title: &str) -> String {
        match &self.metadata.article_number {
            Some(article) => format!("[doc:{title} §{article}]"),
            None => format!("[doc:{title}]"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens_cjk() {
        // One CJK char is 3 UTF-8 bytes, so tokens == chars for pure CJK.
        let text = "民法典";
        assert_eq!(text.len(), 9);
        assert_eq!(estimate_tokens(text), 3);
    }

    #[test]
    fn test_estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("a"), 1);
        assert_eq!(estimate_tokens("ab"), 1);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 2);
    }

    #[test]
    fn test_segment_new_computes_tokens() {
        let seg = Segment::new("doc-1", 0, "第一条 内容".to_string(), SegmentMetadata::default());
        assert_eq!(seg.estimated_tokens, estimate_tokens(&seg.text));
        assert!(seg.id.is_none());
        assert_eq!(seg.ordinal, 0);
    }

    #[test]
    fn test_is_article() {
        let mut meta = SegmentMetadata::default();
        let seg = Segment::new("doc-1", 0, "text".to_string(), meta.clone());
        assert!(!seg.is_article());

        meta.article_number = Some("第三十条".to_string());
        let seg = Segment::new("doc-1", 0, "text".to_string(), meta);
        assert!(seg.is_article());
    }

    #[test]
    fn test_source_tag() {
        let mut meta = SegmentMetadata::default();
        meta.article_number = Some("第三十条".to_string());
        let seg = Segment::new("doc-1", 0, "t".to_string(), meta);
        assert_eq!(seg.source_tag("环境保护法"), "[doc:环境保护法 §第三十条]");

        let seg = Segment::new("doc-1", 0, "t".to_string(), SegmentMetadata::default());
        assert_eq!(seg.source_tag("环境保护法"), "[doc:环境保护法]");
    }

    #[test]
    fn test_metadata_serialization_skips_none() {
        let meta = SegmentMetadata {
            article_number: Some("第一条".to_string()),
            ..SegmentMetadata::default()
        };
        let json = serde_json::to_string(&meta).unwrap();
        assert!(json.contains("article_number"));
        assert!(!json.contains("chapter"));
        assert!(!json.contains("embedding_failed"));
    }

    #[test]
    fn test_segment_round_trip() {
        let meta = SegmentMetadata {
            book: Some("第一编 总则".to_string()),
            chapter: Some("第一章 基本规定".to_string()),
            article_number: Some("第一条".to_string()),
            part: Some(1),
            total_parts: Some(2),
            split_type: Some("article_part".to_string()),
            source_filename: Some("minfa.txt".to_string()),
            category: Some("LAW".to_string()),
            ..SegmentMetadata::default()
        };
        let seg = Segment::new("doc-1", 3, "第一条 为了保护…".to_string(), meta);
        let json = serde_json::to_string(&seg).unwrap();
        let back: Segment = serde_json::from_str(&json).unwrap();
        assert_eq!(back, seg);
    }
}
